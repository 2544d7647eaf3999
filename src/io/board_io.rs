use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::io::config_io::read_config;
use crate::io::lock::{BoardLock, LockError};
use crate::model::board::Board;
use crate::model::collection::Collection;
use crate::model::config::{BoardConfig, SyncConfig};
use crate::model::item::OrderableItem;
use crate::sync::gateway::{CommitReceipt, GatewayError, PersistenceGateway};

pub const BOARD_DIR: &str = "board";
pub const CONFIG_FILE: &str = "project.toml";
pub const ITEMS_FILE: &str = "items.json";

/// Error type for board I/O operations
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("not a bsync board: no board/ directory found")]
    NotABoard,
    #[error("could not read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("could not write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("could not parse project.toml: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("could not edit project.toml: {0}")]
    ConfigEdit(#[from] toml_edit::TomlError),
    #[error("could not parse {path}: {source}")]
    ItemsParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// On-disk shape of items.json
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ItemsFile {
    #[serde(default)]
    pub items: Vec<OrderableItem>,
}

/// Walk up from `start` looking for a directory containing `board/project.toml`.
pub fn discover_board(start: &Path) -> Result<PathBuf, BoardError> {
    let mut current = start.to_path_buf();
    loop {
        let board_dir = current.join(BOARD_DIR);
        if board_dir.is_dir() && board_dir.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(BoardError::NotABoard);
        }
    }
}

/// Load config and items from `root/board/`.
pub fn load_board(root: &Path) -> Result<Board, BoardError> {
    let board_dir = root.join(BOARD_DIR);
    if !board_dir.is_dir() {
        return Err(BoardError::NotABoard);
    }
    let (config, _) = read_config(&board_dir)?;
    let items = Collection::from_items(read_rows(&board_dir)?);
    Ok(Board {
        root: root.to_path_buf(),
        board_dir,
        config,
        items,
    })
}

/// Raw rows of items.json, duplicates and all. A missing file is an empty board.
pub fn read_rows(board_dir: &Path) -> Result<Vec<OrderableItem>, BoardError> {
    let path = board_dir.join(ITEMS_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(BoardError::Read { path, source }),
    };
    let file: ItemsFile =
        serde_json::from_str(&text).map_err(|source| BoardError::ItemsParse { path, source })?;
    Ok(file.items)
}

/// Replace items.json atomically. Callers hold the board lock.
pub fn write_rows(board_dir: &Path, items: &[OrderableItem]) -> Result<(), BoardError> {
    let path = board_dir.join(ITEMS_FILE);
    let file = ItemsFile {
        items: items.to_vec(),
    };
    let mut json = serde_json::to_string_pretty(&file).map_err(|source| BoardError::ItemsParse {
        path: path.clone(),
        source,
    })?;
    json.push('\n');
    atomic_write(&path, json.as_bytes()).map_err(|source| BoardError::Write { path, source })
}

pub fn lock_board(board_dir: &Path, sync: &SyncConfig) -> Result<BoardLock, BoardError> {
    Ok(BoardLock::acquire(
        board_dir,
        Duration::from_millis(sync.lock_timeout_ms),
    )?)
}

/// Lock, then write the whole collection.
pub fn save_items(board: &Board) -> Result<(), BoardError> {
    let _lock = lock_board(&board.board_dir, &board.config.sync)?;
    let rows: Vec<OrderableItem> = board.items.iter().cloned().collect();
    write_rows(&board.board_dir, &rows)
}

/// Write `content` to a temp file beside `path`, then rename over it.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Persists commits into `board/items.json`.
///
/// Each commit is a locked read-modify-write of the file, so edits made by
/// other processes since the caller loaded the board are kept. File I/O is
/// blocking; the CLI drives it with `block_on`.
#[derive(Debug, Clone)]
pub struct FileGateway {
    board_dir: PathBuf,
    config: BoardConfig,
}

impl FileGateway {
    pub fn new(board_dir: impl Into<PathBuf>, config: BoardConfig) -> Self {
        FileGateway {
            board_dir: board_dir.into(),
            config,
        }
    }

    pub fn for_board(board: &Board) -> Self {
        Self::new(board.board_dir.clone(), board.config.clone())
    }

    fn commit_locked(&self, changes: &[OrderableItem]) -> Result<CommitReceipt, GatewayError> {
        let _lock = lock_board(&self.board_dir, &self.config.sync).map_err(unavailable)?;
        let mut stored = Collection::from_items(read_rows(&self.board_dir).map_err(unavailable)?);

        for change in changes {
            if !stored.contains(&change.id) {
                return Err(GatewayError::Rejected(format!(
                    "item {} no longer exists",
                    change.id
                )));
            }
            if !self.config.has_column(&change.partition) {
                return Err(GatewayError::Rejected(format!(
                    "unknown column {}",
                    change.partition
                )));
            }
        }

        let now = chrono::Utc::now();
        let canonical: Vec<OrderableItem> = changes
            .iter()
            .map(|change| {
                let mut item = change.clone();
                item.updated_at = Some(now);
                item
            })
            .collect();
        stored.apply(&canonical);

        let rows: Vec<OrderableItem> = stored.iter().cloned().collect();
        write_rows(&self.board_dir, &rows).map_err(unavailable)?;
        debug!(items = canonical.len(), dir = %self.board_dir.display(), "items.json written");
        Ok(CommitReceipt { canonical })
    }
}

fn unavailable(e: BoardError) -> GatewayError {
    match e {
        BoardError::Read { source, .. } | BoardError::Write { source, .. } => GatewayError::Io(source),
        other => GatewayError::Unavailable(other.to_string()),
    }
}

#[async_trait(?Send)]
impl PersistenceGateway for FileGateway {
    async fn commit(&self, changes: &[OrderableItem]) -> Result<CommitReceipt, GatewayError> {
        let receipt = self.commit_locked(changes)?;
        info!(items = receipt.canonical.len(), "commit stored");
        Ok(receipt)
    }
}
