use std::path::PathBuf;

use super::collection::Collection;
use super::config::BoardConfig;

/// A fully loaded board directory
#[derive(Debug)]
pub struct Board {
    /// Root directory (parent of `board/`)
    pub root: PathBuf,
    /// Path to the `board/` directory
    pub board_dir: PathBuf,
    /// Parsed project.toml
    pub config: BoardConfig,
    /// Items from items.json
    pub items: Collection,
}
