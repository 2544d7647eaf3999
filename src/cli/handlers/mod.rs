mod init;
pub use init::cmd_init;

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use futures::executor::block_on;
use tracing::debug;

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::board_io::{self, BoardError, FileGateway};
use crate::io::config_io;
use crate::io::watcher::{BoardEvent, BoardWatcher};
use crate::model::board::Board;
use crate::model::collection::Collection;
use crate::model::config::ColumnConfig;
use crate::model::item::{ItemId, OrderableItem, PartitionKey, Position};
use crate::ops::check;
use crate::ops::position::{Allocation, PositionPolicy, allocate_position, renumber};
use crate::sync::{CommitOutcome, StateChange, SyncCore};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    let json = cli.json;

    let start = match cli.board_dir {
        Some(ref dir) => std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e))?,
        None => std::env::current_dir()?,
    };

    match cli.command {
        // Init is handled in main.rs before board discovery
        Commands::Init(args) => cmd_init(args),

        // Read commands
        Commands::List(args) => cmd_list(args, &start, json),
        Commands::Check => cmd_check(&start, json),
        Commands::Watch(args) => cmd_watch(args, &start, json),

        // Write commands
        Commands::Add(args) => cmd_add(args, &start, json),
        Commands::Rm(args) => cmd_rm(args, &start, json),
        Commands::Mv(args) => cmd_mv(args, &start, json),
        Commands::Renumber(args) => cmd_renumber(args, &start, json),

        // Column management
        Commands::Column(cmd) => match cmd.action {
            ColumnAction::Add(args) => cmd_column_add(args, &start),
        },
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_board_from(start: &Path) -> Result<Board, BoardError> {
    let root = board_io::discover_board(start)?;
    board_io::load_board(&root)
}

/// Resolve a column argument against the config.
fn require_column(board: &Board, column: &str) -> Result<PartitionKey, String> {
    let key = PartitionKey::new(column);
    if board.config.has_column(&key) {
        Ok(key)
    } else {
        Err(format!("unknown column: {}", column))
    }
}

/// Next free `T-<n>` id.
fn next_item_id(items: &Collection) -> ItemId {
    let max = items
        .iter()
        .filter_map(|item| item.id.as_str().strip_prefix("T-"))
        .filter_map(|num| num.parse::<usize>().ok())
        .max()
        .unwrap_or(0);
    ItemId::new(format!("T-{}", max + 1))
}

/// Overwrite positions with integer ranks. Returns how many items changed.
fn renumber_partition(items: &mut Collection, key: &PartitionKey) -> usize {
    let ranks = renumber(&items.partition(key));
    let changed: Vec<OrderableItem> = ranks
        .into_iter()
        .filter_map(|(id, position)| {
            let item = items.get(&id)?;
            (item.position != position).then(|| OrderableItem {
                position,
                ..item.clone()
            })
        })
        .collect();
    items.apply(&changed);
    changed.len()
}

/// Position for an item appended to the bottom of `key`.
fn append_position(
    items: &mut Collection,
    key: &PartitionKey,
    policy: &PositionPolicy,
) -> Result<Position, String> {
    let len = items.partition(key).len();
    if let Allocation::At(position) = allocate_position(&items.partition(key), len, policy) {
        return Ok(position);
    }
    let changed = renumber_partition(items, key);
    debug!(column = %key, changed, "renumbered before append");
    match allocate_position(&items.partition(key), len, policy) {
        Allocation::At(position) => Ok(position),
        Allocation::Exhausted => Err(format!("no position available at the bottom of {}", key)),
    }
}

fn write_collection(board: &Board, items: &Collection) -> Result<(), BoardError> {
    let rows: Vec<OrderableItem> = items.iter().cloned().collect();
    board_io::write_rows(&board.board_dir, &rows)
}

// ---------------------------------------------------------------------------
// Read command handlers
// ---------------------------------------------------------------------------

fn cmd_list(args: ListArgs, start: &Path, json: bool) -> CmdResult {
    let board = load_board_from(start)?;
    let only = match args.column {
        Some(ref column) => Some(require_column(&board, column)?),
        None => None,
    };

    if json {
        let out = board_to_json(&board.config, &board.items, only.as_ref());
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", render_board(&board.config, &board.items, only.as_ref()));
    }
    Ok(())
}

fn cmd_check(start: &Path, json: bool) -> CmdResult {
    let root = board_io::discover_board(start)?;
    let board_dir = root.join(board_io::BOARD_DIR);
    let (config, _) = config_io::read_config(&board_dir)?;
    let rows = board_io::read_rows(&board_dir)?;
    let result = check::check_board(&config, &rows);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if !result.errors.is_empty() {
            println!("Errors:");
            for err in &result.errors {
                match err {
                    check::CheckError::UnknownColumn { item_id, column } => {
                        println!("  {} is in unknown column: {}", item_id, column);
                    }
                    check::CheckError::NonFinitePosition { item_id, column } => {
                        println!("  [{}] {} has a non-finite position", column, item_id);
                    }
                    check::CheckError::DuplicateId { item_id, count } => {
                        println!("  {} appears {} times", item_id, count);
                    }
                }
            }
        }
        if !result.warnings.is_empty() {
            if !result.errors.is_empty() {
                println!();
            }
            println!("Warnings:");
            for warn in &result.warnings {
                match warn {
                    check::CheckWarning::DuplicatePosition {
                        column,
                        position,
                        item_ids,
                    } => {
                        println!(
                            "  [{}] {} share position {} (run `bsync renumber {}`)",
                            column,
                            item_ids.join(", "),
                            position,
                            column
                        );
                    }
                }
            }
        }
        if result.valid {
            println!("✓ board is valid");
        } else {
            println!("✗ board has errors");
        }
    }
    Ok(())
}

/// Re-read items.json on every change and feed it through `SyncCore::refresh`.
fn cmd_watch(args: WatchArgs, start: &Path, json: bool) -> CmdResult {
    let board = load_board_from(start)?;
    let watcher = BoardWatcher::start(&board.board_dir)?;
    let core = SyncCore::new(board.items.clone(), FileGateway::for_board(&board))
        .with_policy(board.config.positions);

    let config = Rc::new(RefCell::new(board.config.clone()));
    let printer = core.clone();
    let printer_config = Rc::clone(&config);
    core.subscribe(move |change| {
        if !matches!(change, StateChange::Refreshed) {
            return;
        }
        printer.with_collection(|items| {
            let config = printer_config.borrow();
            if json {
                if let Ok(out) = serde_json::to_string(&board_to_json(&config, items, None)) {
                    println!("{}", out);
                }
            } else {
                println!("{}", render_board(&config, items, None));
            }
        });
    });

    let board_dir: PathBuf = board.board_dir.clone();
    let mut refreshes = 0usize;
    core.refresh(board.items.into_items());
    loop {
        if args.count.is_some_and(|n| refreshes >= n) {
            return Ok(());
        }
        let events = watcher.wait(Duration::from_millis(500));
        if events.is_empty() {
            continue;
        }
        if events.contains(&BoardEvent::ConfigChanged) {
            let (updated, _) = config_io::read_config(&board_dir)?;
            *config.borrow_mut() = updated;
        }
        match board_io::read_rows(&board_dir) {
            Ok(rows) => {
                core.refresh(rows);
                refreshes += 1;
            }
            // a writer may be mid-rename; the next event retries
            Err(e) => debug!(error = %e, "skipping refresh"),
        }
    }
}

// ---------------------------------------------------------------------------
// Write command handlers
// ---------------------------------------------------------------------------

fn cmd_add(args: AddArgs, start: &Path, json: bool) -> CmdResult {
    let board = load_board_from(start)?;
    let key = require_column(&board, &args.column)?;
    let _lock = board_io::lock_board(&board.board_dir, &board.config.sync)?;
    // re-read under the lock so concurrent writers are not clobbered
    let mut items = Collection::from_items(board_io::read_rows(&board.board_dir)?);

    let id = match args.id {
        Some(id) => {
            let id = ItemId::new(id);
            if items.contains(&id) {
                return Err(format!("item already exists: {}", id).into());
            }
            id
        }
        None => next_item_id(&items),
    };
    let position = append_position(&mut items, &key, &board.config.positions)?;

    let mut item = OrderableItem::new(id.as_str(), key.as_str(), position.value(), args.title);
    item.updated_at = Some(chrono::Utc::now());
    items.insert(item.clone());
    write_collection(&board, &items)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item_to_json(&item))?);
    } else {
        println!("{}", item.id);
    }
    Ok(())
}

fn cmd_rm(args: RmArgs, start: &Path, json: bool) -> CmdResult {
    let board = load_board_from(start)?;
    let _lock = board_io::lock_board(&board.board_dir, &board.config.sync)?;
    let mut items = Collection::from_items(board_io::read_rows(&board.board_dir)?);

    let removed = items
        .remove(&ItemId::new(args.id.clone()))
        .ok_or_else(|| format!("item not found: {}", args.id))?;
    write_collection(&board, &items)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item_to_json(&removed))?);
    } else {
        println!("removed {}", removed.id);
    }
    Ok(())
}

/// Drives the same path a UI drag takes: start, retarget, drop, commit.
fn cmd_mv(args: MvArgs, start: &Path, json: bool) -> CmdResult {
    let board = load_board_from(start)?;
    let id = ItemId::new(args.id.clone());
    if !board.items.contains(&id) {
        return Err(format!("item not found: {}", args.id).into());
    }
    let key = require_column(&board, &args.column)?;

    let others: Vec<ItemId> = board
        .items
        .partition(&key)
        .into_iter()
        .filter(|item| item.id != id)
        .map(|item| item.id.clone())
        .collect();
    let index = match (args.index, args.after) {
        (Some(index), _) => index.min(others.len()),
        (None, Some(after)) => others
            .iter()
            .position(|other| other.as_str() == after)
            .map(|i| i + 1)
            .ok_or_else(|| format!("after target not found in {}: {}", key, after))?,
        (None, None) => others.len(),
    };

    let core = SyncCore::new(board.items.clone(), FileGateway::for_board(&board))
        .with_policy(board.config.positions);
    let applied = Rc::new(Cell::new(0usize));
    let applied_sink = Rc::clone(&applied);
    core.subscribe(move |change| {
        if let StateChange::Applied { items } = change {
            applied_sink.set(items.len());
        }
    });
    let failure = Rc::new(RefCell::new(None));
    let failure_sink = Rc::clone(&failure);
    core.on_failure(move |f| {
        *failure_sink.borrow_mut() = Some(f.reason.clone());
    });

    core.start_drag(&id)?;
    core.update_target(key.clone(), index);
    let outcome = match core.drop_item() {
        Some(commit) => match block_on(commit) {
            CommitOutcome::Confirmed => "confirmed",
            CommitOutcome::RolledBack | CommitOutcome::Stale => "rolled_back",
        },
        None => "unchanged",
    };
    if outcome == "rolled_back" {
        let reason = failure
            .borrow_mut()
            .take()
            .unwrap_or_else(|| "commit was superseded".to_string());
        return Err(format!("move of {} failed: {}", id, reason).into());
    }

    if outcome == "unchanged" {
        let in_place = core.with_collection(|items| {
            items.get(&id).is_some_and(|item| item.partition == key)
                && items.index_in_partition(&id) == Some(index)
        });
        if !in_place {
            return Err(format!(
                "cannot place {} at {}[{}]: check the [positions] settings in project.toml",
                id, key, index
            )
            .into());
        }
    }

    let (final_index, position) = core.with_collection(|items| {
        (
            items.index_in_partition(&id).unwrap_or(index),
            items.get(&id).map(|i| i.position.value()).unwrap_or_default(),
        )
    });
    let result = MoveJson {
        id: id.to_string(),
        column: key.to_string(),
        index: final_index,
        position,
        outcome,
        renumbered: applied.get().saturating_sub(1),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if outcome == "unchanged" {
        println!("{} already at {}[{}]", result.id, result.column, result.index);
    } else {
        println!("{} -> {}[{}]", result.id, result.column, result.index);
        if result.renumbered > 0 {
            println!("  renumbered {} other item(s)", result.renumbered);
        }
    }
    Ok(())
}

fn cmd_renumber(args: RenumberArgs, start: &Path, json: bool) -> CmdResult {
    let board = load_board_from(start)?;
    let _lock = board_io::lock_board(&board.board_dir, &board.config.sync)?;
    let mut items = Collection::from_items(board_io::read_rows(&board.board_dir)?);

    let keys: Vec<PartitionKey> = match args.column {
        Some(ref column) => vec![require_column(&board, column)?],
        None => board.config.columns.iter().map(|c| c.key()).collect(),
    };
    let results: Vec<RenumberJson> = keys
        .iter()
        .map(|key| RenumberJson {
            column: key.to_string(),
            updated: renumber_partition(&mut items, key),
        })
        .collect();
    if results.iter().any(|r| r.updated > 0) {
        write_collection(&board, &items)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for r in &results {
            println!("{}: {} item(s) renumbered", r.column, r.updated);
        }
    }
    Ok(())
}

fn cmd_column_add(args: ColumnAddArgs, start: &Path) -> CmdResult {
    init::validate_column_id(&args.id)?;
    let root = board_io::discover_board(start)?;
    let board_dir = root.join(board_io::BOARD_DIR);
    let (config, mut doc) = config_io::read_config(&board_dir)?;
    if config.column(&args.id).is_some() {
        return Err(format!("column already exists: {}", args.id).into());
    }

    let column = ColumnConfig {
        id: args.id,
        name: args.name,
    };
    config_io::add_column_to_config(&mut doc, &column);
    config_io::write_config(&board_dir, &doc)?;
    println!("added column {} ({})", column.name, column.id);
    Ok(())
}
