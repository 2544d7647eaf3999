use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bsync", about = concat!("bsync v", env!("CARGO_PKG_VERSION"), " - drag-and-drop ordering for a shared board"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different board directory
    #[arg(short = 'C', long = "board-dir", global = true)]
    pub board_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new board in the current directory
    Init(InitArgs),
    /// List items by column
    List(ListArgs),
    /// Add an item at the bottom of a column
    Add(AddArgs),
    /// Delete an item
    Rm(RmArgs),
    /// Move an item within or across columns
    Mv(MvArgs),
    /// Rewrite positions of a column to 0, 1, 2, ...
    Renumber(RenumberArgs),
    /// Validate board integrity
    Check,
    /// Column management
    Column(ColumnCmd),
    /// Print the board again whenever items.json changes
    Watch(WatchArgs),
}

// ---------------------------------------------------------------------------
// Init args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct InitArgs {
    /// Board name (default: inferred from directory name)
    #[arg(long)]
    pub name: Option<String>,
    /// Create a column: --column <id> "name" (repeatable)
    #[arg(long, num_args = 2, value_names = ["ID", "NAME"], action = clap::ArgAction::Append)]
    pub column: Vec<String>,
    /// Reinitialize even if board/ already exists
    #[arg(long)]
    pub force: bool,
}

// ---------------------------------------------------------------------------
// Read command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct ListArgs {
    /// Column to list (default: all columns)
    pub column: Option<String>,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Exit after this many refreshes (default: run until interrupted)
    #[arg(long)]
    pub count: Option<usize>,
}

// ---------------------------------------------------------------------------
// Write command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct AddArgs {
    /// Column ID
    pub column: String,
    /// Item title
    pub title: String,
    /// Explicit item ID (default: next T-<n>)
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args)]
pub struct RmArgs {
    /// Item ID
    pub id: String,
}

#[derive(Args)]
pub struct MvArgs {
    /// Item ID
    pub id: String,
    /// Target column ID
    pub column: String,
    /// Index among the other items of the column (0-indexed, default: bottom)
    pub index: Option<usize>,
    /// Place directly after this item instead of at an index
    #[arg(long, conflicts_with = "index")]
    pub after: Option<String>,
}

#[derive(Args)]
pub struct RenumberArgs {
    /// Column to renumber (default: all columns)
    pub column: Option<String>,
}

// ---------------------------------------------------------------------------
// Column subcommands
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct ColumnCmd {
    #[command(subcommand)]
    pub action: ColumnAction,
}

#[derive(Subcommand)]
pub enum ColumnAction {
    /// Append a column to project.toml
    Add(ColumnAddArgs),
}

#[derive(Args)]
pub struct ColumnAddArgs {
    /// Column ID (partition key)
    pub id: String,
    /// Display name
    pub name: String,
}
