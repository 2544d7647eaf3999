use serde::Serialize;

use crate::model::collection::Collection;
use crate::model::config::BoardConfig;
use crate::model::item::{OrderableItem, PartitionKey};

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ItemJson {
    pub id: String,
    pub column: String,
    pub position: f64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Serialize)]
pub struct ColumnJson {
    pub id: String,
    pub name: String,
    /// False for partitions that appear in items.json but not in project.toml
    pub configured: bool,
    pub items: Vec<ItemJson>,
}

#[derive(Serialize)]
pub struct BoardJson {
    pub name: String,
    pub columns: Vec<ColumnJson>,
}

#[derive(Serialize)]
pub struct MoveJson {
    pub id: String,
    pub column: String,
    pub index: usize,
    pub position: f64,
    /// confirmed, unchanged or rolled_back
    pub outcome: &'static str,
    /// Siblings repositioned alongside the moved item
    pub renumbered: usize,
}

#[derive(Serialize)]
pub struct RenumberJson {
    pub column: String,
    pub updated: usize,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub fn item_to_json(item: &OrderableItem) -> ItemJson {
    ItemJson {
        id: item.id.to_string(),
        column: item.partition.to_string(),
        position: item.position.value(),
        title: item.title.clone(),
        updated_at: item
            .updated_at
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
    }
}

/// One entry per column: configured columns in config order, then any
/// partition only items.json knows about.
fn board_columns(config: &BoardConfig, items: &Collection) -> Vec<(PartitionKey, String, bool)> {
    let mut columns: Vec<(PartitionKey, String, bool)> = config
        .columns
        .iter()
        .map(|c| (c.key(), c.name.clone(), true))
        .collect();
    for key in items.partitions() {
        if !config.has_column(&key) {
            let name = key.to_string();
            columns.push((key, name, false));
        }
    }
    columns
}

pub fn board_to_json(config: &BoardConfig, items: &Collection, only: Option<&PartitionKey>) -> BoardJson {
    let columns = board_columns(config, items)
        .into_iter()
        .filter(|(key, _, _)| only.is_none_or(|o| o == key))
        .map(|(key, name, configured)| ColumnJson {
            id: key.to_string(),
            name,
            configured,
            items: items.partition(&key).into_iter().map(item_to_json).collect(),
        })
        .collect();
    BoardJson {
        name: config.board.name.clone(),
        columns,
    }
}

// ---------------------------------------------------------------------------
// Text rendering
// ---------------------------------------------------------------------------

/// Plain-text board, one block per column, items in sibling order.
pub fn render_board(config: &BoardConfig, items: &Collection, only: Option<&PartitionKey>) -> String {
    let mut out = String::new();
    out.push_str(&config.board.name);
    out.push('\n');

    for (key, name, configured) in board_columns(config, items) {
        if only.is_some_and(|o| o != &key) {
            continue;
        }
        let siblings = items.partition(&key);
        out.push('\n');
        if configured {
            out.push_str(&format!("{} [{}] ({})\n", name, key, siblings.len()));
        } else {
            out.push_str(&format!("{} [unknown column] ({})\n", key, siblings.len()));
        }
        if siblings.is_empty() {
            out.push_str("  (empty)\n");
            continue;
        }
        let width = siblings.iter().map(|i| i.id.as_str().len()).max().unwrap_or(0);
        for item in siblings {
            out.push_str(&format!("  {:<width$}  {}\n", item.id.as_str(), item.title));
        }
    }
    out
}
