use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::model::config::BoardConfig;
use crate::model::item::OrderableItem;

/// Structured result from `bsync check`, suitable for --json output.
#[derive(Debug, Default, Serialize)]
pub struct CheckResult {
    pub valid: bool,
    pub errors: Vec<CheckError>,
    pub warnings: Vec<CheckWarning>,
}

/// Something that breaks ordering and must be fixed by hand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CheckError {
    /// Item sits in a column the config does not define
    #[serde(rename = "unknown_column")]
    UnknownColumn { item_id: String, column: String },
    /// Position is NaN or infinite
    #[serde(rename = "non_finite_position")]
    NonFinitePosition { item_id: String, column: String },
    /// The same id appears in more than one row
    #[serde(rename = "duplicate_id")]
    DuplicateId { item_id: String, count: usize },
}

/// Something `bsync renumber` or the next drop will repair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CheckWarning {
    /// Two or more siblings share a position; order falls back to id
    #[serde(rename = "duplicate_position")]
    DuplicatePosition {
        column: String,
        position: f64,
        item_ids: Vec<String>,
    },
}

/// Validate the raw rows of a board file. Read-only.
///
/// Takes rows rather than a `Collection` so duplicate ids are still visible.
pub fn check_board(config: &BoardConfig, rows: &[OrderableItem]) -> CheckResult {
    let mut result = CheckResult::default();

    let mut id_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        *id_counts.entry(row.id.as_str()).or_default() += 1;
    }
    for (id, count) in id_counts {
        if count > 1 {
            result.errors.push(CheckError::DuplicateId {
                item_id: id.to_string(),
                count,
            });
        }
    }

    // column -> position bits -> ids, so -0.0 and 0.0 stay apart like total_cmp
    let mut positions: BTreeMap<&str, HashMap<u64, Vec<&OrderableItem>>> = BTreeMap::new();
    for row in rows {
        if !config.has_column(&row.partition) {
            result.errors.push(CheckError::UnknownColumn {
                item_id: row.id.to_string(),
                column: row.partition.to_string(),
            });
        }
        if !row.position.is_finite() {
            result.errors.push(CheckError::NonFinitePosition {
                item_id: row.id.to_string(),
                column: row.partition.to_string(),
            });
            continue;
        }
        positions
            .entry(row.partition.as_str())
            .or_default()
            .entry(row.position.value().to_bits())
            .or_default()
            .push(row);
    }

    for (column, by_position) in positions {
        let mut clashes: Vec<Vec<&OrderableItem>> = by_position
            .into_values()
            .filter(|items| items.len() > 1)
            .collect();
        clashes.sort_by(|a, b| a[0].position.total_cmp(&b[0].position));
        for mut items in clashes {
            items.sort_by(|a, b| a.order_cmp(b));
            result.warnings.push(CheckWarning::DuplicatePosition {
                column: column.to_string(),
                position: items[0].position.value(),
                item_ids: items.iter().map(|i| i.id.to_string()).collect(),
            });
        }
    }

    result.valid = result.errors.is_empty();
    result
}
