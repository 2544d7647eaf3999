use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque item identifier (task id, subtask id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        ItemId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

/// The bucket an item is ordered within: a status column on the board,
/// or the owning task for a subtask list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(pub String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self {
        PartitionKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        PartitionKey(s.to_string())
    }
}

/// Fractional rank within a partition. Compared with `f64::total_cmp` so
/// the order is total even for values a broken store may hand us.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(pub f64);

impl Position {
    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    pub fn total_cmp(&self, other: &Position) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task or subtask as seen by the ordering core.
///
/// Only `partition` and `position` are ever written by the core; the rest is
/// payload owned by the CRUD layer and carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderableItem {
    pub id: ItemId,
    pub partition: PartitionKey,
    pub position: Position,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    /// Set by the persistence layer on every durable write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderableItem {
    pub fn new(
        id: impl Into<String>,
        partition: impl Into<String>,
        position: f64,
        title: impl Into<String>,
    ) -> Self {
        OrderableItem {
            id: ItemId(id.into()),
            partition: PartitionKey(partition.into()),
            position: Position(position),
            title: title.into(),
            payload: serde_json::Value::Null,
            updated_at: None,
        }
    }

    /// Sibling order: position ascending, ties broken by id.
    pub fn order_cmp(&self, other: &OrderableItem) -> Ordering {
        self.position
            .total_cmp(&other.position)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// True when partition or position differ (payload is ignored).
    pub fn placement_differs(&self, other: &OrderableItem) -> bool {
        self.partition != other.partition || self.position.total_cmp(&other.position) != Ordering::Equal
    }
}
