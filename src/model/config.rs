use serde::{Deserialize, Serialize};

use crate::ops::position::PositionPolicy;

use super::item::PartitionKey;

/// Configuration from board/project.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    pub board: BoardInfo,
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub positions: PositionPolicy,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardInfo {
    pub name: String,
}

/// A status column. Its `id` is the partition key of the items in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub id: String,
    pub name: String,
}

impl ColumnConfig {
    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(self.id.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long a writer waits for board/.lock before giving up
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl BoardConfig {
    pub fn column(&self, id: &str) -> Option<&ColumnConfig> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn has_column(&self, key: &PartitionKey) -> bool {
        self.column(key.as_str()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: BoardConfig = toml::from_str("[board]\nname = \"Team\"\n").unwrap();
        assert_eq!(config.board.name, "Team");
        assert!(config.columns.is_empty());
        assert_eq!(config.positions, PositionPolicy::default());
        assert_eq!(config.sync.lock_timeout_ms, 5000);
    }

    #[test]
    fn full_config() {
        let text = r#"
[board]
name = "Team"

[[columns]]
id = "not_started"
name = "Not Started"

[[columns]]
id = "done"
name = "Done"

[positions]
step = 10.0
baseline = 0.0

[sync]
lock_timeout_ms = 250
"#;
        let config: BoardConfig = toml::from_str(text).unwrap();
        assert_eq!(config.columns.len(), 2);
        assert!(config.has_column(&PartitionKey::from("done")));
        assert!(!config.has_column(&PartitionKey::from("doing")));
        assert_eq!(config.positions.step, 10.0);
        assert_eq!(config.positions.baseline, 0.0);
        assert_eq!(config.positions.min_gap, PositionPolicy::default().min_gap);
        assert_eq!(config.sync.lock_timeout_ms, 250);
    }
}
