use std::fs;
use std::path::Path;

use crate::io::board_io::{BoardError, CONFIG_FILE, atomic_write};
use crate::model::config::{BoardConfig, ColumnConfig};

/// Read project.toml, returning both the parsed config and the raw
/// toml_edit document for round-trip-safe edits.
pub fn read_config(board_dir: &Path) -> Result<(BoardConfig, toml_edit::DocumentMut), BoardError> {
    let path = board_dir.join(CONFIG_FILE);
    let text = fs::read_to_string(&path).map_err(|source| BoardError::Read {
        path: path.clone(),
        source,
    })?;
    let config: BoardConfig = toml::from_str(&text)?;
    let doc: toml_edit::DocumentMut = text.parse()?;
    Ok((config, doc))
}

/// Write the config document back, preserving comments and layout.
pub fn write_config(board_dir: &Path, doc: &toml_edit::DocumentMut) -> Result<(), BoardError> {
    let path = board_dir.join(CONFIG_FILE);
    atomic_write(&path, doc.to_string().as_bytes()).map_err(|source| BoardError::Write { path, source })
}

/// Append a `[[columns]]` entry.
pub fn add_column_to_config(doc: &mut toml_edit::DocumentMut, column: &ColumnConfig) {
    if !doc.contains_key("columns") {
        doc["columns"] = toml_edit::Item::ArrayOfTables(toml_edit::ArrayOfTables::new());
    }
    if let Some(columns) = doc["columns"].as_array_of_tables_mut() {
        let mut table = toml_edit::Table::new();
        table["id"] = toml_edit::value(&column.id);
        table["name"] = toml_edit::value(&column.name);
        columns.push(table);
    }
}

/// Starting project.toml for `bsync init`.
pub fn config_template(name: &str, columns: &[ColumnConfig]) -> String {
    let mut doc = toml_edit::DocumentMut::new();
    let mut board = toml_edit::Table::new();
    board["name"] = toml_edit::value(name);
    doc["board"] = toml_edit::Item::Table(board);
    for column in columns {
        add_column_to_config(&mut doc, column);
    }

    let mut out = doc.to_string();
    out.push_str(
        "\n# Gap between neighbours for appended items, and the position of the\n\
         # first item in an empty column.\n\
         [positions]\n\
         step = 1.0\n\
         baseline = 1.0\n\
         min_gap = 1e-9\n\
         \n\
         [sync]\n\
         lock_timeout_ms = 5000\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> &'static str {
        r#"[board]
name = "Team"

# order matters: columns render left to right
[[columns]]
id = "todo"
name = "To Do"

[[columns]]
id = "done"
name = "Done"
"#
    }

    #[test]
    fn round_trip_preserves_text() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), sample_config()).unwrap();

        let (config, doc) = read_config(tmp.path()).unwrap();
        assert_eq!(config.columns.len(), 2);
        write_config(tmp.path(), &doc).unwrap();

        let written = fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(written, sample_config());
    }

    #[test]
    fn add_column_keeps_comments() {
        let mut doc: toml_edit::DocumentMut = sample_config().parse().unwrap();
        add_column_to_config(
            &mut doc,
            &ColumnConfig {
                id: "review".into(),
                name: "In Review".into(),
            },
        );
        let text = doc.to_string();
        assert!(text.contains("# order matters"));
        let config: BoardConfig = toml::from_str(&text).unwrap();
        assert_eq!(config.columns[2].id, "review");
        assert_eq!(config.columns[2].name, "In Review");
    }

    #[test]
    fn template_parses_with_defaults() {
        let columns = vec![ColumnConfig {
            id: "todo".into(),
            name: "To \"Do\"".into(),
        }];
        let text = config_template("My Board", &columns);
        let config: BoardConfig = toml::from_str(&text).unwrap();
        assert_eq!(config.board.name, "My Board");
        assert_eq!(config.columns[0].name, "To \"Do\"");
        assert_eq!(config.positions, crate::ops::position::PositionPolicy::default());
        assert_eq!(config.sync.lock_timeout_ms, 5000);
    }

    #[test]
    fn missing_config_is_a_read_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(read_config(tmp.path()), Err(BoardError::Read { .. })));
    }
}
