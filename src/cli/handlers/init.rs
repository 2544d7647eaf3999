use std::fs;

use crate::cli::commands::InitArgs;
use crate::io::board_io::{self, BOARD_DIR, CONFIG_FILE};
use crate::io::config_io::config_template;
use crate::model::config::ColumnConfig;

const DEFAULT_COLUMNS: [(&str, &str); 3] = [
    ("not_started", "Not Started"),
    ("in_progress", "In Progress"),
    ("done", "Done"),
];

/// Column ids double as partition keys in items.json: lowercase ascii,
/// digits, `-` and `_`.
pub(crate) fn validate_column_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("column id cannot be empty".to_string());
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(format!(
            "invalid column id \"{}\": use lowercase with hyphens or underscores (e.g. \"in_review\")",
            id
        ));
    }
    Ok(())
}

/// Infer a board name from a directory name: split on hyphens, title-case.
fn infer_name(dir_name: &str) -> String {
    dir_name
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pair up the flat `--column id name` values clap produces.
fn parse_column_pairs(args: &[String]) -> Vec<ColumnConfig> {
    args.chunks_exact(2)
        .map(|pair| ColumnConfig {
            id: pair[0].clone(),
            name: pair[1].clone(),
        })
        .collect()
}

pub fn cmd_init(args: InitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let board_dir = cwd.join(BOARD_DIR);

    if board_dir.join(CONFIG_FILE).exists() && !args.force {
        return Err("board already exists in ./board/ (use --force to reinitialize)".into());
    }

    if let Some(parent) = cwd.parent()
        && let Ok(parent_root) = board_io::discover_board(parent)
    {
        eprintln!(
            "Note: parent board found at {}/",
            parent_root.join(BOARD_DIR).display()
        );
    }

    let mut columns = parse_column_pairs(&args.column);
    if columns.is_empty() {
        columns = DEFAULT_COLUMNS
            .iter()
            .map(|(id, name)| ColumnConfig {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
    }
    let mut seen = std::collections::HashSet::new();
    for column in &columns {
        validate_column_id(&column.id)?;
        if !seen.insert(column.id.as_str()) {
            return Err(format!("duplicate column id \"{}\"", column.id).into());
        }
    }

    let name = args.name.unwrap_or_else(|| {
        cwd.file_name()
            .and_then(|n| n.to_str())
            .map(infer_name)
            .unwrap_or_else(|| "Untitled".to_string())
    });

    fs::create_dir_all(&board_dir)?;
    fs::write(board_dir.join(CONFIG_FILE), config_template(&name, &columns))?;
    board_io::write_rows(&board_dir, &[])?;

    println!("Initialized board: {}", name);
    for column in &columns {
        println!("  column: {} ({})", column.name, column.id);
    }
    Ok(())
}
