//! Normalisation of owner/item rows read from a CSV file.
//!
//! Reading the file is the caller's job; this module only maps a header→value row onto a
//! [`CsvRow`], accepting the configured column aliases.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::config::CsvColumns;
use crate::model::ItemKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub owner_login: String,
    pub item_id: String,
    pub kind: ItemKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {index} is missing required columns: {}", .missing.join(", "))]
pub struct RowError {
    pub index: usize,
    pub missing: Vec<String>,
}

fn web_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^https?:").expect("static pattern"))
}

/// Item type from an explicit type column, or guessed from a path/URL column.
pub fn infer_kind(value: &str) -> ItemKind {
    let value = value.trim();
    match value {
        "file" => ItemKind::File,
        "folder" => ItemKind::Folder,
        "web_link" => ItemKind::WebLink,
        _ if web_link_pattern().is_match(value) => ItemKind::WebLink,
        _ if value.ends_with('/') => ItemKind::Folder,
        _ => ItemKind::File,
    }
}

/// First alias present in `row` with a non-empty value.
fn pick<'a>(row: &'a HashMap<String, String>, aliases: &[String]) -> Option<&'a str> {
    aliases
        .iter()
        .filter_map(|alias| row.get(alias))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

fn describe(aliases: &[String]) -> String {
    aliases
        .iter()
        .map(|a| format!("\"{a}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Maps one CSV record onto a [`CsvRow`].
///
/// Returns `Ok(None)` for a row whose values are all empty.
pub fn normalize_row(
    index: usize,
    row: &HashMap<String, String>,
    columns: &CsvColumns,
) -> Result<Option<CsvRow>, RowError> {
    if row.values().all(|v| v.trim().is_empty()) {
        return Ok(None);
    }

    let owner = pick(row, &columns.owner_login);
    let item = pick(row, &columns.item_id);
    let kind = pick(row, &columns.item_type);

    match (owner, item, kind) {
        (Some(owner), Some(item), Some(kind)) => Ok(Some(CsvRow {
            owner_login: owner.to_string(),
            item_id: item.to_string(),
            kind: infer_kind(kind),
        })),
        _ => {
            let mut missing = Vec::new();
            if owner.is_none() {
                missing.push(describe(&columns.owner_login));
            }
            if item.is_none() {
                missing.push(describe(&columns.item_id));
            }
            if kind.is_none() {
                missing.push(describe(&columns.item_type));
            }
            Err(RowError { index, missing })
        }
    }
}
