//! Glossary import: flat JSON objects and two-column SQLite tables.
//! A failed import returns an error and leaves the caller's glossary alone;
//! individual bad entries are skipped with a warning.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::glossary::{Glossary, GlossaryError};

/// Column-name keywords, in priority order.
const SOURCE_KEYWORDS: &[&str] = &[
    "source", "src", "original", "term", "key", "word", "english", "en", "japanese", "ja", "jp",
];
const TARGET_KEYWORDS: &[&str] = &[
    "target", "tgt", "translation", "translated", "value", "meaning", "chinese", "zh", "cn",
];

/// Fields tried, in order, when a target cell holds a JSON object.
const PREFERRED_FIELDS: &[&str] = &[
    "zh", "zh_cn", "zh-cn", "cn", "chinese", "translation", "target", "text", "value",
];

/// Load a glossary file, picking the format from the extension.
/// `.db`, `.sqlite` and `.sqlite3` are read as tables; anything else as JSON.
pub fn load_glossary_file(path: &Path) -> Result<Glossary, GlossaryError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let glossary = match ext.as_deref() {
        Some("db" | "sqlite" | "sqlite3") => import_sqlite(path, None)?,
        _ => parse_json_glossary(&std::fs::read_to_string(path)?)?,
    };
    info!(path = %path.display(), entries = glossary.len(), "glossary file imported");
    Ok(glossary)
}

/// Parse a flat `{"term": "translation", ...}` object.
pub fn parse_json_glossary(content: &str) -> Result<Glossary, GlossaryError> {
    let Value::Object(map) = serde_json::from_str::<Value>(content)? else {
        return Err(GlossaryError::UnsupportedStructure(
            "expected a JSON object of term → translation".into(),
        ));
    };

    let mut glossary = Glossary::new();
    let mut skipped = 0usize;
    for (key, value) in map {
        match value {
            Value::String(target) if !key.trim().is_empty() && !target.trim().is_empty() => {
                glossary.insert(key, target);
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "glossary entries skipped (empty or non-string)");
    }
    Ok(glossary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableColumns {
    pub source: usize,
    pub target: usize,
}

/// Find the source and target columns by name. Two-column tables fall back
/// to first = source, second = target.
pub fn identify_columns<S: AsRef<str>>(names: &[S]) -> Option<TableColumns> {
    let find = |keywords: &[&str], exclude: Option<usize>| {
        keywords.iter().find_map(|kw| {
            names
                .iter()
                .enumerate()
                .find(|(i, n)| Some(*i) != exclude && column_matches(n.as_ref(), kw))
                .map(|(i, _)| i)
        })
    };

    let source = find(SOURCE_KEYWORDS, None);
    let target = find(TARGET_KEYWORDS, source);

    match (source, target, names.len()) {
        (Some(source), Some(target), _) => Some(TableColumns { source, target }),
        (Some(source), None, 2) => Some(TableColumns { source, target: 1 - source }),
        (None, Some(target), 2) => Some(TableColumns { source: 1 - target, target }),
        (None, None, 2) => Some(TableColumns { source: 0, target: 1 }),
        _ => None,
    }
}

fn column_matches(name: &str, keyword: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower == keyword {
        return true;
    }
    // Short keywords ("en", "zh") must be whole tokens: "content" is not "en".
    if lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == keyword)
    {
        return true;
    }
    keyword.len() >= 4 && lower.contains(keyword)
}

/// Pull the translation out of a target cell. Cells holding a JSON object
/// yield the first preferred field present, else the first string field.
pub fn extract_target(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            let non_empty = |v: &Value| {
                v.as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            return PREFERRED_FIELDS
                .iter()
                .find_map(|field| map.get(*field).and_then(non_empty))
                .or_else(|| map.values().find_map(non_empty));
        }
    }
    Some(trimmed.to_string())
}

/// Build a glossary from rows of a table with the given column names.
pub fn import_table<S, I>(names: &[S], rows: I) -> Result<Glossary, GlossaryError>
where
    S: AsRef<str>,
    I: IntoIterator<Item = Vec<Option<String>>>,
{
    let columns = identify_columns(names).ok_or_else(|| {
        GlossaryError::UnsupportedStructure(
            "could not identify source and target columns".into(),
        )
    })?;

    let mut glossary = Glossary::new();
    let mut skipped = 0usize;
    for row in rows {
        let source = row
            .get(columns.source)
            .and_then(|c| c.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let target = row
            .get(columns.target)
            .and_then(|c| c.as_deref())
            .and_then(extract_target);
        match (source, target) {
            (Some(source), Some(target)) => glossary.insert(source, target),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "table rows skipped (missing source or target)");
    }
    Ok(glossary)
}

/// Import from a SQLite database file, opened read-only.
pub fn import_sqlite(path: &Path, table: Option<&str>) -> Result<Glossary, GlossaryError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    import_sqlite_conn(&conn, table)
}

/// Import from `table`, or from the first table (by name) whose columns can
/// be identified.
pub fn import_sqlite_conn(conn: &Connection, table: Option<&str>) -> Result<Glossary, GlossaryError> {
    let tables: Vec<String> = match table {
        Some(name) => vec![name.to_string()],
        None => {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            names
        }
    };

    for name in &tables {
        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", name.replace('"', "\"\"")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        if identify_columns(&columns).is_none() {
            debug!(table = %name, ?columns, "table has no recognizable term columns");
            continue;
        }

        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(cell_text))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        info!(table = %name, rows = rows.len(), "importing glossary table");
        return import_table(&columns, rows);
    }

    Err(GlossaryError::UnsupportedStructure(format!(
        "no table with source/target columns among {tables:?}"
    )))
}

fn cell_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}
