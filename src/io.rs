use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::{SourceKind, Table};

/// A source export as read from disk: header row plus string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[cfg(test)]
impl RawTable {
    pub fn new(headers: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        }
    }
}

/// Resolves a configured source path. A `*` in the file name selects the
/// lexicographically greatest match, which for date-stamped exports is the
/// most recent one.
pub fn resolve_source_path(kind: SourceKind, path: &Path) -> Result<PathBuf> {
    let missing = || EngineError::MissingSource {
        source_kind: kind,
        path: path.to_path_buf(),
    };

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(missing)?;

    let Some((prefix, suffix)) = file_name.split_once('*') else {
        return if path.is_file() { Ok(path.to_path_buf()) } else { Err(missing()) };
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.is_dir() {
        return Err(missing());
    }

    let mut latest: Option<String> = None;
    for entry in std::fs::read_dir(&parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let matches = name.len() >= prefix.len() + suffix.len()
            && name.starts_with(prefix)
            && name.ends_with(suffix);
        if matches && latest.as_ref().map_or(true, |current| name > *current) {
            latest = Some(name);
        }
    }

    let name = latest.ok_or_else(missing)?;
    debug!(source = %kind, file = %name, "selected latest export");
    Ok(parent.join(name))
}

pub fn read_table(path: &Path) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;

    let headers = reader
        .headers()?
        .iter()
        .map(|header| header.to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        rows.push(record.iter().map(|cell| cell.to_string()).collect());
    }

    Ok(RawTable { headers, rows })
}

/// Writes `table` as `<dir>/<name>.csv` and returns the written path.
pub fn write_table(dir: &Path, table: &Table) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.csv", table.name));

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;

    Ok(path)
}
