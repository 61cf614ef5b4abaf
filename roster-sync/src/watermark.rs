//! Watermark store: the last processed directory instant per unit.
//!
//! One record per line, `<unit key><separator><timestamp>`. The timestamp is
//! the last field, so keys may themselves contain the separator. Writes use
//! an atomic `.tmp` + rename.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use roster_core::{DirectoryTimestamp, UnitKey};

use crate::error::{io_err, SyncError};

pub type Watermarks = BTreeMap<UnitKey, DirectoryTimestamp>;

/// A line that could not be parsed; skipped, so that unit is rescanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line: usize,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatermarkFile {
    pub entries: Watermarks,
    pub malformed: Vec<MalformedLine>,
}

/// Load the watermark table. A missing file is an empty table.
pub fn load_at(path: &Path, separator: &str) -> Result<WatermarkFile, SyncError> {
    if !path.exists() {
        debug!(path = %path.display(), "no watermark file; full scan for every unit");
        return Ok(WatermarkFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(parse(&contents, separator))
}

pub fn parse(contents: &str, separator: &str) -> WatermarkFile {
    let mut file = WatermarkFile::default();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = line
            .rsplit_once(separator)
            .filter(|(key, _)| !key.trim().is_empty())
            .and_then(|(key, ts)| {
                ts.parse::<DirectoryTimestamp>()
                    .ok()
                    .map(|ts| (UnitKey::from(key.trim()), ts))
            });
        match parsed {
            Some((key, ts)) => {
                advance(&mut file.entries, key, ts);
            }
            None => {
                file.malformed.push(MalformedLine {
                    line: index + 1,
                    content: line.to_string(),
                });
            }
        }
    }
    file
}

pub fn render(entries: &Watermarks, separator: &str) -> String {
    entries
        .iter()
        .map(|(key, ts)| format!("{key}{separator}{ts}\n"))
        .collect()
}

/// Save the table atomically: write `<path>.tmp`, then rename over `<path>`.
pub fn save_at(path: &Path, separator: &str, entries: &Watermarks) -> Result<(), SyncError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, render(entries, separator)).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    debug!(path = %path.display(), units = entries.len(), "watermarks saved");
    Ok(())
}

/// Record `ts` for `key` unless a later instant is already stored.
pub fn advance(entries: &mut Watermarks, key: UnitKey, ts: DirectoryTimestamp) {
    let slot = entries.entry(key).or_insert(ts);
    if ts > *slot {
        *slot = ts;
    }
}
