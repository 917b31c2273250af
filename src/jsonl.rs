// JSONL log operations

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One line of a collection log.
///
/// The record body lives in `data`; `deleted` marks a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Entry {
    pub fn live(id: String, updated_at: i64, data: serde_json::Value) -> Self {
        Self {
            id,
            updated_at,
            deleted: false,
            data,
        }
    }

    pub fn tombstone(id: String, updated_at: i64) -> Self {
        Self {
            id,
            updated_at,
            deleted: true,
            data: serde_json::Value::Null,
        }
    }
}

/// Append entries to a JSONL file and flush them to disk.
///
/// Callers hold the scope lock; this does no locking of its own.
pub fn append_entries(path: &Path, entries: &[Entry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open JSONL file for appending: {}", path.display()))?;

    for entry in entries {
        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
    }
    file.sync_all()?; // Ensure data is flushed to disk

    debug!(file = ?path, count = entries.len(), "Appended JSONL entries");
    Ok(())
}

/// Length of a log before an append, so the append can be undone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMark {
    path: PathBuf,
    len: Option<u64>,
}

impl LogMark {
    /// Remember how long `path` is now. A missing file is remembered as missing.
    pub fn take(path: &Path) -> Result<Self> {
        let len = match fs::metadata(path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e).with_context(|| format!("Failed to stat JSONL file: {}", path.display())),
        };
        Ok(Self {
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cut the log back to the remembered length, removing it if it did not exist
    pub fn rewind(&self) -> Result<()> {
        match self.len {
            Some(len) => {
                let file = OpenOptions::new()
                    .write(true)
                    .open(&self.path)
                    .with_context(|| format!("Failed to open JSONL file for rewind: {}", self.path.display()))?;
                file.set_len(len)?;
                file.sync_all()?;
            }
            None => match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("Failed to remove partial JSONL file"),
            },
        }
        debug!(file = ?self.path, len = ?self.len, "Rewound JSONL file");
        Ok(())
    }
}

/// Read all entries from a JSONL file, returning the latest version per ID
///
/// The entry with the highest `updated_at` wins; on a tie the later line wins.
/// Tombstones are returned too so the caller can drop them.
pub fn read_latest(path: &Path) -> Result<HashMap<String, Entry>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let file = File::open(path).context("Failed to open JSONL file")?;
    let reader = BufReader::new(file);
    let mut entries: HashMap<String, Entry> = HashMap::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(
                    file = ?path,
                    line = line_num + 1,
                    error = ?e,
                    "Failed to read line, skipping"
                );
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let entry: Entry = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(e) => {
                warn!(
                    file = ?path,
                    line = line_num + 1,
                    error = ?e,
                    "Failed to parse JSON, skipping"
                );
                continue;
            }
        };

        match entries.get(&entry.id) {
            Some(existing) if existing.updated_at > entry.updated_at => {}
            _ => {
                entries.insert(entry.id.clone(), entry);
            }
        }
    }

    debug!(file = ?path, count = entries.len(), "Loaded latest entries from JSONL");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_append_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.jsonl");

        let entry = Entry::live("2026-01-12".to_string(), 1000, json!({"count": 3}));
        append_entries(&path, &[entry]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"id\":\"2026-01-12\""));
        assert!(content.contains("\"count\":3"));
        assert!(!content.contains("deleted"));
    }

    #[test]
    fn test_read_latest_prefers_newest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.jsonl");

        append_entries(
            &path,
            &[
                Entry::live("d1".to_string(), 2000, json!({"count": 2})),
                Entry::live("d1".to_string(), 1000, json!({"count": 1})),
            ],
        )
        .unwrap();

        let entries = read_latest(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["d1"].data["count"], 2);
    }

    #[test]
    fn test_read_latest_tie_goes_to_later_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.jsonl");

        append_entries(
            &path,
            &[
                Entry::live("d1".to_string(), 1000, json!({"count": 1})),
                Entry::live("d1".to_string(), 1000, json!({"count": 2})),
            ],
        )
        .unwrap();

        let entries = read_latest(&path).unwrap();
        assert_eq!(entries["d1"].data["count"], 2);
    }

    #[test]
    fn test_read_latest_keeps_tombstones() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("alarms.jsonl");

        append_entries(
            &path,
            &[
                Entry::live("pomodoro".to_string(), 1000, json!({"fire_at": 5})),
                Entry::tombstone("pomodoro".to_string(), 1001),
            ],
        )
        .unwrap();

        let entries = read_latest(&path).unwrap();
        assert!(entries["pomodoro"].deleted);
    }

    #[test]
    fn test_rewind_drops_appended_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.jsonl");
        append_entries(&path, &[Entry::live("d1".to_string(), 1000, json!({"count": 1}))]).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let mark = LogMark::take(&path).unwrap();
        append_entries(&path, &[Entry::live("d1".to_string(), 2000, json!({"count": 2}))]).unwrap();
        mark.rewind().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(read_latest(&path).unwrap()["d1"].data["count"], 1);
    }

    #[test]
    fn test_rewind_removes_log_that_did_not_exist() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.jsonl");

        let mark = LogMark::take(&path).unwrap();
        append_entries(&path, &[Entry::live("d1".to_string(), 1000, json!({"count": 1}))]).unwrap();
        mark.rewind().unwrap();
        assert!(!path.exists());

        // Rewinding twice is harmless
        mark.rewind().unwrap();
    }

    #[test]
    fn test_read_latest_nonexistent_file() {
        let temp = TempDir::new().unwrap();
        let entries = read_latest(&temp.path().join("missing.jsonl")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_read_latest_malformed_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.jsonl");

        fs::write(
            &path,
            r#"{"id":"d1","updated_at":1000,"data":{"count":1}}
{malformed json}
{"id":"d2","updated_at":1000,"data":{"count":4}}
"#,
        )
        .unwrap();

        let entries = read_latest(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("d1"));
        assert!(entries.contains_key("d2"));
    }
}
