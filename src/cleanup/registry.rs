use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;

use crate::models::{MediaKind, MissingFileEntry, MissingFilesReport, RunType};

/// Key under which colliding report entries are merged. Entries carrying
/// an external catalog ID collapse on it; everything else collapses on
/// the file path.
#[derive(Debug, PartialEq, Eq, Hash)]
enum DedupKey {
    External(MediaKind, i32),
    Path(MediaKind, String),
}

fn dedup_key(entry: &MissingFileEntry) -> DedupKey {
    match entry.external_id() {
        Some(id) if id > 0 => DedupKey::External(entry.media_type, id),
        _ => DedupKey::Path(entry.media_type, entry.file_path.clone()),
    }
}

/// Thread-safe accumulator for missing-file entries. Appends are
/// unconditional — the same file may legitimately be observed by both the
/// direct reconciler and the symlink recoverer in one run — and
/// deduplication happens only when the report is built.
#[derive(Default)]
pub(crate) struct MissingFileRegistry {
    entries: Mutex<Vec<MissingFileEntry>>,
}

impl MissingFileRegistry {
    pub(crate) fn new() -> Self {
        MissingFileRegistry::default()
    }

    /// Records one detected anomaly, duplicates included.
    pub(crate) fn record(&self, entry: MissingFileEntry) {
        self.entries.lock().push(entry);
    }

    /// Builds the deduplicated report for this run.
    pub(crate) fn build_report(&self, service_type: &str, run_type: RunType) -> MissingFilesReport {
        let entries = self.entries.lock().clone();
        let deduplicated = deduplicate(entries);

        MissingFilesReport {
            generated_at: Utc::now(),
            run_type,
            service_type: service_type.to_string(),
            total_missing: deduplicated.len(),
            missing_files: deduplicated,
        }
    }
}

/// Merge rule for colliding entries: a nonzero file-record ID beats the
/// symlink-scan placeholder (`0`); otherwise the later processing
/// timestamp wins. The survivors are sorted by processing timestamp so
/// report output is deterministic.
fn deduplicate(entries: Vec<MissingFileEntry>) -> Vec<MissingFileEntry> {
    let mut best: HashMap<DedupKey, MissingFileEntry> = HashMap::with_capacity(entries.len());

    for entry in entries {
        let key = dedup_key(&entry);
        match best.get(&key) {
            None => {
                best.insert(key, entry);
            }
            Some(existing) => {
                let replace = if entry.file_id > 0 && existing.file_id == 0 {
                    true
                } else if entry.file_id == 0 && existing.file_id > 0 {
                    false
                } else {
                    entry.processed_at > existing.processed_at
                };
                if replace {
                    best.insert(key, entry);
                }
            }
        }
    }

    let mut deduplicated: Vec<MissingFileEntry> = best.into_values().collect();
    deduplicated.sort_by_key(|entry| entry.processed_at);
    deduplicated
}
