use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::models::MediaKind;

pub(crate) mod engine;
pub(crate) mod item;
pub(crate) mod progress;
pub(crate) mod registry;
pub(crate) mod symlink;

/// Media file extensions considered when scanning for broken symlinks.
pub(crate) const MEDIA_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v",
];

/// Inner concurrency cap for episodes within one series. Kept below the
/// outer cap so one series cannot saturate the backend with nested
/// parallel requests.
pub(crate) const MAX_EPISODE_CONCURRENCY: usize = 3;

/// Behaviour knobs for one reconciliation run.
#[derive(Debug, Clone)]
pub(crate) struct RunOptions {
    /// Maximum number of items reconciled concurrently.
    pub concurrent_limit: usize,
    /// Courtesy delay between operations against the backend.
    pub request_delay: Duration,
    /// When set, no mutating call is issued anywhere in the run.
    pub dry_run: bool,
    /// Whether symlink recovery may add missing items to the collection.
    pub add_missing_media: bool,
    /// Quality profile assigned to items added by symlink recovery.
    pub quality_profile_id: i32,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            concurrent_limit: 5,
            request_delay: Duration::ZERO,
            dry_run: false,
            add_missing_media: false,
            quality_profile_id: 12,
        }
    }
}

/// An opaque series or movie ID consumed by one item reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkItem(pub i32);

/// Run-scoped ID → display-name table. Built from the inventory listing
/// before dispatch and owned by the engine for the duration of one run;
/// symlink recovery extends it when it adds an item to the collection.
#[derive(Default)]
pub(crate) struct NameTable {
    names: RwLock<HashMap<(MediaKind, i32), String>>,
}

impl NameTable {
    pub(crate) fn insert(&self, kind: MediaKind, id: i32, name: &str) {
        self.names.write().insert((kind, id), name.to_string());
    }

    /// Display name for an item, with a generic fallback for IDs that
    /// were never listed.
    pub(crate) fn display_name(&self, kind: MediaKind, id: i32) -> String {
        if let Some(name) = self.names.read().get(&(kind, id)) {
            return name.clone();
        }
        match kind {
            MediaKind::Series => format!("Series {id}"),
            MediaKind::Movie => format!("Movie {id}"),
        }
    }
}

/// Cooperative, best-effort cancellation signal scoped to one run.
/// Workers check it before starting a unit of work; anything already
/// mid-flight finishes naturally.
#[derive(Clone, Default)]
pub(crate) struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        CancelToken::default()
    }

    pub(crate) fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
