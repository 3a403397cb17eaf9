use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which kind of media a backend manages.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MediaKind {
    Series,
    Movie,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Series => write!(f, "series"),
            MediaKind::Movie => write!(f, "movie"),
        }
    }
}

/// A TV series as reported by Sonarr.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct Series {
    pub id: i32,
    pub title: String,
    pub tvdb_id: i32,
    pub monitored: bool,
    pub quality_profile_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_folder_path: Option<String>,
}

/// A movie as reported by Radarr.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct Movie {
    pub id: i32,
    pub title: String,
    pub year: i32,
    pub tmdb_id: i32,
    pub has_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie_file_id: Option<i32>,
    pub monitored: bool,
    pub quality_profile_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_folder_path: Option<String>,
}

/// A single episode of a series.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct Episode {
    pub id: i32,
    pub series_id: i32,
    pub season_number: i32,
    pub episode_number: i32,
    pub title: String,
    pub has_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_file_id: Option<i32>,
}

/// A file record held by the backend for an episode or a movie.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct MediaFile {
    pub id: i32,
    pub path: String,
}

/// A backend-configured filesystem root that media lives under.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RootFolder {
    pub id: i32,
    pub path: String,
}

/// A quality profile configured on the backend.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct QualityProfile {
    pub id: i32,
    pub name: String,
}

/// Counters for one cleanup run. Merging is plain addition, so partial
/// results from concurrent workers can be folded in any completion order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CleanupStats {
    pub checked: u64,
    pub missing_files: u64,
    pub deleted_records: u64,
    pub errors: u64,
}

impl CleanupStats {
    /// Folds another set of counters into this one.
    pub(crate) fn merge(&mut self, other: &CleanupStats) {
        self.checked += other.checked;
        self.missing_files += other.missing_files;
        self.deleted_records += other.deleted_records;
        self.errors += other.errors;
    }
}

/// Whether a run was allowed to mutate the backend.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunType {
    #[serde(rename = "dry-run")]
    DryRun,
    #[serde(rename = "real-run")]
    RealRun,
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunType::DryRun => write!(f, "dry-run"),
            RunType::RealRun => write!(f, "real-run"),
        }
    }
}

/// One missing-or-broken file discovered during a run. Created once per
/// detected anomaly and never mutated afterwards; deduplication happens
/// at report-build time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MissingFileEntry {
    pub media_type: MediaKind,
    pub media_name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub episode_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub season: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub episode: Option<i32>,
    pub file_path: String,
    /// Backend file record ID. `0` means the anomaly was discovered by the
    /// symlink scan and has no concrete record behind it.
    pub file_id: i32,
    pub processed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub added_to_collection: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tmdb_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tvdb_id: Option<i32>,
}

impl MissingFileEntry {
    /// The external catalog ID carried by this entry, if any.
    pub(crate) fn external_id(&self) -> Option<i32> {
        match self.media_type {
            MediaKind::Movie => self.tmdb_id,
            MediaKind::Series => self.tvdb_id,
        }
    }
}

/// The deduplicated report handed to the report writer at the end of a run.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MissingFilesReport {
    pub generated_at: DateTime<Utc>,
    pub run_type: RunType,
    pub service_type: String,
    pub total_missing: usize,
    pub missing_files: Vec<MissingFileEntry>,
}

/// Aggregate outcome of one cleanup run.
#[derive(Debug, Clone)]
pub(crate) struct CleanupResult {
    pub stats: CleanupStats,
    pub messages: Vec<String>,
    pub success: bool,
    pub report: MissingFilesReport,
}

static TMDB_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[tmdb-(\d+)\]").unwrap());
static TVDB_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[tvdb-(\d+)\]").unwrap());

/// Extracts a `[tmdb-<digits>]` tag from a path. Returns `None` when the
/// tag is absent or the digits overflow an `i32`.
pub(crate) fn tmdb_id_from_path(path: &str) -> Option<i32> {
    TMDB_TAG
        .captures(path)
        .and_then(|caps| caps[1].parse().ok())
}

/// Extracts a `[tvdb-<digits>]` tag from a path.
pub(crate) fn tvdb_id_from_path(path: &str) -> Option<i32> {
    TVDB_TAG
        .captures(path)
        .and_then(|caps| caps[1].parse().ok())
}
