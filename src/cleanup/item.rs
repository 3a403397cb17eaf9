use std::thread;

use chrono::Utc;
use log::{debug, info, warn};

use crate::backend::{BackendError, MediaBackend};
use crate::cleanup::progress::ProgressSink;
use crate::cleanup::registry::MissingFileRegistry;
use crate::cleanup::{CancelToken, MAX_EPISODE_CONCURRENCY, NameTable, RunOptions};
use crate::fsprobe::FileSystemProbe;
use crate::models::{CleanupStats, Episode, MediaKind, MissingFileEntry};

/// Reconciles one work item — a movie, or a series cascading to its
/// episodes — against the filesystem. Episode-level work fans out to a
/// secondary bounded pool.
pub(crate) struct ItemReconciler<'a> {
    pub backend: &'a dyn MediaBackend,
    pub probe: &'a dyn FileSystemProbe,
    pub registry: &'a MissingFileRegistry,
    pub names: &'a NameTable,
    pub progress: &'a dyn ProgressSink,
    pub options: &'a RunOptions,
    pub cancel: &'a CancelToken,
}

impl ItemReconciler<'_> {
    /// Checks a single movie's file record against disk. A fetch failure
    /// for the movie itself propagates to the aggregator; everything past
    /// that point degrades to counted statistics.
    pub(crate) fn reconcile_movie(&self, movie_id: i32) -> Result<CleanupStats, BackendError> {
        let mut stats = CleanupStats::default();

        debug!("Fetching movie {}...", movie_id);
        let movie = self.backend.get_movie(movie_id)?;

        let file_id = match movie.movie_file_id {
            Some(file_id) if movie.has_file => file_id,
            _ => {
                debug!("  Movie {} has no file reference", movie_id);
                return Ok(stats);
            }
        };

        stats.checked += 1;

        let movie_file = match self.backend.get_movie_file(file_id) {
            Ok(file) => file,
            Err(err) if err.is_not_found() => {
                self.progress
                    .note(&format!("Movie file {file_id} already deleted or not found"));
                return Ok(stats);
            }
            Err(err) => {
                warn!("    Failed to get movie file {}: {}", file_id, err);
                stats.errors += 1;
                return Ok(stats);
            }
        };

        if movie_file.path.is_empty() {
            warn!("    No file path found for movie file {}", file_id);
            return Ok(stats);
        }

        if self.probe.file_exists(&movie_file.path) {
            debug!("    File exists: {}", movie_file.path);
            return Ok(stats);
        }

        stats.missing_files += 1;
        self.progress.missing_file(&movie_file.path);

        self.registry.record(MissingFileEntry {
            media_type: MediaKind::Movie,
            media_name: self.names.display_name(MediaKind::Movie, movie.id),
            episode_name: None,
            season: None,
            episode: None,
            file_path: movie_file.path.clone(),
            file_id,
            processed_at: Utc::now(),
            added_to_collection: None,
            tmdb_id: (movie.tmdb_id > 0).then_some(movie.tmdb_id),
            tvdb_id: None,
        });

        if self.options.dry_run {
            info!("    DRY RUN: would delete movie file record {}", file_id);
            return Ok(stats);
        }

        info!("    Deleting movie file record {}...", file_id);
        if let Err(err) = self.backend.delete_movie_file(file_id) {
            self.progress
                .report_error(&format!("Failed to delete movie file record {file_id}: {err}"));
            stats.errors += 1;
            return Ok(stats);
        }

        stats.deleted_records += 1;
        self.progress.deleted_movie_record(file_id);

        // Best-effort status correction; modern backends auto-correct on
        // record deletion, so a failure here is not counted.
        if let Err(err) = self.backend.update_movie(&movie) {
            debug!("    Status update for movie {} failed: {}", movie.id, err);
        }

        Ok(stats)
    }

    /// Checks every episode of a series that claims to have a file,
    /// fanning out to a pool capped at `min(outer, 3)`.
    pub(crate) fn reconcile_series(&self, series_id: i32) -> Result<CleanupStats, BackendError> {
        let mut stats = CleanupStats::default();

        debug!("Fetching episodes for series {}...", series_id);
        let episodes = self.backend.list_episodes(series_id)?;
        if episodes.is_empty() {
            debug!("  No episodes found for series {}", series_id);
            return Ok(stats);
        }

        let with_files: Vec<Episode> = episodes
            .into_iter()
            .filter(|ep| ep.has_file && ep.episode_file_id.is_some())
            .collect();
        if with_files.is_empty() {
            return Ok(stats);
        }

        let workers = self
            .options
            .concurrent_limit
            .min(MAX_EPISODE_CONCURRENCY)
            .min(with_files.len())
            .max(1);

        let (work_tx, work_rx) = flume::bounded(with_files.len());
        for episode in with_files.iter().cloned() {
            let _ = work_tx.send(episode);
        }
        drop(work_tx);

        let (result_tx, result_rx) = flume::bounded::<CleanupStats>(with_files.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(episode) = work_rx.recv() {
                        if self.cancel.is_cancelled() {
                            continue;
                        }
                        let _ = result_tx.send(self.check_episode(&episode));
                        if !self.options.request_delay.is_zero() {
                            thread::sleep(self.options.request_delay);
                        }
                    }
                });
            }
            drop(result_tx);

            for episode_stats in result_rx.iter() {
                stats.merge(&episode_stats);
            }
        });

        Ok(stats)
    }

    /// The per-episode leg of the check/record/delete logic. Failures
    /// degrade to counted statistics; nothing here aborts the series.
    fn check_episode(&self, episode: &Episode) -> CleanupStats {
        let mut stats = CleanupStats {
            checked: 1,
            ..CleanupStats::default()
        };
        // Callers filter on has_file, so the file ID is always present.
        let file_id = match episode.episode_file_id {
            Some(file_id) => file_id,
            None => return stats,
        };

        self.progress
            .start_episode(episode.id, episode.season_number, episode.episode_number);

        let episode_file = match self.backend.get_episode_file(file_id) {
            Ok(file) => file,
            Err(err) if err.is_not_found() => {
                self.progress
                    .note(&format!("Episode file {file_id} already deleted or not found"));
                return stats;
            }
            Err(err) => {
                warn!("    Failed to get episode file {}: {}", file_id, err);
                stats.errors += 1;
                return stats;
            }
        };

        if episode_file.path.is_empty() {
            warn!("    No file path found for episode file {}", file_id);
            return stats;
        }

        if self.probe.file_exists(&episode_file.path) {
            debug!("    File exists: {}", episode_file.path);
            return stats;
        }

        stats.missing_files += 1;
        self.progress.missing_file(&episode_file.path);

        self.registry.record(MissingFileEntry {
            media_type: MediaKind::Series,
            media_name: self
                .names
                .display_name(MediaKind::Series, episode.series_id),
            episode_name: Some(episode.title.clone()),
            season: Some(episode.season_number),
            episode: Some(episode.episode_number),
            file_path: episode_file.path.clone(),
            file_id,
            processed_at: Utc::now(),
            added_to_collection: None,
            tmdb_id: None,
            tvdb_id: None,
        });

        if self.options.dry_run {
            info!("    DRY RUN: would delete episode file record {}", file_id);
            return stats;
        }

        info!("    Deleting episode file record {}...", file_id);
        if let Err(err) = self.backend.delete_episode_file(file_id) {
            self.progress.report_error(&format!(
                "Failed to delete episode file record {file_id}: {err}"
            ));
            stats.errors += 1;
            return stats;
        }

        stats.deleted_records += 1;
        self.progress.deleted_episode_record(file_id);

        // Best-effort status correction, same policy as for movies.
        if let Err(err) = self.backend.update_episode(episode) {
            debug!("    Status update for episode {} failed: {}", episode.id, err);
        }

        stats
    }
}
