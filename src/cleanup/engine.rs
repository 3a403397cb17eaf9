use std::thread;

use log::{info, warn};
use thiserror::Error;

use crate::backend::{BackendError, MediaBackend};
use crate::cleanup::item::ItemReconciler;
use crate::cleanup::progress::ProgressSink;
use crate::cleanup::registry::MissingFileRegistry;
use crate::cleanup::symlink::BrokenSymlinkRecoverer;
use crate::cleanup::{CancelToken, NameTable, RunOptions, WorkItem};
use crate::fsprobe::FileSystemProbe;
use crate::models::{CleanupResult, CleanupStats, MediaKind, RunType};

/// Fatal outcomes of a run. Everything recoverable is folded into the
/// returned [`CleanupResult`] as counted statistics and messages instead.
#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("connection test failed: {0}")]
    Connectivity(#[source] BackendError),
    #[error("failed to list inventory: {0}")]
    Inventory(#[source] BackendError),
    /// Cooperative cancellation. Carries the partial result accumulated
    /// before the signal was observed; distinct from a failure message.
    #[error("cleanup cancelled")]
    Cancelled { partial: Box<CleanupResult> },
}

/// What one worker hands back to the aggregator: an immutable stats
/// bundle plus an optional per-item failure. Report entries travel
/// through the shared registry, counters only ever through this queue.
struct ItemOutcome {
    item: WorkItem,
    stats: CleanupStats,
    failure: Option<BackendError>,
    cancelled: bool,
}

/// Top-level scheduler for one reconciliation run. Dispatches items to a
/// bounded worker pool, funnels per-item outcomes through a single
/// aggregator, and assembles the final result.
pub(crate) struct ReconciliationEngine<'a> {
    backend: &'a dyn MediaBackend,
    probe: &'a dyn FileSystemProbe,
    progress: &'a dyn ProgressSink,
    options: RunOptions,
    cancel: CancelToken,
    registry: MissingFileRegistry,
    names: NameTable,
}

impl<'a> ReconciliationEngine<'a> {
    pub(crate) fn new(
        backend: &'a dyn MediaBackend,
        probe: &'a dyn FileSystemProbe,
        progress: &'a dyn ProgressSink,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Self {
        ReconciliationEngine {
            backend,
            probe,
            progress,
            options,
            cancel,
            registry: MissingFileRegistry::new(),
            names: NameTable::default(),
        }
    }

    fn run_type(&self) -> RunType {
        if self.options.dry_run {
            RunType::DryRun
        } else {
            RunType::RealRun
        }
    }

    /// Full cleanup pass over the backend's entire inventory, including
    /// the broken-symlink recovery pass.
    pub(crate) fn run(&self) -> Result<CleanupResult, EngineError> {
        self.execute(None)
    }

    /// Cleanup restricted to explicitly named item IDs. The symlink
    /// recovery pass only runs on full, unfiltered passes.
    pub(crate) fn run_filtered(&self, item_ids: &[i32]) -> Result<CleanupResult, EngineError> {
        self.execute(Some(item_ids))
    }

    fn execute(&self, filter: Option<&[i32]>) -> Result<CleanupResult, EngineError> {
        info!("Starting {} missing file cleanup...", self.backend.name());
        if self.options.dry_run {
            info!("DRY RUN MODE: no changes will be made");
        }

        // Connectivity failure is fatal: no partial result.
        self.backend
            .test_connection()
            .map_err(EngineError::Connectivity)?;

        let mut items = self.load_inventory()?;
        if let Some(wanted) = filter {
            items.retain(|item| wanted.contains(&item.0));
        }

        let mut stats = CleanupStats::default();
        let mut messages = Vec::new();

        if filter.is_none() {
            let recoverer = BrokenSymlinkRecoverer {
                backend: self.backend,
                probe: self.probe,
                registry: &self.registry,
                names: &self.names,
                progress: self.progress,
                options: &self.options,
            };
            match recoverer.run() {
                Ok(symlink_stats) => stats.merge(&symlink_stats),
                Err(err) => {
                    warn!("Broken symlink handling failed: {}", err);
                    messages.push(format!("Broken symlink handling failed: {err}"));
                }
            }
        }

        self.dispatch(&items, stats, messages)
    }

    /// Lists the backend's inventory, fills the run-scoped name table,
    /// and returns the work items.
    fn load_inventory(&self) -> Result<Vec<WorkItem>, EngineError> {
        match self.backend.kind() {
            MediaKind::Series => {
                info!("Fetching all series...");
                let series = self.backend.list_series().map_err(EngineError::Inventory)?;
                info!("Found {} series", series.len());
                Ok(series
                    .iter()
                    .map(|s| {
                        self.names.insert(MediaKind::Series, s.id, &s.title);
                        WorkItem(s.id)
                    })
                    .collect())
            }
            MediaKind::Movie => {
                info!("Fetching all movies...");
                let movies = self.backend.list_movies().map_err(EngineError::Inventory)?;
                info!("Found {} movies", movies.len());
                Ok(movies
                    .iter()
                    .map(|m| {
                        self.names.insert(MediaKind::Movie, m.id, &m.title);
                        WorkItem(m.id)
                    })
                    .collect())
            }
        }
    }

    /// Fans the items out to a pool of at most `concurrent_limit` worker
    /// threads and folds their outcomes sequentially. Completion order is
    /// irrelevant: stats merging is commutative.
    fn dispatch(
        &self,
        items: &[WorkItem],
        mut stats: CleanupStats,
        mut messages: Vec<String>,
    ) -> Result<CleanupResult, EngineError> {
        let total = items.len();
        info!(
            "Processing {} {} items with concurrency limit of {}",
            total,
            self.backend.kind(),
            self.options.concurrent_limit
        );

        let workers = self.options.concurrent_limit.min(total).max(1);

        let (work_tx, work_rx) = flume::bounded(total.max(1));
        for (index, item) in items.iter().enumerate() {
            let _ = work_tx.send((index, *item));
        }
        drop(work_tx);

        let (result_tx, result_rx) = flume::bounded::<ItemOutcome>(workers * 2);

        let mut was_cancelled = false;
        let mut processed = 0usize;

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok((index, item)) = work_rx.recv() {
                        // Cancellation check happens before the unit of
                        // work; anything mid-flight finishes naturally.
                        if self.cancel.is_cancelled() {
                            let _ = result_tx.send(ItemOutcome {
                                item,
                                stats: CleanupStats::default(),
                                failure: None,
                                cancelled: true,
                            });
                            continue;
                        }

                        let outcome = self.reconcile_item(item, index, total);
                        let _ = result_tx.send(outcome);

                        if !self.options.request_delay.is_zero() {
                            thread::sleep(self.options.request_delay);
                        }
                    }
                });
            }
            drop(result_tx);

            // Single aggregator: all counter merges happen here, in
            // arrival order. On cancellation it keeps draining (workers
            // short-circuit quickly) but stops treating outcomes as
            // progress.
            for outcome in result_rx.iter() {
                if outcome.cancelled {
                    was_cancelled = true;
                    continue;
                }
                processed += 1;

                if let Some(err) = outcome.failure {
                    let message = format!(
                        "Error processing {} {}: {}",
                        self.backend.kind(),
                        outcome.item.0,
                        err
                    );
                    self.progress.report_error(&message);
                    stats.errors += 1;
                    messages.push(message);
                }
                stats.merge(&outcome.stats);
            }
        });

        info!(
            "Completed processing {} {} items",
            processed,
            self.backend.kind()
        );

        if was_cancelled || self.cancel.is_cancelled() {
            warn!("Cleanup cancelled");
            // The sink still gets its final stats so terminal state (the
            // progress bar included) is wound down.
            self.progress.finish(&stats);
            let partial = CleanupResult {
                stats,
                messages,
                success: false,
                report: self.registry.build_report(self.backend.name(), self.run_type()),
            };
            return Err(EngineError::Cancelled {
                partial: Box::new(partial),
            });
        }

        self.progress.finish(&stats);

        // One refresh for the whole run; its failure is reported but does
        // not flip the run to failed by itself.
        if stats.deleted_records > 0 && !self.options.dry_run {
            if let Err(err) = self.backend.trigger_refresh() {
                warn!("Failed to trigger refresh: {}", err);
                messages.push(format!("Failed to trigger refresh: {err}"));
            }
        }

        let success = stats.errors == 0;
        Ok(CleanupResult {
            stats,
            messages,
            success,
            report: self.registry.build_report(self.backend.name(), self.run_type()),
        })
    }

    fn reconcile_item(&self, item: WorkItem, index: usize, total: usize) -> ItemOutcome {
        let reconciler = ItemReconciler {
            backend: self.backend,
            probe: self.probe,
            registry: &self.registry,
            names: &self.names,
            progress: self.progress,
            options: &self.options,
            cancel: &self.cancel,
        };

        let kind = self.backend.kind();
        let name = self.names.display_name(kind, item.0);
        let reconciled = match kind {
            MediaKind::Series => {
                self.progress.start_series(item.0, &name, index + 1, total);
                reconciler.reconcile_series(item.0)
            }
            MediaKind::Movie => {
                self.progress.start_movie(item.0, &name, index + 1, total);
                reconciler.reconcile_movie(item.0)
            }
        };

        match reconciled {
            Ok(stats) => ItemOutcome {
                item,
                stats,
                failure: None,
                cancelled: false,
            },
            Err(err) => ItemOutcome {
                item,
                stats: CleanupStats::default(),
                failure: Some(err),
                cancelled: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::models::{Episode, MediaFile, Movie, QualityProfile, RootFolder, Series};

    /// In-memory backend with instrumented call logs.
    #[derive(Default)]
    struct MockBackend {
        kind: Option<MediaKind>,
        series: Vec<Series>,
        episodes: HashMap<i32, Vec<Episode>>,
        movies: Vec<Movie>,
        files: HashMap<i32, MediaFile>,
        // File IDs that answer fetches with a typed "not found".
        vanished_files: HashSet<i32>,
        root_folders: Vec<RootFolder>,
        lookup_movies: HashMap<i32, Movie>,
        lookup_series: HashMap<i32, Series>,
        collection_tmdb: HashMap<i32, Movie>,
        collection_tvdb: HashMap<i32, Series>,
        fail_connection: bool,

        deleted_files: Mutex<Vec<i32>>,
        added_titles: Mutex<Vec<String>>,
        lookups: AtomicUsize,
        refreshes: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockBackend {
        fn sonarr() -> Self {
            MockBackend {
                kind: Some(MediaKind::Series),
                ..MockBackend::default()
            }
        }

        fn radarr() -> Self {
            MockBackend {
                kind: Some(MediaKind::Movie),
                ..MockBackend::default()
            }
        }

        fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        fn fetch_file(&self, id: i32, what: &str) -> Result<MediaFile, BackendError> {
            if self.vanished_files.contains(&id) {
                return Err(BackendError::NotFound(format!("{what} {id}")));
            }
            self.files
                .get(&id)
                .cloned()
                .ok_or_else(|| BackendError::Other(format!("backend failure fetching {what} {id}")))
        }
    }

    impl MediaBackend for MockBackend {
        fn name(&self) -> &'static str {
            match self.kind() {
                MediaKind::Series => "sonarr",
                MediaKind::Movie => "radarr",
            }
        }

        fn kind(&self) -> MediaKind {
            self.kind.expect("mock backend kind not set")
        }

        fn test_connection(&self) -> Result<(), BackendError> {
            if self.fail_connection {
                return Err(BackendError::Other("connection refused".to_string()));
            }
            Ok(())
        }

        fn list_series(&self) -> Result<Vec<Series>, BackendError> {
            Ok(self.series.clone())
        }

        fn list_movies(&self) -> Result<Vec<Movie>, BackendError> {
            Ok(self.movies.clone())
        }

        fn get_movie(&self, id: i32) -> Result<Movie, BackendError> {
            self.enter();
            std::thread::sleep(Duration::from_millis(5));
            let movie = self
                .movies
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(format!("movie {id}")));
            self.leave();
            movie
        }

        fn list_episodes(&self, series_id: i32) -> Result<Vec<Episode>, BackendError> {
            self.enter();
            std::thread::sleep(Duration::from_millis(5));
            let episodes = Ok(self.episodes.get(&series_id).cloned().unwrap_or_default());
            self.leave();
            episodes
        }

        fn get_episode_file(&self, id: i32) -> Result<MediaFile, BackendError> {
            self.enter();
            std::thread::sleep(Duration::from_millis(5));
            let file = self.fetch_file(id, "episode file");
            self.leave();
            file
        }

        fn get_movie_file(&self, id: i32) -> Result<MediaFile, BackendError> {
            self.fetch_file(id, "movie file")
        }

        fn delete_episode_file(&self, id: i32) -> Result<(), BackendError> {
            self.deleted_files.lock().push(id);
            Ok(())
        }

        fn delete_movie_file(&self, id: i32) -> Result<(), BackendError> {
            self.deleted_files.lock().push(id);
            Ok(())
        }

        fn update_episode(&self, _episode: &Episode) -> Result<(), BackendError> {
            Ok(())
        }

        fn update_movie(&self, _movie: &Movie) -> Result<(), BackendError> {
            Ok(())
        }

        fn trigger_refresh(&self) -> Result<(), BackendError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn list_root_folders(&self) -> Result<Vec<RootFolder>, BackendError> {
            Ok(self.root_folders.clone())
        }

        fn list_quality_profiles(&self) -> Result<Vec<QualityProfile>, BackendError> {
            Ok(Vec::new())
        }

        fn get_movie_by_tmdb_id(&self, tmdb_id: i32) -> Result<Option<Movie>, BackendError> {
            Ok(self.collection_tmdb.get(&tmdb_id).cloned())
        }

        fn get_series_by_tvdb_id(&self, tvdb_id: i32) -> Result<Option<Series>, BackendError> {
            Ok(self.collection_tvdb.get(&tvdb_id).cloned())
        }

        fn lookup_movie_by_tmdb_id(&self, tmdb_id: i32) -> Result<Movie, BackendError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.lookup_movies
                .get(&tmdb_id)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(format!("movie lookup for TMDB ID {tmdb_id}")))
        }

        fn lookup_series_by_tvdb_id(&self, tvdb_id: i32) -> Result<Series, BackendError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.lookup_series
                .get(&tvdb_id)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(format!("series lookup for TVDB ID {tvdb_id}")))
        }

        fn add_movie(&self, movie: &Movie) -> Result<Movie, BackendError> {
            self.added_titles.lock().push(movie.title.clone());
            let mut added = movie.clone();
            added.id = 9001;
            Ok(added)
        }

        fn add_series(&self, series: &Series) -> Result<Series, BackendError> {
            self.added_titles.lock().push(series.title.clone());
            let mut added = series.clone();
            added.id = 9001;
            Ok(added)
        }
    }

    /// In-memory filesystem: a set of present paths plus pre-seeded
    /// broken symlinks per root.
    #[derive(Default)]
    struct MockProbe {
        present: HashSet<String>,
        broken_by_root: HashMap<String, Vec<String>>,
        deleted_links: Mutex<Vec<String>>,
    }

    impl FileSystemProbe for MockProbe {
        fn file_exists(&self, path: &str) -> bool {
            self.present.contains(path)
        }

        fn find_broken_symlinks(
            &self,
            root: &str,
            _extensions: &[&str],
        ) -> io::Result<Vec<String>> {
            Ok(self.broken_by_root.get(root).cloned().unwrap_or_default())
        }

        fn delete_symlink(&self, path: &str) -> io::Result<()> {
            self.deleted_links.lock().push(path.to_string());
            Ok(())
        }
    }

    /// Progress sink that records informational and error events.
    #[derive(Default)]
    struct RecordingProgress {
        notes: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
        finishes: AtomicUsize,
    }

    impl ProgressSink for RecordingProgress {
        fn start_series(&self, _: i32, _: &str, _: usize, _: usize) {}
        fn start_movie(&self, _: i32, _: &str, _: usize, _: usize) {}
        fn start_episode(&self, _: i32, _: i32, _: i32) {}
        fn missing_file(&self, _: &str) {}
        fn deleted_episode_record(&self, _: i32) {}
        fn deleted_movie_record(&self, _: i32) {}
        fn note(&self, message: &str) {
            self.notes.lock().push(message.to_string());
        }
        fn report_error(&self, message: &str) {
            self.errors.lock().push(message.to_string());
        }
        fn finish(&self, _: &CleanupStats) {
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn episode(id: i32, series_id: i32, season: i32, number: i32, file_id: Option<i32>) -> Episode {
        Episode {
            id,
            series_id,
            season_number: season,
            episode_number: number,
            title: format!("Episode {number}"),
            has_file: file_id.is_some(),
            episode_file_id: file_id,
        }
    }

    fn series(id: i32, title: &str) -> Series {
        Series {
            id,
            title: title.to_string(),
            ..Series::default()
        }
    }

    fn movie(id: i32, title: &str, file_id: Option<i32>) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            has_file: file_id.is_some(),
            movie_file_id: file_id,
            ..Movie::default()
        }
    }

    fn media_file(id: i32, path: &str) -> MediaFile {
        MediaFile {
            id,
            path: path.to_string(),
        }
    }

    fn run_engine(
        backend: &MockBackend,
        probe: &MockProbe,
        options: RunOptions,
    ) -> Result<CleanupResult, EngineError> {
        let progress = RecordingProgress::default();
        let engine = ReconciliationEngine::new(backend, probe, &progress, options, CancelToken::new());
        engine.run()
    }

    #[test]
    fn series_with_mixed_episode_states_yields_expected_stats() {
        // Scenario: 3 episodes, 2 claim a file (one missing on disk, one
        // present), 1 claims none.
        let mut backend = MockBackend::sonarr();
        backend.series = vec![series(1, "Some Show")];
        backend.episodes.insert(
            1,
            vec![
                episode(10, 1, 1, 1, Some(100)),
                episode(11, 1, 1, 2, Some(101)),
                episode(12, 1, 1, 3, None),
            ],
        );
        backend.files.insert(100, media_file(100, "/tv/show/s01e01.mkv"));
        backend.files.insert(101, media_file(101, "/tv/show/s01e02.mkv"));

        let mut probe = MockProbe::default();
        probe.present.insert("/tv/show/s01e02.mkv".to_string());

        let result = run_engine(&backend, &probe, RunOptions::default()).unwrap();

        assert_eq!(result.stats.checked, 2);
        assert_eq!(result.stats.missing_files, 1);
        assert_eq!(result.stats.deleted_records, 1);
        assert_eq!(result.stats.errors, 0);
        assert!(result.success);
        assert_eq!(*backend.deleted_files.lock(), vec![100]);
        assert_eq!(backend.refreshes.load(Ordering::SeqCst), 1);

        let entry = &result.report.missing_files[0];
        assert_eq!(entry.media_name, "Some Show");
        assert_eq!(entry.season, Some(1));
        assert_eq!(entry.episode, Some(1));
        assert_eq!(entry.file_id, 100);
    }

    #[test]
    fn vanished_file_record_is_informational_not_an_error() {
        let mut backend = MockBackend::sonarr();
        backend.series = vec![series(1, "Some Show")];
        backend
            .episodes
            .insert(1, vec![episode(10, 1, 1, 1, Some(100))]);
        backend.vanished_files.insert(100);

        let probe = MockProbe::default();
        let progress = RecordingProgress::default();
        let engine = ReconciliationEngine::new(
            &backend,
            &probe,
            &progress,
            RunOptions::default(),
            CancelToken::new(),
        );
        let result = engine.run().unwrap();

        assert_eq!(result.stats.checked, 1);
        assert_eq!(result.stats.errors, 0);
        assert!(result.success);
        assert_eq!(progress.notes.lock().len(), 1);
        assert!(progress.errors.lock().is_empty());
        assert!(backend.deleted_files.lock().is_empty());
    }

    #[test]
    fn dry_run_detects_but_never_deletes() {
        let mut backend = MockBackend::radarr();
        backend.movies = vec![movie(1, "Some Movie", Some(50))];
        backend.files.insert(50, media_file(50, "/movies/some.mkv"));

        let probe = MockProbe::default();
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let result = run_engine(&backend, &probe, options).unwrap();

        assert_eq!(result.stats.missing_files, 1);
        assert_eq!(result.stats.deleted_records, 0);
        assert!(backend.deleted_files.lock().is_empty());
        assert_eq!(backend.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(result.report.run_type, RunType::DryRun);
    }

    #[test]
    fn dry_run_is_idempotent_against_an_unchanged_snapshot() {
        let mut backend = MockBackend::sonarr();
        backend.series = vec![series(1, "A"), series(2, "B")];
        backend.episodes.insert(
            1,
            vec![episode(10, 1, 1, 1, Some(100)), episode(11, 1, 1, 2, Some(101))],
        );
        backend.episodes.insert(2, vec![episode(20, 2, 1, 1, Some(200))]);
        backend.files.insert(100, media_file(100, "/tv/a1.mkv"));
        backend.files.insert(101, media_file(101, "/tv/a2.mkv"));
        backend.files.insert(200, media_file(200, "/tv/b1.mkv"));
        backend.root_folders = vec![RootFolder {
            id: 1,
            path: "/tv".to_string(),
        }];

        let mut probe = MockProbe::default();
        probe.present.insert("/tv/a2.mkv".to_string());
        probe.broken_by_root.insert(
            "/tv".to_string(),
            vec!["/tv/Show [tvdb-77]/gone.mkv".to_string()],
        );
        backend
            .collection_tvdb
            .insert(77, series(3, "Tracked Show"));

        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let first = run_engine(&backend, &probe, options.clone()).unwrap();
        let second = run_engine(&backend, &probe, options).unwrap();

        assert_eq!(first.stats, second.stats);
        assert!(probe.deleted_links.lock().is_empty());
    }

    #[test]
    fn broken_symlink_recovery_adds_missing_movie() {
        // Scenario: dangling link with a tmdb tag, not in the collection,
        // add-missing-media enabled, real run.
        let mut backend = MockBackend::radarr();
        backend.root_folders = vec![RootFolder {
            id: 1,
            path: "/movies".to_string(),
        }];
        backend.lookup_movies.insert(555, {
            let mut m = movie(0, "Recovered Movie", None);
            m.year = 2020;
            m.tmdb_id = 555;
            m
        });

        let mut probe = MockProbe::default();
        probe.broken_by_root.insert(
            "/movies".to_string(),
            vec!["/movies/Movie (2020) [tmdb-555]/movie.mkv".to_string()],
        );

        let options = RunOptions {
            add_missing_media: true,
            ..RunOptions::default()
        };
        let result = run_engine(&backend, &probe, options).unwrap();

        assert_eq!(backend.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(*backend.added_titles.lock(), vec!["Recovered Movie"]);
        assert_eq!(
            *probe.deleted_links.lock(),
            vec!["/movies/Movie (2020) [tmdb-555]/movie.mkv"]
        );

        assert_eq!(result.report.total_missing, 1);
        let entry = &result.report.missing_files[0];
        assert_eq!(entry.added_to_collection, Some(true));
        assert_eq!(entry.tmdb_id, Some(555));
        assert_eq!(entry.file_id, 0);
    }

    #[test]
    fn symlink_without_catalog_tag_is_skipped_silently() {
        let mut backend = MockBackend::radarr();
        backend.root_folders = vec![RootFolder {
            id: 1,
            path: "/movies".to_string(),
        }];

        let mut probe = MockProbe::default();
        probe.broken_by_root.insert(
            "/movies".to_string(),
            vec!["/movies/Untagged Movie/movie.mkv".to_string()],
        );

        let result = run_engine(&backend, &probe, RunOptions::default()).unwrap();

        assert_eq!(result.stats.errors, 0);
        assert_eq!(result.stats.missing_files, 0);
        assert_eq!(result.report.total_missing, 0);
        assert!(result.success);
    }

    #[test]
    fn already_tracked_symlink_is_reported_but_not_added() {
        let mut backend = MockBackend::radarr();
        backend.root_folders = vec![RootFolder {
            id: 1,
            path: "/movies".to_string(),
        }];
        backend.collection_tmdb.insert(555, movie(7, "Tracked Movie", None));

        let mut probe = MockProbe::default();
        probe.broken_by_root.insert(
            "/movies".to_string(),
            vec!["/movies/Tracked (2020) [tmdb-555]/movie.mkv".to_string()],
        );

        let options = RunOptions {
            add_missing_media: true,
            ..RunOptions::default()
        };
        let result = run_engine(&backend, &probe, options).unwrap();

        assert!(backend.added_titles.lock().is_empty());
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 0);
        let entry = &result.report.missing_files[0];
        assert_eq!(entry.added_to_collection, Some(false));
        assert_eq!(entry.media_name, "Tracked Movie");
    }

    #[test]
    fn cancellation_yields_partial_result_with_distinct_error() {
        let mut backend = MockBackend::radarr();
        backend.movies = (1..=10).map(|id| movie(id, &format!("M{id}"), None)).collect();

        let probe = MockProbe::default();
        let progress = RecordingProgress::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let engine = ReconciliationEngine::new(
            &backend,
            &probe,
            &progress,
            RunOptions::default(),
            cancel,
        );

        match engine.run() {
            Err(EngineError::Cancelled { partial }) => {
                assert!(!partial.success);
                assert_eq!(partial.stats.checked, 0);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        // The sink is wound down even when the run is cut short.
        assert_eq!(progress.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connectivity_failure_aborts_without_partial_result() {
        let mut backend = MockBackend::radarr();
        backend.fail_connection = true;

        let probe = MockProbe::default();
        match run_engine(&backend, &probe, RunOptions::default()) {
            Err(EngineError::Connectivity(_)) => {}
            other => panic!("expected connectivity failure, got {other:?}"),
        }
    }

    #[test]
    fn per_item_fetch_failure_is_counted_and_processing_continues() {
        let mut backend = MockBackend::radarr();
        backend.movies = vec![movie(1, "Bad", Some(50)), movie(2, "Good", Some(51))];
        // File 50 answers with an untyped failure; file 51 is healthy.
        backend.files.insert(51, media_file(51, "/movies/good.mkv"));

        let mut probe = MockProbe::default();
        probe.present.insert("/movies/good.mkv".to_string());

        let result = run_engine(&backend, &probe, RunOptions::default()).unwrap();

        assert_eq!(result.stats.checked, 2);
        assert_eq!(result.stats.errors, 1);
        assert!(!result.success);
    }

    #[test]
    fn worker_pool_never_exceeds_the_concurrency_limit() {
        let mut backend = MockBackend::radarr();
        backend.movies = (1..=24).map(|id| movie(id, &format!("M{id}"), None)).collect();

        let probe = MockProbe::default();
        let options = RunOptions {
            concurrent_limit: 3,
            ..RunOptions::default()
        };
        let result = run_engine(&backend, &probe, options).unwrap();

        assert!(result.success);
        let observed = backend.max_in_flight.load(Ordering::SeqCst);
        assert!(observed >= 1);
        assert!(
            observed <= 3,
            "observed {observed} concurrent item reconcilers, limit was 3"
        );
    }

    #[test]
    fn episode_checks_within_one_series_stay_under_the_inner_cap() {
        let mut backend = MockBackend::sonarr();
        backend.series = vec![series(1, "Big Show")];
        let episodes: Vec<Episode> = (1..=20)
            .map(|n| episode(n, 1, 1, n, Some(1000 + n)))
            .collect();
        for ep in &episodes {
            let file_id = ep.episode_file_id.unwrap();
            backend
                .files
                .insert(file_id, media_file(file_id, &format!("/tv/e{file_id}.mkv")));
        }
        backend.episodes.insert(1, episodes);

        let mut probe = MockProbe::default();
        for n in 1..=20 {
            probe.present.insert(format!("/tv/e{}.mkv", 1000 + n));
        }

        // Outer limit well above the inner cap; the episode pool must
        // still hold at min(outer, 3).
        let options = RunOptions {
            concurrent_limit: 8,
            ..RunOptions::default()
        };
        let result = run_engine(&backend, &probe, options).unwrap();

        assert_eq!(result.stats.checked, 20);
        let observed = backend.max_in_flight.load(Ordering::SeqCst);
        assert!(
            observed <= 3,
            "observed {observed} concurrent episode fetches, inner cap is 3"
        );
    }

    #[test]
    fn filtered_movie_run_only_touches_the_named_ids() {
        let mut backend = MockBackend::radarr();
        backend.movies = vec![
            movie(1, "Wanted", Some(50)),
            movie(2, "Unwanted", Some(51)),
        ];
        backend.files.insert(50, media_file(50, "/movies/w.mkv"));
        backend.files.insert(51, media_file(51, "/movies/u.mkv"));
        backend.root_folders = vec![RootFolder {
            id: 1,
            path: "/movies".to_string(),
        }];

        let mut probe = MockProbe::default();
        probe.broken_by_root.insert(
            "/movies".to_string(),
            vec!["/movies/Gone (2019) [tmdb-9]/gone.mkv".to_string()],
        );

        let progress = RecordingProgress::default();
        let engine = ReconciliationEngine::new(
            &backend,
            &probe,
            &progress,
            RunOptions::default(),
            CancelToken::new(),
        );
        let result = engine.run_filtered(&[1]).unwrap();

        assert_eq!(result.stats.checked, 1);
        assert_eq!(*backend.deleted_files.lock(), vec![50]);
        assert!(probe.deleted_links.lock().is_empty());
    }

    #[test]
    fn filtered_run_skips_the_symlink_pass_and_other_items() {
        let mut backend = MockBackend::sonarr();
        backend.series = vec![series(1, "Wanted"), series(2, "Unwanted")];
        backend
            .episodes
            .insert(1, vec![episode(10, 1, 1, 1, Some(100))]);
        backend
            .episodes
            .insert(2, vec![episode(20, 2, 1, 1, Some(200))]);
        backend.files.insert(100, media_file(100, "/tv/w.mkv"));
        backend.files.insert(200, media_file(200, "/tv/u.mkv"));
        backend.root_folders = vec![RootFolder {
            id: 1,
            path: "/tv".to_string(),
        }];

        let mut probe = MockProbe::default();
        probe.broken_by_root.insert(
            "/tv".to_string(),
            vec!["/tv/Show [tvdb-5]/gone.mkv".to_string()],
        );

        let progress = RecordingProgress::default();
        let engine = ReconciliationEngine::new(
            &backend,
            &probe,
            &progress,
            RunOptions::default(),
            CancelToken::new(),
        );
        let result = engine.run_filtered(&[1]).unwrap();

        // Only the wanted series was checked and the symlink pass did not run.
        assert_eq!(result.stats.checked, 1);
        assert!(probe.deleted_links.lock().is_empty());
        assert_eq!(*backend.deleted_files.lock(), vec![100]);
    }
}
