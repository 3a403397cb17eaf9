use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{error, info, warn};

use crate::models::CleanupStats;

/// Receives per-item events while a run is in flight. Implementations
/// must tolerate concurrent calls from worker threads.
pub(crate) trait ProgressSink: Send + Sync {
    fn start_series(&self, series_id: i32, name: &str, current: usize, total: usize);
    fn start_movie(&self, movie_id: i32, name: &str, current: usize, total: usize);
    fn start_episode(&self, episode_id: i32, season: i32, episode: i32);
    fn missing_file(&self, path: &str);
    fn deleted_episode_record(&self, file_id: i32);
    fn deleted_movie_record(&self, file_id: i32);
    /// Informational event, e.g. a record that was already gone.
    fn note(&self, message: &str);
    fn report_error(&self, message: &str);
    fn finish(&self, stats: &CleanupStats);
}

/// Console reporter: a progress bar over the outer work items plus log
/// lines for the interesting events.
pub(crate) struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    /// The bar length is unknown until the inventory has been listed, so
    /// it is adopted from the first `start_*` event instead.
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner} {bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        ConsoleProgress { bar }
    }

    fn start_item(&self, label: &str, name: &str, current: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_length(total as u64);
        }
        self.bar.set_position(current as u64);
        self.bar.set_message(name.to_string());
        info!("Processing {} {}/{}: {}", label, current, total, name);
    }
}

impl ProgressSink for ConsoleProgress {
    fn start_series(&self, _series_id: i32, name: &str, current: usize, total: usize) {
        self.start_item("series", name, current, total);
    }

    fn start_movie(&self, _movie_id: i32, name: &str, current: usize, total: usize) {
        self.start_item("movie", name, current, total);
    }

    fn start_episode(&self, episode_id: i32, season: i32, episode: i32) {
        info!(
            "  Checking S{:02}E{:02} (episode ID {})",
            season, episode, episode_id
        );
    }

    fn missing_file(&self, path: &str) {
        warn!("    {} {}", style("MISSING:").red().bold(), path);
    }

    fn deleted_episode_record(&self, file_id: i32) {
        info!("    Deleted episode file record {}", file_id);
    }

    fn deleted_movie_record(&self, file_id: i32) {
        info!("    Deleted movie file record {}", file_id);
    }

    fn note(&self, message: &str) {
        info!("    {}", message);
    }

    fn report_error(&self, message: &str) {
        error!("    {}", message);
    }

    fn finish(&self, stats: &CleanupStats) {
        self.bar.finish_and_clear();

        info!("================================================");
        info!("Cleanup summary:");
        info!("  Items checked:   {}", stats.checked);
        info!("  Missing files:   {}", stats.missing_files);
        info!("  Records deleted: {}", stats.deleted_records);
        if stats.errors > 0 {
            warn!("  Errors:          {}", stats.errors);
        }

        if stats.missing_files == 0 {
            info!("No missing files found - nothing to clean up.");
        }
    }
}
