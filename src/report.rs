use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use log::{info, warn};

use crate::models::{MediaKind, MissingFilesReport, RunType};

/// Default directory the JSON reports are written into, relative to the
/// working directory.
pub(crate) const REPORT_DIR: &str = "reports";

/// Writes the report as pretty-printed JSON into `dir` and returns the
/// path of the created file. The directory is created on demand.
pub(crate) fn write_report(report: &MissingFilesReport, dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create report directory {}", dir.display()))?;

    let path = dir.join(report_file_name(report));
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    fs::write(&path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))?;

    info!("Missing files report saved to {}", path.display());
    Ok(path)
}

/// `{service}-missing-files-report[-dryrun]-{timestamp}.json`, timestamped
/// in local time so filenames sort in the operator's clock.
fn report_file_name(report: &MissingFilesReport) -> String {
    let marker = match report.run_type {
        RunType::DryRun => "-dryrun",
        RunType::RealRun => "",
    };
    format!(
        "{}-missing-files-report{}-{}.json",
        report.service_type,
        marker,
        Local::now().format("%Y%m%d-%H%M%S")
    )
}

/// Renders the report as log lines for the terminal.
pub(crate) fn render_terminal(report: &MissingFilesReport) {
    if report.total_missing == 0 {
        info!("No missing files found.");
        return;
    }

    warn!(
        "Found {} missing file{} ({}):",
        report.total_missing,
        if report.total_missing == 1 { "" } else { "s" },
        report.run_type
    );

    for entry in &report.missing_files {
        match entry.media_type {
            MediaKind::Series => {
                let position = match (entry.season, entry.episode) {
                    (Some(season), Some(episode)) => format!(" S{season:02}E{episode:02}"),
                    _ => String::new(),
                };
                let title = entry.episode_name.as_deref().unwrap_or("");
                warn!(
                    "  {}{} {} - {}",
                    entry.media_name, position, title, entry.file_path
                );
            }
            MediaKind::Movie => {
                warn!("  {} - {}", entry.media_name, entry.file_path);
            }
        }
        if entry.added_to_collection == Some(true) {
            info!("    (re-added to collection)");
        }
    }
}
