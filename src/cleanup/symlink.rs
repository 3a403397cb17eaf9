use anyhow::{Context, anyhow};
use chrono::Utc;
use log::{debug, info, warn};

use crate::backend::{BackendError, MediaBackend};
use crate::cleanup::progress::ProgressSink;
use crate::cleanup::registry::MissingFileRegistry;
use crate::cleanup::{MEDIA_EXTENSIONS, NameTable, RunOptions};
use crate::fsprobe::FileSystemProbe;
use crate::models::{
    CleanupStats, MediaKind, MissingFileEntry, Movie, RootFolder, Series, tmdb_id_from_path,
    tvdb_id_from_path,
};

/// Recovers collection entries behind broken symlinks. Each dangling link
/// under a configured root folder walks a small state machine: extract
/// the bracketed catalog tag from the path, remove the link from disk,
/// then check the collection and either report the existing entry or
/// (policy permitting) add the item back from catalog metadata.
pub(crate) struct BrokenSymlinkRecoverer<'a> {
    pub backend: &'a dyn MediaBackend,
    pub probe: &'a dyn FileSystemProbe,
    pub registry: &'a MissingFileRegistry,
    pub names: &'a NameTable,
    pub progress: &'a dyn ProgressSink,
    pub options: &'a RunOptions,
}

impl BrokenSymlinkRecoverer<'_> {
    /// Scans every configured root folder and processes each broken
    /// symlink independently. A failure on one link is counted and does
    /// not abort the rest of the batch; only the root-folder listing
    /// itself is fatal to the pass.
    pub(crate) fn run(&self) -> Result<CleanupStats, BackendError> {
        let mut stats = CleanupStats::default();

        info!(
            "Scanning for broken symlinks in {} root directories...",
            self.backend.name()
        );

        let root_folders = self.backend.list_root_folders()?;
        if root_folders.is_empty() {
            info!("No root folders configured");
            return Ok(stats);
        }

        let mut broken_links = Vec::new();
        for folder in &root_folders {
            info!("Scanning root folder: {}", folder.path);
            match self
                .probe
                .find_broken_symlinks(&folder.path, MEDIA_EXTENSIONS)
            {
                Ok(found) => {
                    info!("Found {} broken symlinks in {}", found.len(), folder.path);
                    broken_links.extend(found);
                }
                Err(err) => {
                    warn!("Failed to scan folder {}: {}", folder.path, err);
                    stats.errors += 1;
                }
            }
        }

        if broken_links.is_empty() {
            info!("No broken symlinks found");
            return Ok(stats);
        }

        info!("Processing {} broken symlinks...", broken_links.len());
        for link in &broken_links {
            stats.checked += 1;
            match self.recover_one(link, &root_folders) {
                Ok(recovered) => {
                    if recovered {
                        stats.missing_files += 1;
                    }
                }
                Err(err) => {
                    self.progress
                        .report_error(&format!("Failed to handle broken symlink {link}: {err:#}"));
                    stats.errors += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Runs the recovery state machine for one dangling link. Returns
    /// whether a missing-file entry was recorded; `Ok(false)` means the
    /// path carried no parseable catalog tag and was skipped.
    fn recover_one(&self, link: &str, root_folders: &[RootFolder]) -> anyhow::Result<bool> {
        debug!("Processing broken symlink: {}", link);

        let external_id = match self.extract_external_id(link) {
            Some(id) => id,
            None => {
                // Not an error: unrecognised layouts are simply skipped.
                warn!("No catalog tag found in path {}, skipping", link);
                return Ok(false);
            }
        };
        debug!("Extracted external ID {} from {}", external_id, link);

        if self.options.dry_run {
            info!("DRY RUN: would delete broken symlink {}", link);
        } else {
            info!("Deleting broken symlink: {}", link);
            self.probe
                .delete_symlink(link)
                .with_context(|| format!("failed to delete broken symlink {link}"))?;
        }

        match self.backend.kind() {
            MediaKind::Movie => self.recover_movie(link, external_id, root_folders)?,
            MediaKind::Series => self.recover_series(link, external_id, root_folders)?,
        }
        Ok(true)
    }

    fn extract_external_id(&self, link: &str) -> Option<i32> {
        match self.backend.kind() {
            MediaKind::Movie => tmdb_id_from_path(link),
            MediaKind::Series => tvdb_id_from_path(link),
        }
    }

    fn recover_movie(
        &self,
        link: &str,
        tmdb_id: i32,
        root_folders: &[RootFolder],
    ) -> anyhow::Result<()> {
        if let Some(existing) = self
            .backend
            .get_movie_by_tmdb_id(tmdb_id)
            .with_context(|| format!("failed to check collection for TMDB ID {tmdb_id}"))?
        {
            debug!(
                "Movie with TMDB ID {} already in collection: {}",
                tmdb_id, existing.title
            );
            self.record_entry(MediaKind::Movie, &existing.title, link, tmdb_id, false);
            return Ok(());
        }

        info!(
            "Movie with TMDB ID {} not in collection, looking up details...",
            tmdb_id
        );
        let lookup = self
            .backend
            .lookup_movie_by_tmdb_id(tmdb_id)
            .with_context(|| format!("failed to look up movie with TMDB ID {tmdb_id}"))?;

        let root = choose_root_folder(link, root_folders)
            .ok_or_else(|| anyhow!("no suitable root folder found for movie"))?;

        let candidate = Movie {
            title: lookup.title.clone(),
            year: lookup.year,
            tmdb_id: lookup.tmdb_id,
            monitored: true,
            quality_profile_id: self.options.quality_profile_id,
            root_folder_path: Some(root.path.clone()),
            has_file: false,
            ..Movie::default()
        };

        let added = self.should_add(&format!("movie {} ({})", lookup.title, lookup.year));
        if added {
            info!("Adding movie to collection: {} ({})", lookup.title, lookup.year);
            let added_movie = self
                .backend
                .add_movie(&candidate)
                .with_context(|| format!("failed to add movie {}", lookup.title))?;
            self.names
                .insert(MediaKind::Movie, added_movie.id, &added_movie.title);
        }

        self.record_entry(MediaKind::Movie, &lookup.title, link, tmdb_id, added);
        Ok(())
    }

    fn recover_series(
        &self,
        link: &str,
        tvdb_id: i32,
        root_folders: &[RootFolder],
    ) -> anyhow::Result<()> {
        if let Some(existing) = self
            .backend
            .get_series_by_tvdb_id(tvdb_id)
            .with_context(|| format!("failed to check collection for TVDB ID {tvdb_id}"))?
        {
            debug!(
                "Series with TVDB ID {} already in collection: {}",
                tvdb_id, existing.title
            );
            self.record_entry(MediaKind::Series, &existing.title, link, tvdb_id, false);
            return Ok(());
        }

        info!(
            "Series with TVDB ID {} not in collection, looking up details...",
            tvdb_id
        );
        let lookup = self
            .backend
            .lookup_series_by_tvdb_id(tvdb_id)
            .with_context(|| format!("failed to look up series with TVDB ID {tvdb_id}"))?;

        let root = choose_root_folder(link, root_folders)
            .ok_or_else(|| anyhow!("no suitable root folder found for series"))?;

        let candidate = Series {
            title: lookup.title.clone(),
            tvdb_id: lookup.tvdb_id,
            monitored: true,
            quality_profile_id: self.options.quality_profile_id,
            root_folder_path: Some(root.path.clone()),
            ..Series::default()
        };

        let added = self.should_add(&format!("series {}", lookup.title));
        if added {
            info!("Adding series to collection: {}", lookup.title);
            let added_series = self
                .backend
                .add_series(&candidate)
                .with_context(|| format!("failed to add series {}", lookup.title))?;
            self.names
                .insert(MediaKind::Series, added_series.id, &added_series.title);
        }

        self.record_entry(MediaKind::Series, &lookup.title, link, tvdb_id, added);
        Ok(())
    }

    /// Whether the add-to-collection call should actually be made, with
    /// the skipped cases logged for the operator.
    fn should_add(&self, what: &str) -> bool {
        if self.options.add_missing_media && !self.options.dry_run {
            return true;
        }
        if self.options.dry_run {
            info!("DRY RUN: would add {} to collection", what);
        } else {
            info!("add-missing-media disabled: would add {} to collection", what);
        }
        false
    }

    fn record_entry(
        &self,
        kind: MediaKind,
        name: &str,
        link: &str,
        external_id: i32,
        added_to_collection: bool,
    ) {
        self.progress.missing_file(link);
        self.registry.record(MissingFileEntry {
            media_type: kind,
            media_name: name.to_string(),
            episode_name: None,
            season: None,
            episode: None,
            file_path: link.to_string(),
            // Symlink-scan discoveries have no concrete backend record.
            file_id: 0,
            processed_at: Utc::now(),
            added_to_collection: Some(added_to_collection),
            tmdb_id: (kind == MediaKind::Movie).then_some(external_id),
            tvdb_id: (kind == MediaKind::Series).then_some(external_id),
        });
    }
}

/// Prefers the root folder whose path prefixes the symlink, falling back
/// to the first configured folder.
fn choose_root_folder<'f>(link: &str, root_folders: &'f [RootFolder]) -> Option<&'f RootFolder> {
    root_folders
        .iter()
        .find(|folder| link.starts_with(&folder.path))
        .or_else(|| root_folders.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: i32, path: &str) -> RootFolder {
        RootFolder {
            id,
            path: path.to_string(),
        }
    }

    #[test]
    fn root_folder_prefix_match_wins() {
        let folders = vec![folder(1, "/movies-a"), folder(2, "/movies-b")];
        let chosen = choose_root_folder("/movies-b/Movie [tmdb-5]/m.mkv", &folders).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[test]
    fn first_folder_is_the_fallback() {
        let folders = vec![folder(1, "/movies-a"), folder(2, "/movies-b")];
        let chosen = choose_root_folder("/elsewhere/Movie [tmdb-5]/m.mkv", &folders).unwrap();
        assert_eq!(chosen.id, 1);
    }

    #[test]
    fn no_folders_means_no_choice() {
        assert!(choose_root_folder("/movies/m.mkv", &[]).is_none());
    }
}
