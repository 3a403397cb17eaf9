use std::time::Duration;

use log::{debug, info};
use serde_json::json;

use crate::backend::{ArrHttp, BackendError, MediaBackend};
use crate::models::{
    Episode, MediaFile, MediaKind, Movie, QualityProfile, RootFolder, Series,
};

/// Blocking client for the Sonarr v3 API.
pub(crate) struct SonarrBackend {
    http: ArrHttp,
}

impl SonarrBackend {
    pub(crate) fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(SonarrBackend {
            http: ArrHttp::new(base_url, api_key, timeout)?,
        })
    }
}

impl MediaBackend for SonarrBackend {
    fn name(&self) -> &'static str {
        "sonarr"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Series
    }

    fn test_connection(&self) -> Result<(), BackendError> {
        self.http.get_ok("/api/v3/system/status", "system status")?;
        info!("Successfully connected to Sonarr");
        Ok(())
    }

    fn list_series(&self) -> Result<Vec<Series>, BackendError> {
        let series: Vec<Series> = self.http.get_json("/api/v3/series", "series list")?;
        debug!("Fetched {} series from Sonarr", series.len());
        Ok(series)
    }

    fn list_movies(&self) -> Result<Vec<Movie>, BackendError> {
        Err(BackendError::Unsupported("listing movies"))
    }

    fn get_movie(&self, _id: i32) -> Result<Movie, BackendError> {
        Err(BackendError::Unsupported("fetching a movie"))
    }

    fn list_episodes(&self, series_id: i32) -> Result<Vec<Episode>, BackendError> {
        let episodes: Vec<Episode> = self.http.get_json(
            &format!("/api/v3/episode?seriesId={series_id}"),
            &format!("episodes for series {series_id}"),
        )?;
        debug!(
            "Fetched {} episodes for series {}",
            episodes.len(),
            series_id
        );
        Ok(episodes)
    }

    fn get_episode_file(&self, id: i32) -> Result<MediaFile, BackendError> {
        self.http.get_json(
            &format!("/api/v3/episodefile/{id}"),
            &format!("episode file {id}"),
        )
    }

    fn get_movie_file(&self, _id: i32) -> Result<MediaFile, BackendError> {
        Err(BackendError::Unsupported("fetching a movie file"))
    }

    fn delete_episode_file(&self, id: i32) -> Result<(), BackendError> {
        self.http.delete(
            &format!("/api/v3/episodefile/{id}"),
            &format!("episode file {id}"),
        )?;
        debug!("Deleted episode file record {}", id);
        Ok(())
    }

    fn delete_movie_file(&self, _id: i32) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("deleting a movie file"))
    }

    fn update_episode(&self, episode: &Episode) -> Result<(), BackendError> {
        // Minimal payload resetting the file reference.
        let body = json!({
            "hasFile": false,
            "episodeFileId": null,
        });
        self.http.put_ok(
            &format!("/api/v3/episode/{}", episode.id),
            &body,
            &format!("episode {}", episode.id),
        )
    }

    fn update_movie(&self, _movie: &Movie) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("updating a movie"))
    }

    fn trigger_refresh(&self) -> Result<(), BackendError> {
        let command = json!({ "name": "MissingEpisodeSearch" });
        self.http
            .post_ok("/api/v3/command", &command, "refresh command")?;
        info!("Missing episode search triggered");
        Ok(())
    }

    fn list_root_folders(&self) -> Result<Vec<RootFolder>, BackendError> {
        self.http.get_json("/api/v3/rootfolder", "root folders")
    }

    fn list_quality_profiles(&self) -> Result<Vec<QualityProfile>, BackendError> {
        self.http
            .get_json("/api/v3/qualityprofile", "quality profiles")
    }

    fn get_movie_by_tmdb_id(&self, _tmdb_id: i32) -> Result<Option<Movie>, BackendError> {
        Err(BackendError::Unsupported("looking up movies by TMDB ID"))
    }

    fn get_series_by_tvdb_id(&self, tvdb_id: i32) -> Result<Option<Series>, BackendError> {
        let matches: Vec<Series> = self.http.get_json(
            &format!("/api/v3/series?tvdbId={tvdb_id}"),
            &format!("series with TVDB ID {tvdb_id}"),
        )?;
        Ok(matches.into_iter().next())
    }

    fn lookup_movie_by_tmdb_id(&self, _tmdb_id: i32) -> Result<Movie, BackendError> {
        Err(BackendError::Unsupported("looking up movies by TMDB ID"))
    }

    fn lookup_series_by_tvdb_id(&self, tvdb_id: i32) -> Result<Series, BackendError> {
        let matches: Vec<Series> = self.http.get_json(
            &format!("/api/v3/series/lookup?term=tvdb:{tvdb_id}"),
            &format!("series lookup for TVDB ID {tvdb_id}"),
        )?;
        matches
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("series lookup for TVDB ID {tvdb_id}")))
    }

    fn add_movie(&self, _movie: &Movie) -> Result<Movie, BackendError> {
        Err(BackendError::Unsupported("adding a movie"))
    }

    fn add_series(&self, series: &Series) -> Result<Series, BackendError> {
        let added: Series = self.http.post_json(
            "/api/v3/series",
            series,
            &format!("add series {}", series.title),
        )?;
        info!("Added series to collection: {}", added.title);
        Ok(added)
    }
}
