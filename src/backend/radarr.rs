use std::time::Duration;

use log::{debug, info};
use serde_json::json;

use crate::backend::{ArrHttp, BackendError, MediaBackend};
use crate::models::{
    Episode, MediaFile, MediaKind, Movie, QualityProfile, RootFolder, Series,
};

/// Blocking client for the Radarr v3 API.
pub(crate) struct RadarrBackend {
    http: ArrHttp,
}

impl RadarrBackend {
    pub(crate) fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(RadarrBackend {
            http: ArrHttp::new(base_url, api_key, timeout)?,
        })
    }
}

impl MediaBackend for RadarrBackend {
    fn name(&self) -> &'static str {
        "radarr"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Movie
    }

    fn test_connection(&self) -> Result<(), BackendError> {
        self.http.get_ok("/api/v3/system/status", "system status")?;
        info!("Successfully connected to Radarr");
        Ok(())
    }

    fn list_series(&self) -> Result<Vec<Series>, BackendError> {
        Err(BackendError::Unsupported("listing series"))
    }

    fn list_movies(&self) -> Result<Vec<Movie>, BackendError> {
        let movies: Vec<Movie> = self.http.get_json("/api/v3/movie", "movie list")?;
        debug!("Fetched {} movies from Radarr", movies.len());
        Ok(movies)
    }

    fn get_movie(&self, id: i32) -> Result<Movie, BackendError> {
        self.http
            .get_json(&format!("/api/v3/movie/{id}"), &format!("movie {id}"))
    }

    fn list_episodes(&self, _series_id: i32) -> Result<Vec<Episode>, BackendError> {
        Err(BackendError::Unsupported("listing episodes"))
    }

    fn get_episode_file(&self, _id: i32) -> Result<MediaFile, BackendError> {
        Err(BackendError::Unsupported("fetching an episode file"))
    }

    fn get_movie_file(&self, id: i32) -> Result<MediaFile, BackendError> {
        self.http.get_json(
            &format!("/api/v3/moviefile/{id}"),
            &format!("movie file {id}"),
        )
    }

    fn delete_episode_file(&self, _id: i32) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("deleting an episode file"))
    }

    fn delete_movie_file(&self, id: i32) -> Result<(), BackendError> {
        self.http.delete(
            &format!("/api/v3/moviefile/{id}"),
            &format!("movie file {id}"),
        )?;
        debug!("Deleted movie file record {}", id);
        Ok(())
    }

    fn update_episode(&self, _episode: &Episode) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("updating an episode"))
    }

    fn update_movie(&self, movie: &Movie) -> Result<(), BackendError> {
        // Minimal payload resetting the file reference.
        let body = json!({
            "hasFile": false,
            "movieFileId": null,
        });
        self.http.put_ok(
            &format!("/api/v3/movie/{}", movie.id),
            &body,
            &format!("movie {}", movie.id),
        )
    }

    fn trigger_refresh(&self) -> Result<(), BackendError> {
        let command = json!({ "name": "MissingMoviesSearch" });
        self.http
            .post_ok("/api/v3/command", &command, "refresh command")?;
        info!("Missing movies search triggered");
        Ok(())
    }

    fn list_root_folders(&self) -> Result<Vec<RootFolder>, BackendError> {
        self.http.get_json("/api/v3/rootfolder", "root folders")
    }

    fn list_quality_profiles(&self) -> Result<Vec<QualityProfile>, BackendError> {
        self.http
            .get_json("/api/v3/qualityprofile", "quality profiles")
    }

    fn get_movie_by_tmdb_id(&self, tmdb_id: i32) -> Result<Option<Movie>, BackendError> {
        let matches: Vec<Movie> = self.http.get_json(
            &format!("/api/v3/movie?tmdbId={tmdb_id}"),
            &format!("movie with TMDB ID {tmdb_id}"),
        )?;
        Ok(matches.into_iter().next())
    }

    fn get_series_by_tvdb_id(&self, _tvdb_id: i32) -> Result<Option<Series>, BackendError> {
        Err(BackendError::Unsupported("looking up series by TVDB ID"))
    }

    fn lookup_movie_by_tmdb_id(&self, tmdb_id: i32) -> Result<Movie, BackendError> {
        self.http.get_json(
            &format!("/api/v3/movie/lookup/tmdb?tmdbId={tmdb_id}"),
            &format!("movie lookup for TMDB ID {tmdb_id}"),
        )
    }

    fn lookup_series_by_tvdb_id(&self, _tvdb_id: i32) -> Result<Series, BackendError> {
        Err(BackendError::Unsupported("looking up series by TVDB ID"))
    }

    fn add_movie(&self, movie: &Movie) -> Result<Movie, BackendError> {
        let added: Movie = self.http.post_json(
            "/api/v3/movie",
            movie,
            &format!("add movie {}", movie.title),
        )?;
        info!("Added movie to collection: {} ({})", added.title, added.year);
        Ok(added)
    }

    fn add_series(&self, _series: &Series) -> Result<Series, BackendError> {
        Err(BackendError::Unsupported("adding a series"))
    }
}
