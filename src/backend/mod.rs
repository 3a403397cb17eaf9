use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{
    Episode, MediaFile, MediaKind, Movie, QualityProfile, RootFolder, Series,
};

pub(crate) mod radarr;
pub(crate) mod sonarr;

/// Failures reported by a media backend.
#[derive(Debug, Error)]
pub(crate) enum BackendError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Classifies a benign "record already gone" response. Concurrent runs
    /// (or a prior pass) can delete a record between our listing and our
    /// fetch; the desired end state is absence, so this is informational
    /// rather than an error. The string fallback covers untyped messages
    /// until every call site produces the typed variant.
    pub(crate) fn is_not_found(&self) -> bool {
        match self {
            BackendError::NotFound(_) => true,
            BackendError::Status { status, .. } => *status == StatusCode::NOT_FOUND,
            other => other.to_string().to_lowercase().contains("not found"),
        }
    }
}

/// Narrow interface to one library-manager instance. All calls are
/// blocking; implementations must be shareable across worker threads.
pub(crate) trait MediaBackend: Send + Sync {
    /// Service name used in logs and report filenames (e.g. "sonarr").
    fn name(&self) -> &'static str;

    /// Which kind of media this backend manages.
    fn kind(&self) -> MediaKind;

    fn test_connection(&self) -> Result<(), BackendError>;

    fn list_series(&self) -> Result<Vec<Series>, BackendError>;
    fn list_movies(&self) -> Result<Vec<Movie>, BackendError>;
    fn get_movie(&self, id: i32) -> Result<Movie, BackendError>;
    fn list_episodes(&self, series_id: i32) -> Result<Vec<Episode>, BackendError>;

    fn get_episode_file(&self, id: i32) -> Result<MediaFile, BackendError>;
    fn get_movie_file(&self, id: i32) -> Result<MediaFile, BackendError>;
    fn delete_episode_file(&self, id: i32) -> Result<(), BackendError>;
    fn delete_movie_file(&self, id: i32) -> Result<(), BackendError>;

    /// Best-effort status correction after a record deletion. Failures are
    /// non-fatal; modern backends auto-correct on deletion anyway.
    fn update_episode(&self, episode: &Episode) -> Result<(), BackendError>;
    fn update_movie(&self, movie: &Movie) -> Result<(), BackendError>;

    fn trigger_refresh(&self) -> Result<(), BackendError>;

    fn list_root_folders(&self) -> Result<Vec<RootFolder>, BackendError>;
    fn list_quality_profiles(&self) -> Result<Vec<QualityProfile>, BackendError>;

    /// Looks for an existing collection entry with the given external
    /// catalog ID. `Ok(None)` means the item is not in the collection.
    fn get_movie_by_tmdb_id(&self, tmdb_id: i32) -> Result<Option<Movie>, BackendError>;
    fn get_series_by_tvdb_id(&self, tvdb_id: i32) -> Result<Option<Series>, BackendError>;

    /// Fetches catalog metadata for an item that is not yet in the collection.
    fn lookup_movie_by_tmdb_id(&self, tmdb_id: i32) -> Result<Movie, BackendError>;
    fn lookup_series_by_tvdb_id(&self, tvdb_id: i32) -> Result<Series, BackendError>;

    fn add_movie(&self, movie: &Movie) -> Result<Movie, BackendError>;
    fn add_series(&self, series: &Series) -> Result<Series, BackendError>;
}

/// Shared blocking HTTP plumbing for the *arr v3 REST APIs.
pub(crate) struct ArrHttp {
    base_url: String,
    api_key: String,
    client: Client,
}

impl ArrHttp {
    pub(crate) fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(ArrHttp {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `path` and decode the JSON body. A 404 maps to
    /// [`BackendError::NotFound`] carrying `what`.
    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> Result<T, BackendError> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()?;
        let response = expect_success(response, what)?;
        Ok(response.json()?)
    }

    /// GET `path` and check the status without decoding the body.
    pub(crate) fn get_ok(&self, path: &str, what: &str) -> Result<(), BackendError> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()?;
        expect_success(response, what)?;
        Ok(())
    }

    /// DELETE `path`. A 404 is treated as success: the record being gone is
    /// exactly the end state a deletion wants.
    pub(crate) fn delete(&self, path: &str, what: &str) -> Result<(), BackendError> {
        let url = self.url(path);
        debug!("DELETE {}", url);
        let response = self
            .client
            .delete(&url)
            .header("X-Api-Key", &self.api_key)
            .send()?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("{} already absent, treating delete as success", what);
            return Ok(());
        }
        expect_success(response, what)?;
        Ok(())
    }

    /// POST a JSON body and decode the JSON response.
    pub(crate) fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<T, BackendError> {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()?;
        let response = expect_success(response, what)?;
        Ok(response.json()?)
    }

    /// POST a JSON body, checking only the status.
    pub(crate) fn post_ok<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<(), BackendError> {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()?;
        expect_success(response, what)?;
        Ok(())
    }

    /// PUT a JSON body, checking only the status.
    pub(crate) fn put_ok<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<(), BackendError> {
        let url = self.url(path);
        debug!("PUT {}", url);
        let response = self
            .client
            .put(&url)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()?;
        expect_success(response, what)?;
        Ok(())
    }
}

fn expect_success(response: Response, what: &str) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound(what.to_string()));
    }
    Err(BackendError::Status {
        status,
        url: response.url().to_string(),
    })
}
