//! Remote beacon resolution.
//!
//! The backend maps a beacon identifier to the location it is installed
//! at. [`HttpResolver`] talks to `POST {base_url}/beacons/resolve`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::ResolverSettings;
use crate::types::ResolveResponse;

/// Errors raised while resolving a beacon.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The configured base URL cannot be used.
    #[error("Invalid resolver URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request could not be sent or the body could not be decoded.
    #[error("Resolver request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Resolver returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Resolver specific failure.
    #[error("{0}")]
    Backend(String),
}

/// Result alias for resolver operations.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Translates a beacon identifier into backend metadata.
#[async_trait]
pub trait BeaconResolver: Send + Sync + 'static {
    /// Resolve one beacon.
    async fn resolve(&self, identifier: &str) -> ResolveResult<ResolveResponse>;
}

#[derive(Debug, Serialize)]
struct ResolveRequest<'a> {
    uuid: &'a str,
}

/// HTTP client for the beacon resolve endpoint.
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpResolver {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Create a resolver for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str, timeout: Duration) -> ResolveResult<Self> {
        let endpoint = resolve_endpoint(base_url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Create a resolver from the `[resolver]` settings.
    ///
    /// # Errors
    ///
    /// See [`HttpResolver::new`].
    pub fn from_settings(settings: &ResolverSettings) -> ResolveResult<Self> {
        Self::new(&settings.base_url, settings.timeout())
    }

    /// Full URL requests are sent to.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl BeaconResolver for HttpResolver {
    async fn resolve(&self, identifier: &str) -> ResolveResult<ResolveResponse> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&ResolveRequest { uuid: identifier })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

/// Join `beacons/resolve` onto a base URL, keeping any path prefix
/// (`http://host/api` -> `http://host/api/beacons/resolve`).
fn resolve_endpoint(base_url: &str) -> ResolveResult<Url> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join("beacons/resolve")?)
}
