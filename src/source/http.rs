//! HTTP gateway to the learning platform's JSON API.
//!
//! Listings are fetched from `{base_url}/courses/{course_id}/{kind}` and are
//! expected to be a JSON array of [`RawItem`] objects.  Status codes are
//! mapped onto the [`FetchError`] taxonomy: 401/403 become `Auth`, any other
//! non-success status becomes `Network`, and an undecodable body becomes
//! `MalformedResponse`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{ContentGateway, ContentType, RawItem};
use crate::error::FetchError;

/// A gateway backed by the platform's HTTP API.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
    label: String,
}

impl HttpGateway {
    /// Create a new HTTP gateway.
    ///
    /// # Arguments
    ///
    /// * `base_url` — API root, without a trailing slash.
    /// * `token` — optional bearer token sent with every request.
    /// * `timeout` — per-request bound enforced by the HTTP client.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            label: base_url.clone(),
            base_url,
            token,
        })
    }

    fn listing_url(&self, course_id: &str, kind: ContentType) -> String {
        format!("{}/courses/{}/{}", self.base_url, course_id, kind.as_str())
    }

    /// Decode a listing body into [`RawItem`]s.
    ///
    /// This is a pure function (no I/O) so that tests can exercise decoding
    /// without hitting the network.
    pub fn parse_listing(body: &[u8]) -> Result<Vec<RawItem>, FetchError> {
        serde_json::from_slice(body).map_err(|e| FetchError::MalformedResponse(e.to_string()))
    }

    /// Map a response status onto the error taxonomy.
    pub fn check_status(status: StatusCode) -> Result<(), FetchError> {
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FetchError::Auth(format!("server returned {status}")))
            }
            _ => Err(FetchError::Network(format!("server returned {status}"))),
        }
    }
}

#[async_trait]
impl ContentGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.label
    }

    async fn fetch_course_content(
        &self,
        course_id: &str,
        kind: ContentType,
    ) -> Result<Vec<RawItem>, FetchError> {
        let url = self.listing_url(course_id, kind);
        debug!(%url, "fetching listing");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Self::check_status(response.status())?;

        let body = response.bytes().await?;
        Self::parse_listing(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
