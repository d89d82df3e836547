//! HTTP transport built on reqwest

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{ACCEPT_ENCODING, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_TYPE, HeaderMap};
use url::Url;

use super::{ResponseMetadata, Transport, TransportError, TransportResponse};
use crate::config::NetworkConfig;

/// Production transport issuing one plain GET per resource.
///
/// Requests identity encoding so the reported length matches the delivered
/// bytes, and asks intermediaries not to serve a cached copy. No overall
/// timeout is set; only connecting is bounded.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport from network configuration.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connection` - If the HTTP client cannot be built
    pub fn new(config: &NetworkConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| TransportError::Connection {
                url: String::new(),
                reason: format!("HTTP client creation failed: {e}"),
            })?;

        Ok(Self { client })
    }

    fn connection_error(url: &Url, error: &reqwest::Error) -> TransportError {
        let reason = if error.is_timeout() {
            "request timed out".to_string()
        } else if error.is_connect() {
            "failed to connect".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            error.to_string()
        };

        TransportError::Connection {
            url: url.to_string(),
            reason,
        }
    }
}

/// Extracts the headers fulfillment cares about.
fn response_metadata(status: u16, headers: &HeaderMap, content_length: Option<u64>) -> ResponseMetadata {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let accept_ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("bytes"));

    ResponseMetadata {
        status,
        content_type,
        content_length,
        accept_ranges,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT_ENCODING, "identity")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| Self::connection_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let metadata = response_metadata(
            status.as_u16(),
            response.headers(),
            response.content_length(),
        );
        let body = response
            .bytes_stream()
            .map_err(|e| TransportError::Body {
                reason: e.to_string(),
            });

        Ok(TransportResponse {
            metadata,
            body: Box::pin(body),
        })
    }
}
