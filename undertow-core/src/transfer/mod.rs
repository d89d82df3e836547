//! Sequential transfer of a remote resource.
//!
//! The transport collaborator produces response metadata and an ordered body
//! stream; [`TransferSession`] drives exactly one such transfer per engine and
//! marshals what it sees back to the engine as [`TransferEvent`]s.

pub mod http;
pub mod session;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
pub use http::HttpTransport;
pub use session::{TransferEvent, TransferSession, TransferState};
use url::Url;

/// Ordered body chunks of a transfer, starting at offset 0.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Response headers relevant to fulfillment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// HTTP-like status code
    pub status: u16,
    pub content_type: Option<String>,
    /// Declared body length, when the origin reports one
    pub content_length: Option<u64>,
    /// Whether the origin advertised byte-range support
    pub accept_ranges: bool,
}

/// An opened transfer: headers plus the body stream.
pub struct TransportResponse {
    pub metadata: ResponseMetadata,
    pub body: ByteStream,
}

/// Byte-producing collaborator used by [`TransferSession`].
///
/// Implementations must deliver the whole resource from its first byte, in
/// order, without transport-level caching or content encoding.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a full, sequential transfer of `url`.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connection` - Request could not be sent
    /// - `TransportError::HttpStatus` - Origin answered with a non-success status
    async fn open(&self, url: &Url) -> Result<TransportResponse, TransportError>;
}

/// Errors surfaced by a transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the connection dropped before headers
    #[error("connection to {url} failed: {reason}")]
    Connection {
        /// Resource address
        url: String,
        /// Description of the failure
        reason: String,
    },

    /// The origin answered with a non-success status
    #[error("{url} answered with HTTP {status}")]
    HttpStatus {
        /// Resource address
        url: String,
        /// Status code received
        status: u16,
    },

    /// The body stream failed part way through
    #[error("body stream failed: {reason}")]
    Body {
        /// Description of the failure
        reason: String,
    },
}
