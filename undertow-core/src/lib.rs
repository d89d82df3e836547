//! Undertow Core - Progressive byte-range fulfillment for media playback
//!
//! This crate lets a player start reading a remote or in-memory resource before
//! it has been fully retrieved, while a single sequential transfer assembles a
//! byte-accurate local copy: range requests are served from what has arrived,
//! buffered until enough data exists, or left pending.

pub mod config;
pub mod engine;
pub mod resource;
pub mod store;
pub mod tracing_setup;
pub mod transfer;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use engine::{
    EngineEvent, EngineEvents, FulfillmentError, FulfillmentHandle, RangeDelivery,
    RangeRequestHandle, spawn_fulfillment_engine,
};
pub use resource::{ContentMetadata, Resource};
pub use store::{BufferingMode, CacheError, DiskCache, FileCache};
pub use transfer::{HttpTransport, Transport, TransportError};

/// Core errors that can bubble up from any Undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Fulfillment error: {0}")]
    Fulfillment(#[from] FulfillmentError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Invalid resource location: {0}")]
    InvalidLocation(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Fulfillment(e) => match e {
                FulfillmentError::TransportFailure(transport) => {
                    format!("Download failed: {transport}")
                }
                FulfillmentError::CacheWriteFailure(cache) => {
                    format!("Could not write to cache: {cache}")
                }
                FulfillmentError::DisposedWhileIncomplete { .. } => {
                    "Download was cancelled before it finished".to_string()
                }
                _ => "Playback data error occurred".to_string(),
            },
            UndertowError::Transport(e) => format!("Network error: {e}"),
            UndertowError::Cache(_) => "Cache error occurred".to_string(),
            UndertowError::Configuration { .. } => "Configuration error occurred".to_string(),
            UndertowError::InvalidLocation(e) => format!("Invalid URL: {e}"),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::InvalidLocation(_)
                | UndertowError::Fulfillment(FulfillmentError::InvalidRange { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;
