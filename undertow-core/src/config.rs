//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub engine: EngineConfig,
    pub network: NetworkConfig,
    pub cache: CacheConfig,
}

/// Fulfillment engine tuning.
///
/// Controls how much data a single disk-mode delivery may carry and how much
/// must be readable before playback is signalled as ready.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single disk-mode delivery to a pending range request
    pub max_buffer_size: u64,
    /// Readable bytes required before the ready-to-play notification fires
    pub prebuffer_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 1_048_576, // 1 MiB
            prebuffer_bytes: 65_536,    // 64 KiB
        }
    }
}

/// HTTP transport configuration.
///
/// No overall request timeout is applied: a transfer may legitimately run for
/// the whole length of the resource.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Maximum redirects followed before the transfer fails
    pub max_redirects: usize,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_redirects: 5,
            user_agent: "undertow/0.1.0".to_string(),
        }
    }
}

/// File-backed cache configuration used by the CLI and `FileCache`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory where cache files are created
    pub cache_dir: PathBuf,
    /// Extension forced onto cached files and used for content-type guessing
    pub file_extension: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            file_extension: None,
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Engine configuration overrides
        if let Ok(size) = std::env::var("UNDERTOW_MAX_BUFFER_SIZE") {
            if let Ok(bytes) = size.parse::<u64>() {
                if bytes > 0 {
                    config.engine.max_buffer_size = bytes;
                }
            }
        }

        if let Ok(prebuffer) = std::env::var("UNDERTOW_PREBUFFER_BYTES") {
            if let Ok(bytes) = prebuffer.parse::<u64>() {
                config.engine.prebuffer_bytes = bytes;
            }
        }

        // Network configuration overrides
        if let Ok(timeout) = std::env::var("UNDERTOW_CONNECT_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.network.connect_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(user_agent) = std::env::var("UNDERTOW_USER_AGENT") {
            if !user_agent.is_empty() {
                config.network.user_agent = user_agent;
            }
        }

        // Cache configuration overrides
        if let Ok(dir) = std::env::var("UNDERTOW_CACHE_DIR") {
            if !dir.is_empty() {
                config.cache.cache_dir = PathBuf::from(dir);
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Small windows make windowed delivery observable with tiny payloads.
    pub fn for_testing() -> Self {
        Self {
            engine: EngineConfig {
                max_buffer_size: 64,
                prebuffer_bytes: 16,
            },
            network: NetworkConfig {
                connect_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            cache: CacheConfig::default(),
        }
    }
}
