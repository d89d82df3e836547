//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use undertow_core::config::UndertowConfig;
use undertow_core::engine::EngineEvents;
use undertow_core::store::BufferingMode;
use undertow_core::{
    EngineEvent, FileCache, HttpTransport, Resource, Result, UndertowError,
    spawn_fulfillment_engine,
};
use url::Url;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Download a resource to a file
    Fetch {
        /// URL of the resource
        url: String,
        /// Destination file; defaults to a file in the cache directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// File extension used to infer the content type
        #[arg(long)]
        extension: Option<String>,
        /// Stream straight to the destination instead of buffering in memory
        #[arg(long)]
        disk: bool,
        /// Largest single delivery in disk mode, in bytes
        #[arg(long)]
        max_buffer_size: Option<u64>,
    },
    /// Resolve metadata and read one byte range
    Probe {
        /// URL of the resource
        url: String,
        /// First byte to read
        #[arg(long, default_value = "0")]
        offset: u64,
        /// Number of bytes to read
        #[arg(long, default_value = "1024")]
        length: u64,
        /// File extension used to infer the content type
        #[arg(long)]
        extension: Option<String>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    let config = UndertowConfig::from_env();
    match command {
        Commands::Fetch {
            url,
            output,
            extension,
            disk,
            max_buffer_size,
        } => {
            let resource = parse_resource(&url, extension)?;
            fetch(config, resource, output, disk, max_buffer_size).await
        }
        Commands::Probe {
            url,
            offset,
            length,
            extension,
        } => {
            let resource = parse_resource(&url, extension)?;
            probe(config, resource, offset, length).await
        }
    }
}

/// Parses a URL into a remote resource.
///
/// # Errors
/// - `UndertowError::InvalidLocation` - URL could not be parsed
fn parse_resource(url: &str, extension: Option<String>) -> Result<Resource> {
    let url = Url::parse(url)?;
    Ok(match extension {
        Some(extension) => Resource::remote_with_extension(url, extension),
        None => Resource::remote(url),
    })
}

/// Last path segment of the resource URL, used to name default outputs.
fn file_name(resource: &Resource) -> String {
    resource
        .url()
        .and_then(|url| url.path_segments())
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// Download a whole resource, in memory or through a file cache
///
/// # Errors
/// - `UndertowError::Configuration` - Zero max buffer size
/// - `UndertowError::Fulfillment` - Transfer or cache write failed
/// - `UndertowError::Io` - Writing the output failed
pub async fn fetch(
    mut config: UndertowConfig,
    resource: Resource,
    output: Option<PathBuf>,
    disk: bool,
    max_buffer_size: Option<u64>,
) -> Result<()> {
    if let Some(max_buffer_size) = max_buffer_size {
        if max_buffer_size == 0 {
            return Err(UndertowError::Configuration {
                reason: "max buffer size must be at least one byte".to_string(),
            });
        }
        config.engine.max_buffer_size = max_buffer_size;
    }

    let transport = Arc::new(HttpTransport::new(&config.network)?);
    let (mode, output) = if disk {
        let cache = match output {
            Some(path) => FileCache::create(path).await?,
            None => FileCache::in_dir(&config.cache, &file_name(&resource)).await?,
        };
        let output = cache.path().to_path_buf();
        (BufferingMode::disk(Arc::new(cache), &config.engine), output)
    } else {
        let output = output.unwrap_or_else(|| config.cache.cache_dir.join(file_name(&resource)));
        (BufferingMode::Memory, output)
    };

    if let Some(url) = resource.url() {
        println!("Fetching {url}");
    }
    let (handle, mut events) = spawn_fulfillment_engine(resource, mode, transport, &config);
    handle.start_download().await?;

    let result = wait_for_completion(&mut events).await;
    handle.dispose().await;

    match result? {
        Some(payload) => {
            if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&output, &payload).await?;
            println!("Wrote {} bytes to {}", payload.len(), output.display());
        }
        None => println!("Cached to {}", output.display()),
    }

    Ok(())
}

/// Print resource metadata and the size of one range read
///
/// # Errors
/// - `UndertowError::Fulfillment` - Range could not be fulfilled
pub async fn probe(config: UndertowConfig, resource: Resource, offset: u64, length: u64) -> Result<()> {
    let transport = Arc::new(HttpTransport::new(&config.network)?);
    let (handle, _events) =
        spawn_fulfillment_engine(resource, BufferingMode::Memory, transport, &config);

    let request = handle.request_range(offset, length)?;
    let result = request.collect().await;
    handle.dispose().await;
    let (metadata, bytes) = result?;

    let report = serde_json::json!({
        "content_type": metadata.content_type,
        "content_length": metadata.content_length,
        "supports_range_access": metadata.supports_range_access,
        "offset": offset,
        "bytes_read": bytes.len(),
    });
    println!("{report:#}");

    Ok(())
}

/// Follows engine events until the download finishes.
///
/// Returns the payload in memory mode and `None` once a disk cache is complete.
async fn wait_for_completion(events: &mut EngineEvents) -> Result<Option<bytes::Bytes>> {
    let mut last_percent = None;
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::MetadataResolved(metadata) => {
                println!(
                    "  {} ({})",
                    metadata.content_type,
                    metadata
                        .content_length
                        .map_or_else(|| "unknown length".to_string(), |len| format!("{len} bytes"))
                );
            }
            EngineEvent::Progress {
                bytes_downloaded,
                bytes_expected: Some(total),
            } if total > 0 => {
                let percent = bytes_downloaded * 100 / total;
                if last_percent.is_none_or(|last| percent >= last + 10) {
                    println!("  {percent}%");
                    last_percent = Some(percent);
                }
            }
            EngineEvent::Downloaded { payload } => return Ok(Some(payload)),
            EngineEvent::CacheCompleted { .. } => return Ok(None),
            EngineEvent::DownloadFailed { error } => return Err(error.into()),
            _ => {}
        }
    }

    Err(undertow_core::FulfillmentError::EngineShutdown.into())
}
