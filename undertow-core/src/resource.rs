//! The resource being played and the content metadata reported for it.

use bytes::Bytes;
use serde::Serialize;
use url::Url;

use crate::transfer::ResponseMetadata;

/// Content type reported when nothing better is known.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Where the bytes of a resource come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResourceLocation {
    /// Fetched sequentially from a network address
    Remote(Url),
    /// Supplied in full by the caller at construction
    InMemory(Bytes),
}

/// The media byte stream an engine fulfills requests for.
///
/// Exactly one resource exists per engine and it never changes after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    location: ResourceLocation,
    declared_content_type: Option<String>,
    file_extension: Option<String>,
}

impl Resource {
    /// Creates a resource fetched from `url`.
    pub fn remote(url: Url) -> Self {
        Self {
            location: ResourceLocation::Remote(url),
            declared_content_type: None,
            file_extension: None,
        }
    }

    /// Creates a remote resource whose URL does not carry a usable extension.
    ///
    /// The extension is only used to guess a content type when the server
    /// does not send one.
    pub fn remote_with_extension(url: Url, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            file_extension: Some(extension.trim_start_matches('.').to_string()),
            ..Self::remote(url)
        }
    }

    /// Creates a resource from a payload the caller already holds.
    pub fn in_memory(payload: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            location: ResourceLocation::InMemory(payload),
            declared_content_type: Some(content_type.into()),
            file_extension: None,
        }
    }

    /// Declares the media type up front for a remote resource.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.declared_content_type = Some(content_type.into());
        self
    }

    /// Returns the network address, if this is a remote resource.
    pub fn url(&self) -> Option<&Url> {
        match &self.location {
            ResourceLocation::Remote(url) => Some(url),
            ResourceLocation::InMemory(_) => None,
        }
    }

    /// Returns the caller-supplied payload, if any.
    pub fn payload(&self) -> Option<&Bytes> {
        match &self.location {
            ResourceLocation::InMemory(payload) => Some(payload),
            ResourceLocation::Remote(_) => None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.location, ResourceLocation::InMemory(_))
    }

    /// Guesses a content type from the custom extension or the URL path.
    pub fn guessed_content_type(&self) -> Option<String> {
        if let Some(extension) = &self.file_extension {
            return mime_guess::from_ext(extension)
                .first_raw()
                .map(str::to_string);
        }

        self.url().and_then(|url| {
            mime_guess::from_path(url.path())
                .first_raw()
                .map(str::to_string)
        })
    }

    /// Metadata for an in-memory resource, known immediately.
    pub fn in_memory_metadata(&self) -> Option<ContentMetadata> {
        let payload = self.payload()?;
        Some(ContentMetadata {
            content_type: self.resolve_content_type(None),
            content_length: Some(payload.len() as u64),
            supports_range_access: true,
        })
    }

    /// Metadata derived from the first network response.
    pub fn metadata_from_response(&self, response: &ResponseMetadata) -> ContentMetadata {
        ContentMetadata {
            content_type: self.resolve_content_type(response.content_type.as_deref()),
            content_length: response.content_length,
            // Ranges are served from the engine's own store, not the origin.
            supports_range_access: true,
        }
    }

    /// Picks the reported content type: response, then declared, then guessed.
    fn resolve_content_type(&self, response_type: Option<&str>) -> String {
        response_type
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.declared_content_type.clone())
            .or_else(|| self.guessed_content_type())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
    }
}

/// What a player needs to know before it can interpret range data.
///
/// Filled in exactly once per engine and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentMetadata {
    pub content_type: String,
    /// Total length in bytes; `None` when the origin did not report one
    pub content_length: Option<u64>,
    pub supports_range_access: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse(&format!("http://media.example.com{path}")).unwrap()
    }

    #[test]
    fn test_in_memory_metadata_is_immediate() {
        let resource = Resource::in_memory(Bytes::from_static(b"ID3\x04abc"), "audio/mpeg");
        let metadata = resource.in_memory_metadata().unwrap();

        assert_eq!(metadata.content_type, "audio/mpeg");
        assert_eq!(metadata.content_length, Some(7));
        assert!(metadata.supports_range_access);
        assert!(resource.url().is_none());
    }

    #[test]
    fn test_remote_resource_has_no_immediate_metadata() {
        let resource = Resource::remote(url("/track.mp3"));
        assert!(resource.in_memory_metadata().is_none());
        assert!(!resource.is_in_memory());
    }

    #[test]
    fn test_response_content_type_wins() {
        let resource = Resource::remote(url("/track.mp3")).with_content_type("audio/x-declared");
        let response = ResponseMetadata {
            status: 200,
            content_type: Some("audio/aac".to_string()),
            content_length: Some(1000),
            accept_ranges: false,
        };

        let metadata = resource.metadata_from_response(&response);
        assert_eq!(metadata.content_type, "audio/aac");
        assert_eq!(metadata.content_length, Some(1000));
        assert!(metadata.supports_range_access);
    }

    #[test]
    fn test_content_type_falls_back_to_declared_then_guess() {
        let response = ResponseMetadata::default();

        let declared = Resource::remote(url("/stream")).with_content_type("video/mp4");
        assert_eq!(
            declared.metadata_from_response(&response).content_type,
            "video/mp4"
        );

        let guessed = Resource::remote(url("/episode.mp3"));
        assert_eq!(
            guessed.metadata_from_response(&response).content_type,
            "audio/mpeg"
        );

        let custom = Resource::remote_with_extension(url("/stream?id=7"), ".mp4");
        assert_eq!(
            custom.metadata_from_response(&response).content_type,
            "video/mp4"
        );

        let unknown = Resource::remote(url("/stream"));
        assert_eq!(
            unknown.metadata_from_response(&response).content_type,
            FALLBACK_CONTENT_TYPE
        );
    }

    #[test]
    fn test_metadata_serializes_for_display() {
        let metadata = ContentMetadata {
            content_type: "audio/mpeg".to_string(),
            content_length: None,
            supports_range_access: true,
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"content_length\":null"));
    }
}
