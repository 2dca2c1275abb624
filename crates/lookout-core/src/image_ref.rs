//! Persisted image references.
//!
//! Gallery images are stored inline as `data:<mime>;base64,<payload>` URLs.
//! Any other string is taken to be a path to an image file on disk.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

#[derive(Error, Debug)]
pub enum ImageRefError {
    #[error("malformed data URL: {0}")]
    MalformedDataUrl(String),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reference to one gallery image, serialized as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    /// Wrap an existing reference string (data URL or file path).
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Encode raw image bytes as an inline data URL.
    pub fn from_bytes(bytes: &[u8], mime: &str) -> Self {
        Self(format!(
            "{DATA_URL_PREFIX}{mime}{BASE64_MARKER}{}",
            STANDARD.encode(bytes)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_inline(&self) -> bool {
        self.0.starts_with(DATA_URL_PREFIX)
    }

    /// MIME type of an inline reference, if present.
    pub fn mime(&self) -> Option<&str> {
        let rest = self.0.strip_prefix(DATA_URL_PREFIX)?;
        let end = rest.find(BASE64_MARKER)?;
        Some(&rest[..end])
    }

    /// Resolve the reference to the encoded image bytes.
    pub fn load_bytes(&self) -> Result<Vec<u8>, ImageRefError> {
        match self.0.strip_prefix(DATA_URL_PREFIX) {
            Some(rest) => {
                let (_, payload) = rest
                    .split_once(BASE64_MARKER)
                    .ok_or_else(|| ImageRefError::MalformedDataUrl(self.short()))?;
                Ok(STANDARD.decode(payload.trim())?)
            }
            None => std::fs::read(Path::new(&self.0)).map_err(|source| ImageRefError::Io {
                path: self.0.clone(),
                source,
            }),
        }
    }

    /// Abbreviated form for log output; inline payloads can be megabytes long.
    pub fn short(&self) -> String {
        const MAX: usize = 48;
        match self.0.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}…", &self.0[..idx]),
            None => self.0.clone(),
        }
    }
}

impl From<&str> for ImageRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ImageRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_roundtrip_bytes() {
        let bytes = [0u8, 1, 2, 250, 251, 255];
        let r = ImageRef::from_bytes(&bytes, "image/png");
        assert!(r.is_inline());
        assert_eq!(r.mime(), Some("image/png"));
        assert!(r.as_str().starts_with("data:image/png;base64,"));
        assert_eq!(r.load_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_data_url_without_base64_marker() {
        let r = ImageRef::new("data:image/png,rawpayload");
        assert!(matches!(r.load_bytes(), Err(ImageRefError::MalformedDataUrl(_))));
    }

    #[test]
    fn test_data_url_bad_payload() {
        let r = ImageRef::new("data:image/png;base64,!!!not-base64!!!");
        assert!(matches!(r.load_bytes(), Err(ImageRefError::Base64(_))));
    }

    #[test]
    fn test_path_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.bin");
        std::fs::write(&path, b"abc").unwrap();

        let r = ImageRef::new(path.to_string_lossy().into_owned());
        assert!(!r.is_inline());
        assert_eq!(r.mime(), None);
        assert_eq!(r.load_bytes().unwrap(), b"abc");
    }

    #[test]
    fn test_missing_path_reference() {
        let r = ImageRef::new("/nonexistent/lookout/face.png");
        assert!(matches!(r.load_bytes(), Err(ImageRefError::Io { .. })));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let r = ImageRef::new("X");
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"X\"");
        let back: ImageRef = serde_json::from_str("\"X\"").unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_short_truncates_long_refs() {
        let r = ImageRef::from_bytes(&[7u8; 512], "image/jpeg");
        let short = r.short();
        assert!(short.chars().count() <= 49);
        assert!(short.starts_with("data:image/jpeg"));
    }
}
