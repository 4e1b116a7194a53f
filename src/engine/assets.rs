use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Metadata of a stored asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    /// Filename, unique within the store.
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

/// Parameters of an asset upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl UploadOptions {
    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: None,
        }
    }
}

/// Requested image transformation when reading an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

impl TransformOptions {
    /// True when at least one transformation is requested.
    pub fn is_requested(&self) -> bool {
        self.width.is_some() || self.height.is_some() || self.format.is_some() || self.quality.is_some()
    }
}

/// Resizes or re-encodes image bytes. Implemented outside this crate.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    /// Returns the transformed bytes and their content type.
    async fn transform(&self, bytes: Vec<u8>, options: &TransformOptions) -> Result<(Vec<u8>, String)>;
}

/// Infers a content type from a filename's extension.
pub fn content_type_for(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "csv" => "text/csv",
        "zip" => "application/zip",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

/// The `attempt`-th candidate name for `filename`: the name itself for 0, otherwise
/// `-<attempt>` inserted before the extension (`test.jpg` -> `test-1.jpg`).
pub fn candidate_name(filename: &str, attempt: u32) -> String {
    if attempt == 0 {
        return filename.to_string();
    }
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{}{}", &filename[..dot], attempt, &filename[dot..]),
        _ => format!("{filename}-{attempt}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_name("test.jpg", 0), "test.jpg");
        assert_eq!(candidate_name("test.jpg", 1), "test-1.jpg");
        assert_eq!(candidate_name("archive.tar.gz", 2), "archive.tar-2.gz");
        assert_eq!(candidate_name("README", 3), "README-3");
        assert_eq!(candidate_name(".env", 1), ".env-1");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_transform_requested() {
        assert!(!TransformOptions::default().is_requested());
        let opts = TransformOptions {
            width: Some(200),
            ..Default::default()
        };
        assert!(opts.is_requested());
    }
}
