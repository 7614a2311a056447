//! User-supplied source files and their data-URI wire encoding.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use std::path::Path;

/// An image or PDF supplied as generation input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl InputFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, inferring its MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mime_type = mime_for_path(path)
            .with_context(|| format!("unsupported file type: {}", path.display()))?;
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self::new(name, mime_type, bytes))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Encode as `data:<mime>;base64,<payload>`.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }

    /// Decode a `data:` URI produced by [`InputFile::to_data_uri`] (or a browser).
    pub fn from_data_uri(name: impl Into<String>, uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .context("not a data URI")?;
        let (header, payload) = rest.split_once(',').context("data URI has no payload")?;
        let mime_type = header
            .strip_suffix(";base64")
            .context("only base64 data URIs are supported")?;
        let bytes = STANDARD
            .decode(payload.trim())
            .context("decode data URI payload")?;
        let mime_type = if mime_type.is_empty() {
            "application/octet-stream"
        } else {
            mime_type
        };
        Ok(Self::new(name, mime_type, bytes))
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}
