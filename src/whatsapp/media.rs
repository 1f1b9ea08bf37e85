//! Image attachment sent along with every message.
//!
//! Loaded once at startup and shared read-only. A missing or unreadable
//! file is not fatal: the relay falls back to text-only messages.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{info, warn};

use super::WhatsAppError;

/// An immutable binary attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    mime_type: String,
    filename: String,
    data: Vec<u8>,
}

impl MediaAsset {
    /// Build an asset from raw parts.
    pub fn new(mime_type: impl Into<String>, filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            filename: filename.into(),
            data,
        }
    }

    /// Read an attachment from disk, inferring the MIME type from the
    /// file extension.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::Media`] if the file cannot be read or is empty.
    pub fn load(path: &Path) -> Result<Self, WhatsAppError> {
        let data = std::fs::read(path)
            .map_err(|e| WhatsAppError::Media(format!("failed to read {}: {e}", path.display())))?;
        if data.is_empty() {
            return Err(WhatsAppError::Media(format!("{} is empty", path.display())));
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_owned();
        Ok(Self::new(mime_type_for(path), filename, data))
    }

    /// Load the attachment if a path is configured, logging instead of
    /// failing when it cannot be read.
    pub fn load_optional(path: Option<&Path>) -> Option<Arc<Self>> {
        let path = path?;
        match Self::load(path) {
            Ok(asset) => {
                info!(
                    path = %path.display(),
                    mime_type = %asset.mime_type,
                    bytes = asset.data.len(),
                    "media attachment loaded"
                );
                Some(Arc::new(asset))
            }
            Err(e) => {
                warn!(error = %e, "media attachment unavailable, sending text-only messages");
                None
            }
        }
    }

    /// MIME type, e.g. `image/png`.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// File name presented to the recipient.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Standard base64 encoding of the bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
