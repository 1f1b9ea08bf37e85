//! WhatsApp adapter: bridge client, lifecycle event listener, sidecar setup,
//! media attachments and login code rendering.
//!
//! The relay never speaks the WhatsApp protocol itself. It drives a
//! WhatsApp Web bridge sidecar over HTTP and learns about the session
//! lifecycle by long-polling the bridge's event endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use crate::recipient::NormalizedTarget;

pub mod client;
pub mod events;
pub mod media;
pub mod qr;
pub mod setup;

pub use media::MediaAsset;

/// Errors from the WhatsApp adapter.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// HTTP request to the sidecar failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sidecar is not running or not reachable.
    #[error("sidecar not running")]
    SidecarNotRunning,

    /// The sidecar is running but WhatsApp is not connected (needs QR scan).
    #[error("not connected to WhatsApp")]
    NotConnected,

    /// The bridge rejected an outbound message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A media attachment could not be loaded.
    #[error("media error: {0}")]
    Media(String),

    /// A login code could not be rendered.
    #[error("failed to render login code: {0}")]
    QrRender(String),

    /// Container setup or lifecycle operation failed.
    #[error("setup failed: {0}")]
    SetupFailed(String),
}

/// Content of one outbound message.
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    /// Plain text message.
    Text(String),
    /// Attachment with the text as its caption.
    Media {
        /// Shared, immutable attachment.
        asset: Arc<MediaAsset>,
        /// Caption shown under the attachment.
        caption: String,
    },
}

impl OutboundPayload {
    /// The message text (body or caption).
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Media { caption, .. } => caption,
        }
    }
}

/// Capability the relay needs from a messaging network client.
///
/// Implementations must be `Send + Sync` so one client can be shared by
/// the HTTP handlers and the background re-initializer.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Start (or restart) the connection and login sequence.
    ///
    /// Progress is reported asynchronously through lifecycle events, not
    /// through the return value.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError`] if the request could not be issued.
    async fn initialize(&self) -> Result<(), WhatsAppError>;

    /// Send one message and wait for the network round-trip.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError`] if the message was not accepted.
    async fn send_message(
        &self,
        target: &NormalizedTarget,
        payload: &OutboundPayload,
    ) -> Result<(), WhatsAppError>;
}
