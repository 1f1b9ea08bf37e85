//! HTTP client for the WhatsApp Web bridge sidecar.
//!
//! All WhatsApp operations go through this client, which talks to the
//! bridge over HTTP (port 3001 by default).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{MessagingClient, OutboundPayload, WhatsAppError};
use crate::recipient::NormalizedTarget;

/// Default port the WhatsApp bridge listens on.
pub const DEFAULT_BRIDGE_PORT: u16 = 3001;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Number of health-check retries before giving up.
const HEALTH_CHECK_RETRIES: u32 = 5;

/// Delay between health-check attempts in milliseconds.
const HEALTH_CHECK_DELAY_MS: u64 = 2000;

/// Longest error body kept from a failed send.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Client for the WhatsApp HTTP bridge.
pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: String,
    session_dir: Option<PathBuf>,
}

/// Connection status from the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppStatus {
    /// Whether the sidecar is connected to WhatsApp.
    pub connected: bool,
    /// The phone number linked, if connected.
    pub phone_number: Option<String>,
}

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    #[allow(dead_code)]
    error: Option<String>,
}

#[derive(Serialize)]
struct InitializeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_dir: Option<&'a str>,
}

#[derive(Serialize)]
struct SendTextRequest<'a> {
    jid: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct SendMediaRequest<'a> {
    jid: &'a str,
    mimetype: &'a str,
    filename: &'a str,
    data: String,
    caption: &'a str,
}

impl WhatsAppClient {
    /// Create a new client pointing at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            session_dir: None,
        }
    }

    /// Directory where the bridge should persist the login session.
    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = Some(dir.into());
        self
    }

    /// Check whether the sidecar answers its status endpoint.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/status", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Wait for the sidecar to become reachable, retrying with a fixed delay.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::SidecarNotRunning`] once retries are exhausted.
    pub async fn wait_healthy(&self) -> Result<(), WhatsAppError> {
        for attempt in 0..HEALTH_CHECK_RETRIES {
            if self.health_check().await {
                return Ok(());
            }
            if attempt < HEALTH_CHECK_RETRIES.saturating_sub(1) {
                tokio::time::sleep(std::time::Duration::from_millis(HEALTH_CHECK_DELAY_MS)).await;
            }
        }
        Err(WhatsAppError::SidecarNotRunning)
    }

    /// Get the current connection status from the sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError`] if the sidecar is unreachable or answers
    /// without a status.
    pub async fn status(&self) -> Result<WhatsAppStatus, WhatsAppError> {
        let url = format!("{}/status", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body: BridgeResponse<WhatsAppStatus> = resp.json().await?;
        body.data.ok_or(WhatsAppError::SidecarNotRunning)
    }

    /// Send a text message to the given JID.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::SendFailed`] if the bridge rejects the message.
    pub async fn send_text(&self, jid: &str, text: &str) -> Result<(), WhatsAppError> {
        let url = format!("{}/send", self.base_url);
        let body = SendTextRequest { jid, text };
        let resp = self.client.post(&url).json(&body).send().await?;
        check_send_response(resp).await?;
        debug!(jid, "text message sent via WhatsApp");
        Ok(())
    }

    /// Send an attachment with a caption to the given JID.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::SendFailed`] if the bridge rejects the message.
    pub async fn send_media(
        &self,
        jid: &str,
        asset: &super::MediaAsset,
        caption: &str,
    ) -> Result<(), WhatsAppError> {
        let url = format!("{}/send-media", self.base_url);
        let body = SendMediaRequest {
            jid,
            mimetype: asset.mime_type(),
            filename: asset.filename(),
            data: asset.to_base64(),
            caption,
        };
        let resp = self.client.post(&url).json(&body).send().await?;
        check_send_response(resp).await?;
        debug!(jid, filename = asset.filename(), "media message sent via WhatsApp");
        Ok(())
    }

    /// Returns the base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MessagingClient for WhatsAppClient {
    async fn initialize(&self) -> Result<(), WhatsAppError> {
        let url = format!("{}/initialize", self.base_url);
        let session_dir = self.session_dir.as_ref().and_then(|p| p.to_str());
        let resp = self
            .client
            .post(&url)
            .json(&InitializeRequest { session_dir })
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(WhatsAppError::SetupFailed(format!(
                "initialize returned {status}: {}",
                sanitize_error_body(&body)
            )));
        }
        info!(bridge = %self.base_url, "WhatsApp bridge initialization requested");
        Ok(())
    }

    async fn send_message(
        &self,
        target: &NormalizedTarget,
        payload: &OutboundPayload,
    ) -> Result<(), WhatsAppError> {
        match payload {
            OutboundPayload::Text(text) => self.send_text(target.as_str(), text).await,
            OutboundPayload::Media { asset, caption } => {
                self.send_media(target.as_str(), asset, caption).await
            }
        }
    }
}

async fn check_send_response(resp: reqwest::Response) -> Result<(), WhatsAppError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(%status, "WhatsApp send failed");
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(WhatsAppError::NotConnected);
    }
    Err(WhatsAppError::SendFailed(format!(
        "bridge returned {status}: {}",
        sanitize_error_body(&body)
    )))
}

fn sanitize_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = collapsed.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    collapsed
}
