//! Lifecycle event listener for the WhatsApp bridge.
//!
//! Long-polls the sidecar's `/events/poll` endpoint and forwards session
//! lifecycle events to the session tracker via an mpsc channel.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::SessionEvent;

/// An event as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A login code is available for scanning.
    Qr {
        /// Opaque login code payload.
        code: String,
    },
    /// Login completed.
    Ready,
    /// Authentication was rejected.
    AuthFailure {
        /// Human-readable detail, if available.
        message: Option<String>,
    },
    /// WhatsApp connection lost.
    Disconnected {
        /// Human-readable reason, if available.
        reason: Option<String>,
    },
    /// Any event type the relay does not track (messages, acks, ...).
    #[serde(other)]
    Other,
}

impl BridgeEvent {
    /// Map to a session lifecycle event. `None` for untracked events.
    pub fn into_session_event(self) -> Option<SessionEvent> {
        match self {
            Self::Qr { code } => Some(SessionEvent::LoginCode(code)),
            Self::Ready => Some(SessionEvent::Ready),
            Self::AuthFailure { message } => Some(SessionEvent::AuthFailure(
                message.unwrap_or_else(|| "authentication failed".to_owned()),
            )),
            Self::Disconnected { reason } => Some(SessionEvent::Disconnected(reason)),
            Self::Other => None,
        }
    }
}

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Spawn an event listener that forwards lifecycle events to `event_tx`.
///
/// Returns immediately. The listener runs as a background Tokio task and
/// reconnects automatically with exponential backoff. It stops when the
/// receiving side of `event_tx` is dropped.
pub fn spawn_event_listener(
    base_url: String,
    event_tx: mpsc::Sender<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{}/events/poll", base_url.trim_end_matches('/'));
        let mut backoff_ms: u64 = 1000;

        loop {
            info!(url = %poll_url, "connecting to WhatsApp event stream");

            match poll_events(&poll_url, &event_tx, &mut backoff_ms).await {
                Ok(()) => {
                    info!("WhatsApp event stream closed normally");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms, "WhatsApp event stream error, reconnecting");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                }
            }
        }
    })
}

/// Poll the sidecar for events in a loop. Returns `Err` on non-timeout
/// network errors so the caller can reconnect with backoff.
async fn poll_events(
    poll_url: &str,
    event_tx: &mpsc::Sender<SessionEvent>,
    backoff_ms: &mut u64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                *backoff_ms = 1000;
                match resp.json::<Vec<BridgeEvent>>().await {
                    Ok(events) => {
                        for event in events {
                            debug!(?event, "received WhatsApp bridge event");
                            let Some(event) = event.into_session_event() else {
                                continue;
                            };
                            if event_tx.send(event).await.is_err() {
                                // Receiver dropped, shut down cleanly.
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable event batch from bridge"),
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            Err(e) if e.is_timeout() => {
                // Long-poll expired without events.
                continue;
            }
            Err(e) => {
                return Err(e.into());
            }
        }
    }
}
