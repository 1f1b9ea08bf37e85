//! Batch delivery: one templated message per guardian, sent sequentially.
//!
//! A batch is best-effort. A failure for one recipient is recorded in the
//! [`BatchReport`] and the loop moves on; only precondition failures
//! ([`DeliveryError::InvalidInput`], [`DeliveryError::NotReady`]) and faults
//! in the engine itself ([`DeliveryError::Engine`]) fail the whole call.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::recipient::{NormalizedTarget, PhoneNormalizer, RecipientRecord};
use crate::session::SessionHandle;
use crate::template::MessageTemplate;
use crate::whatsapp::{MediaAsset, MessagingClient, OutboundPayload, WhatsAppError};

/// Default per-send timeout.
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;

/// Outcome error recorded when the session drops mid-batch.
const NOT_READY_DETAIL: &str = "session not ready";

/// Errors that fail a whole batch.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The batch body is empty, not a list, or has malformed entries.
    #[error("invalid batch: {0}")]
    InvalidInput(String),

    /// The WhatsApp session is not ready to send.
    #[error("WhatsApp session is not ready")]
    NotReady,

    /// The engine failed outside a single recipient's send.
    #[error("delivery engine fault: {0}")]
    Engine(String),
}

/// Result for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    /// Guardian name as submitted.
    pub recipient: String,
    /// Chat id the message was addressed to.
    pub target: String,
    /// Whether the bridge accepted the message.
    pub success: bool,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Identifier used to correlate log lines.
    pub batch_id: Uuid,
    /// Records that had a phone number.
    pub attempted: usize,
    /// Messages accepted by the bridge.
    pub sent: usize,
    /// Messages that failed or timed out.
    pub failed: usize,
    /// Records skipped for lack of a phone number.
    pub skipped: usize,
    /// Per-recipient results in input order (skipped records excluded).
    pub outcomes: Vec<DeliveryOutcome>,
}

/// Tunables for the delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Upper bound on one send; `None` waits indefinitely.
    pub send_timeout: Option<Duration>,
    /// Check the session before every send rather than once per batch.
    pub recheck_readiness: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            send_timeout: Some(Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS)),
            recheck_readiness: true,
        }
    }
}

/// Decode a request body into recipient records.
///
/// # Errors
///
/// Returns [`DeliveryError::InvalidInput`] if the value is not a non-empty
/// array of record objects.
pub fn parse_batch(value: serde_json::Value) -> Result<Vec<RecipientRecord>, DeliveryError> {
    let serde_json::Value::Array(items) = value else {
        return Err(DeliveryError::InvalidInput("expected a JSON array".to_owned()));
    };
    if items.is_empty() {
        return Err(DeliveryError::InvalidInput("the list is empty".to_owned()));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item)
                .map_err(|e| DeliveryError::InvalidInput(format!("entry {index}: {e}")))
        })
        .collect()
}

/// Sends batches of messages through a [`MessagingClient`].
pub struct DeliveryEngine {
    client: Arc<dyn MessagingClient>,
    session: SessionHandle,
    normalizer: PhoneNormalizer,
    template: MessageTemplate,
    media: Option<Arc<MediaAsset>>,
    settings: DeliverySettings,
}

impl DeliveryEngine {
    /// Create an engine that sends text-only messages with default settings.
    pub fn new(
        client: Arc<dyn MessagingClient>,
        session: SessionHandle,
        normalizer: PhoneNormalizer,
        template: MessageTemplate,
    ) -> Self {
        Self {
            client,
            session,
            normalizer,
            template,
            media: None,
            settings: DeliverySettings::default(),
        }
    }

    /// Attach an image to every message, with the text as its caption.
    pub fn with_media(mut self, media: Option<Arc<MediaAsset>>) -> Self {
        self.media = media;
        self
    }

    /// Override timeout and readiness behaviour.
    pub fn with_settings(mut self, settings: DeliverySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Whether messages go out with an attachment.
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Deliver one message per record, in order, one at a time.
    ///
    /// Records without a phone number are skipped silently.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidInput`] for an empty batch
    /// - [`DeliveryError::NotReady`] if the session is not ready at start
    /// - [`DeliveryError::Engine`] if a message cannot be rendered
    ///
    /// No message is sent when a precondition fails.
    pub async fn send_batch(
        &self,
        records: &[RecipientRecord],
    ) -> Result<BatchReport, DeliveryError> {
        if records.is_empty() {
            return Err(DeliveryError::InvalidInput("the list is empty".to_owned()));
        }
        if !self.session.is_ready() {
            return Err(DeliveryError::NotReady);
        }

        let batch_id = Uuid::new_v4();
        info!(%batch_id, records = records.len(), with_media = self.has_media(), "starting batch");

        // Once the session is seen down, the rest of the batch is not sent.
        let mut session_lost = false;
        let mut report = BatchReport {
            batch_id,
            attempted: 0,
            sent: 0,
            failed: 0,
            skipped: 0,
            outcomes: Vec::with_capacity(records.len()),
        };

        for record in records {
            if !record.has_phone() {
                report.skipped = report.skipped.saturating_add(1);
                continue;
            }
            report.attempted = report.attempted.saturating_add(1);

            let target = self.normalizer.normalize(&record.raw_phone);
            let body = self.template.render(record).map_err(|e| {
                warn!(%batch_id, error = %e, "failed to render message");
                DeliveryError::Engine(e.to_string())
            })?;

            if self.settings.recheck_readiness && !self.session.is_ready() {
                session_lost = true;
            }
            let result = if session_lost {
                Err(NOT_READY_DETAIL.to_owned())
            } else {
                let payload = match &self.media {
                    Some(asset) => OutboundPayload::Media {
                        asset: Arc::clone(asset),
                        caption: body,
                    },
                    None => OutboundPayload::Text(body),
                };
                match self.send_one(&target, &payload).await {
                    Ok(()) => Ok(()),
                    Err(failure) => {
                        if self.settings.recheck_readiness && failure.is_not_connected() {
                            session_lost = true;
                        }
                        Err(failure.to_string())
                    }
                }
            };

            match result {
                Ok(()) => {
                    info!(
                        %batch_id,
                        guardian = %record.guardian_name,
                        number = target.digits(),
                        "message sent"
                    );
                    report.sent = report.sent.saturating_add(1);
                    report.outcomes.push(DeliveryOutcome {
                        recipient: record.guardian_name.clone(),
                        target: target.to_string(),
                        success: true,
                        error: None,
                    });
                }
                Err(detail) => {
                    warn!(
                        %batch_id,
                        guardian = %record.guardian_name,
                        number = target.digits(),
                        error = %detail,
                        "message failed"
                    );
                    report.failed = report.failed.saturating_add(1);
                    report.outcomes.push(DeliveryOutcome {
                        recipient: record.guardian_name.clone(),
                        target: target.to_string(),
                        success: false,
                        error: Some(detail),
                    });
                }
            }
        }

        info!(
            %batch_id,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "batch finished"
        );
        Ok(report)
    }

    async fn send_one(
        &self,
        target: &NormalizedTarget,
        payload: &OutboundPayload,
    ) -> Result<(), SendFailure> {
        let send = self.client.send_message(target, payload);
        match self.settings.send_timeout {
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(result) => result.map_err(SendFailure::Client),
                Err(_) => Err(SendFailure::TimedOut(limit)),
            },
            None => send.await.map_err(SendFailure::Client),
        }
    }
}

/// Why a single send did not go through.
#[derive(Debug, thiserror::Error)]
enum SendFailure {
    #[error("{0}")]
    Client(WhatsAppError),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl SendFailure {
    fn is_not_connected(&self) -> bool {
        matches!(self, Self::Client(WhatsAppError::NotConnected))
    }
}
