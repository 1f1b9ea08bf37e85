//! Connection state machine for the WhatsApp bridge session.
//!
//! A single [`SessionTracker`] owns the state. Lifecycle events from the
//! bridge arrive on an mpsc channel and are applied one at a time by
//! [`SessionTracker::run`]. Readers hold a [`SessionHandle`], which observes
//! published snapshots through a `watch` channel and never blocks.
//!
//! Invariant: a login code is only ever present while the state is
//! [`ConnectionState::AwaitingLogin`].

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::whatsapp::qr;

/// Connection status of the messaging client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No usable session. Initial state.
    Disconnected,
    /// The bridge issued a login code that has not been scanned yet.
    AwaitingLogin,
    /// Logged in and able to send.
    Ready,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current connection state.
    pub state: ConnectionState,
    /// Login code awaiting a scan, if any.
    pub login_code: Option<String>,
}

impl SessionSnapshot {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            login_code: None,
        }
    }

    /// Whether messages can be sent right now.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}

/// Lifecycle event emitted by the messaging client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A (possibly refreshed) login code was issued.
    LoginCode(String),
    /// Login completed; the client can send.
    Ready,
    /// Authentication was rejected.
    AuthFailure(String),
    /// An established connection was lost.
    Disconnected(Option<String>),
}

/// Request for the adapter layer to re-run its initialization sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReinitRequest {
    /// Why re-initialization was requested.
    pub reason: String,
}

/// Single writer of the session state.
pub struct SessionTracker {
    state_tx: watch::Sender<SessionSnapshot>,
    reinit_tx: mpsc::UnboundedSender<ReinitRequest>,
    print_login_code: bool,
}

impl SessionTracker {
    /// Create a tracker in the `Disconnected` state.
    ///
    /// Re-initialization requests triggered by disconnects are sent on
    /// `reinit_tx`; whoever holds the receiver decides how to retry.
    pub fn new(reinit_tx: mpsc::UnboundedSender<ReinitRequest>) -> Self {
        let (state_tx, _) = watch::channel(SessionSnapshot::disconnected());
        Self {
            state_tx,
            reinit_tx,
            print_login_code: false,
        }
    }

    /// Also write every issued login code to the log as a terminal QR code.
    pub fn with_terminal_login_code(mut self, enabled: bool) -> Self {
        self.print_login_code = enabled;
        self
    }

    /// Create a read-only handle onto the state.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            state_rx: self.state_tx.subscribe(),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_tx.borrow().clone()
    }

    /// A login code was issued. Replaces any previous code.
    pub fn on_login_code_issued(&self, code: impl Into<String>) {
        let code = code.into();
        info!("WhatsApp login code issued, waiting for scan");
        if self.print_login_code {
            match qr::render_terminal(&code) {
                Ok(art) => info!("scan this code with WhatsApp:\n{art}"),
                Err(e) => warn!(error = %e, "failed to render login code for the terminal"),
            }
        }
        self.state_tx.send_modify(|s| {
            s.state = ConnectionState::AwaitingLogin;
            s.login_code = Some(code);
        });
    }

    /// Login completed.
    pub fn on_ready(&self) {
        info!("WhatsApp session ready");
        self.state_tx.send_modify(|s| {
            s.state = ConnectionState::Ready;
            s.login_code = None;
        });
    }

    /// Authentication failed. The process keeps running in `Disconnected`.
    pub fn on_auth_failure(&self, detail: &str) {
        error!(detail, "WhatsApp authentication failed");
        self.state_tx.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.login_code = None;
        });
    }

    /// The connection dropped. Asks the adapter layer to re-initialize.
    pub fn on_disconnected(&self, reason: Option<&str>) {
        warn!(reason = reason.unwrap_or("unknown"), "WhatsApp session disconnected");
        self.state_tx.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.login_code = None;
        });
        let request = ReinitRequest {
            reason: reason.unwrap_or("disconnected").to_owned(),
        };
        if self.reinit_tx.send(request).is_err() {
            warn!("re-initialization channel closed, session will not recover");
        }
    }

    /// Apply one lifecycle event.
    pub fn apply(&self, event: SessionEvent) {
        debug!(?event, "applying session event");
        match event {
            SessionEvent::LoginCode(code) => self.on_login_code_issued(code),
            SessionEvent::Ready => self.on_ready(),
            SessionEvent::AuthFailure(detail) => self.on_auth_failure(&detail),
            SessionEvent::Disconnected(reason) => self.on_disconnected(reason.as_deref()),
        }
    }

    /// Consume lifecycle events until the channel closes.
    pub async fn run(self, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        info!("session event channel closed");
    }
}

/// Cheap, cloneable reader of the session state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().state
    }

    /// Whether messages can be sent right now.
    pub fn is_ready(&self) -> bool {
        self.state_rx.borrow().is_ready()
    }

    /// Login code awaiting a scan, if any.
    pub fn current_code(&self) -> Option<String> {
        self.state_rx.borrow().login_code.clone()
    }
}
