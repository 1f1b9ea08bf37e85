//! HTTP surface: session status, login code, and batch sending.
//!
//! Axum router with three endpoints:
//! - `GET /whatsapp-status` reports whether the session is ready
//! - `GET /whatsapp-qr` returns the pending login code as a PNG data URL
//! - `POST /send-messages` delivers a batch of recipient records
//!
//! Handlers only read session snapshots; they never wait on lifecycle events.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::middleware;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::delivery::{parse_batch, DeliveryEngine, DeliveryError, DeliveryOutcome};
use crate::session::{ConnectionState, SessionHandle};
use crate::whatsapp::qr;

const MSG_INVALID_BATCH: &str = "Lista de estudiantes vacía o inválida";
const MSG_NOT_READY: &str = "WhatsApp no está conectado. Escanee el código QR e intente de nuevo";
const MSG_SENT: &str = "Mensajes enviados correctamente";
const MSG_SEND_ERROR: &str = "Error al enviar mensajes";
const MSG_ALREADY_CONNECTED: &str = "WhatsApp ya está conectado";
const MSG_NO_QR: &str = "Código QR aún no disponible, intente nuevamente en unos segundos";
const MSG_QR_ERROR: &str = "No se pudo generar el código QR";
const MSG_TOO_LARGE: &str = "La lista de estudiantes excede el tamaño permitido";

/// Errors from building or running the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A configured CORS origin is not a valid header value.
    #[error("invalid CORS origin {0:?}")]
    InvalidOrigin(String),

    /// Binding or serving failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Read-only view of the WhatsApp session.
    pub session: SessionHandle,
    /// Batch sender.
    pub engine: Arc<DeliveryEngine>,
}

/// Build the router with CORS, body limit and request tracing layers.
///
/// # Errors
///
/// Returns [`ServerError::InvalidOrigin`] if an allowed origin cannot be
/// used as a header value.
pub fn router(state: AppState, config: &ServerConfig) -> Result<Router, ServerError> {
    let cors = cors_layer(&config.allowed_origins)?;

    Ok(Router::new()
        .route("/whatsapp-status", get(status_handler))
        .route("/whatsapp-qr", get(qr_handler))
        .route("/send-messages", post(send_messages_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(middleware::map_response(wrap_payload_too_large))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer, ServerError> {
    // Credentials are allowed, so a literal `*` is not a legal response
    // header; mirror the caller's origin instead.
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::mirror_request()
    } else {
        let values = origins
            .iter()
            .map(|o| {
                HeaderValue::from_str(o.trim()).map_err(|_| ServerError::InvalidOrigin(o.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(values)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true))
}

/// Give the body limit's plain-text 413 the same JSON shape as other errors.
async fn wrap_payload_too_large(response: Response) -> Response {
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return response;
    }
    warn!("rejected oversized request body");
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(SendBody::failure(MSG_TOO_LARGE)),
    )
        .into_response()
}

/// Serve `router` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`ServerError::Io`] if the server stops with an I/O error.
pub async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusBody {
    connected: bool,
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusBody> {
    Json(StatusBody {
        connected: state.session.is_ready(),
    })
}

#[derive(Serialize)]
struct QrBody {
    qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

async fn qr_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.session.snapshot();
    match (snapshot.state, snapshot.login_code) {
        (ConnectionState::AwaitingLogin, Some(code)) => match qr::render_data_url(&code) {
            Ok(url) => Json(QrBody {
                qr: Some(url),
                connected: Some(false),
                message: None,
            })
            .into_response(),
            Err(e) => {
                error!(error = %e, "failed to render login code");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(QrBody {
                        qr: None,
                        connected: Some(false),
                        message: Some(MSG_QR_ERROR),
                    }),
                )
                    .into_response()
            }
        },
        (ConnectionState::Ready, _) => Json(QrBody {
            qr: None,
            connected: Some(true),
            message: Some(MSG_ALREADY_CONNECTED),
        })
        .into_response(),
        _ => Json(QrBody {
            qr: None,
            connected: Some(false),
            message: Some(MSG_NO_QR),
        })
        .into_response(),
    }
}

#[derive(Serialize)]
struct SendBody {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<DeliveryOutcome>>,
}

impl SendBody {
    fn failure(message: &'static str) -> Self {
        Self {
            success: false,
            message,
            batch_id: None,
            sent: None,
            failed: None,
            skipped: None,
            results: None,
        }
    }
}

async fn send_messages_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let records = match body {
        Ok(Json(value)) => parse_batch(value),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return wrap_payload_too_large(rejection.into_response()).await;
        }
        Err(rejection) => Err(DeliveryError::InvalidInput(rejection.body_text())),
    };
    let result = match records {
        Ok(records) => state.engine.send_batch(&records).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => Json(SendBody {
            success: true,
            message: MSG_SENT,
            batch_id: Some(report.batch_id),
            sent: Some(report.sent),
            failed: Some(report.failed),
            skipped: Some(report.skipped),
            results: Some(report.outcomes),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DeliveryError::InvalidInput(detail) => {
                warn!(detail, "rejected batch");
                (StatusCode::BAD_REQUEST, MSG_INVALID_BATCH)
            }
            DeliveryError::NotReady => {
                warn!("batch rejected, WhatsApp session not ready");
                (StatusCode::SERVICE_UNAVAILABLE, MSG_NOT_READY)
            }
            DeliveryError::Engine(detail) => {
                error!(detail, "batch aborted");
                (StatusCode::INTERNAL_SERVER_ERROR, MSG_SEND_ERROR)
            }
        };
        (status, Json(SendBody::failure(message))).into_response()
    }
}
