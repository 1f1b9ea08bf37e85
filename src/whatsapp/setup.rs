//! Bridge setup: sidecar container lifecycle and session re-initialization.
//!
//! The bridge may be run as a Docker container managed by the relay
//! (inspect, start if stopped, create if missing). Its login session lives
//! in a host directory bind-mounted into the container so a restart does not
//! require scanning a new code.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use super::{MessagingClient, WhatsAppError};
use crate::session::ReinitRequest;

/// Container name for the WhatsApp sidecar.
pub const CONTAINER_NAME: &str = "guardian-relay-whatsapp";

/// Path inside the container where the bridge keeps its session.
pub const CONTAINER_SESSION_DIR: &str = "/data/session";

/// Attempts per re-initialization request before giving up.
const INIT_MAX_ATTEMPTS: u32 = 5;

/// First retry delay; doubles after each failed attempt.
const INIT_RETRY_DELAY_MS: u64 = 2000;

/// Memory limit for the WhatsApp sidecar (1 GB; the bridge runs Chromium).
const MEMORY_LIMIT_BYTES: i64 = 1024 * 1024 * 1024;

/// What to run and where to persist its session.
#[derive(Debug, Clone, Copy)]
pub struct ContainerSpec<'a> {
    /// Image reference to pull and run.
    pub image: &'a str,
    /// Port the bridge listens on, published on 127.0.0.1.
    pub port: u16,
    /// Host directory bind-mounted as [`CONTAINER_SESSION_DIR`].
    pub session_dir: &'a Path,
}

/// Ensure the WhatsApp sidecar container is running.
///
/// Inspect, then start if stopped, then pull and create if missing.
///
/// # Errors
///
/// Returns [`WhatsAppError::SetupFailed`] if Docker refuses any step.
pub async fn ensure_container(
    docker: &Docker,
    spec: ContainerSpec<'_>,
) -> Result<(), WhatsAppError> {
    match docker.inspect_container(CONTAINER_NAME, None).await {
        Ok(info) => {
            let running = info.state.as_ref().and_then(|s| s.running).unwrap_or(false);
            if running {
                info!(container = CONTAINER_NAME, "WhatsApp sidecar already running");
                return Ok(());
            }
            docker
                .start_container(CONTAINER_NAME, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| {
                    WhatsAppError::SetupFailed(format!("failed to start container: {e}"))
                })?;
            info!(container = CONTAINER_NAME, "WhatsApp sidecar started");
            return Ok(());
        }
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => {}
        Err(e) => {
            return Err(WhatsAppError::SetupFailed(format!(
                "failed to inspect container: {e}"
            )));
        }
    }

    let pull_opts = CreateImageOptions {
        from_image: spec.image,
        ..Default::default()
    };
    let mut pull_stream = docker.create_image(Some(pull_opts), None, None);
    while let Some(result) = pull_stream.next().await {
        if let Err(e) = result {
            warn!(error = %e, "image pull warning");
        }
    }
    info!(image = spec.image, "WhatsApp sidecar image pulled");

    std::fs::create_dir_all(spec.session_dir).map_err(|e| {
        WhatsAppError::SetupFailed(format!(
            "failed to create session directory {}: {e}",
            spec.session_dir.display()
        ))
    })?;

    let port_key = format!("{}/tcp", spec.port);
    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        port_key.clone(),
        Some(vec![PortBinding {
            host_ip: Some("127.0.0.1".to_owned()),
            host_port: Some(spec.port.to_string()),
        }]),
    );

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(vec![format!(
            "{}:{CONTAINER_SESSION_DIR}",
            spec.session_dir.display()
        )]),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(5),
        }),
        memory: Some(MEMORY_LIMIT_BYTES),
        ..Default::default()
    };

    let mut labels = HashMap::new();
    labels.insert("guardian-relay".to_owned(), "true".to_owned());

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(port_key, HashMap::new());

    let container_config = ContainerConfig {
        image: Some(spec.image.to_owned()),
        labels: Some(labels),
        exposed_ports: Some(exposed_ports),
        env: Some(vec![
            format!("PORT={}", spec.port),
            format!("SESSION_DIR={CONTAINER_SESSION_DIR}"),
        ]),
        host_config: Some(host_config),
        ..Default::default()
    };

    let create_opts = CreateContainerOptions {
        name: CONTAINER_NAME.to_owned(),
        platform: None,
    };
    docker
        .create_container(Some(create_opts), container_config)
        .await
        .map_err(|e| WhatsAppError::SetupFailed(format!("failed to create container: {e}")))?;

    docker
        .start_container(CONTAINER_NAME, None::<StartContainerOptions<String>>)
        .await
        .map_err(|e| WhatsAppError::SetupFailed(format!("failed to start container: {e}")))?;

    info!(
        container = CONTAINER_NAME,
        image = spec.image,
        "WhatsApp sidecar created and started"
    );
    Ok(())
}

/// Spawn the task that turns re-initialization requests into
/// [`MessagingClient::initialize`] calls.
///
/// Requests that pile up while an initialization is in flight are
/// coalesced into a single follow-up call. A failed call is retried with
/// exponential backoff, up to a fixed number of attempts. The task ends
/// when every sender is dropped.
pub fn spawn_reinitializer(
    client: Arc<dyn MessagingClient>,
    requests: mpsc::UnboundedReceiver<ReinitRequest>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_reinitializer(client, requests))
}

/// Body of [`spawn_reinitializer`], usable directly in tests.
pub async fn run_reinitializer(
    client: Arc<dyn MessagingClient>,
    mut requests: mpsc::UnboundedReceiver<ReinitRequest>,
) {
    while let Some(request) = requests.recv().await {
        let mut coalesced = 0usize;
        while requests.try_recv().is_ok() {
            coalesced = coalesced.saturating_add(1);
        }
        info!(reason = %request.reason, coalesced, "initializing WhatsApp session");
        initialize_with_retry(client.as_ref()).await;
    }
    info!("re-initialization channel closed");
}

async fn initialize_with_retry(client: &dyn MessagingClient) {
    let mut delay_ms = INIT_RETRY_DELAY_MS;
    for attempt in 1..=INIT_MAX_ATTEMPTS {
        match client.initialize().await {
            Ok(()) => return,
            Err(e) if attempt < INIT_MAX_ATTEMPTS => {
                warn!(error = %e, attempt, delay_ms, "WhatsApp initialization failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                delay_ms = delay_ms.saturating_mul(2);
            }
            Err(e) => {
                error!(error = %e, attempts = INIT_MAX_ATTEMPTS, "WhatsApp initialization gave up");
            }
        }
    }
}
