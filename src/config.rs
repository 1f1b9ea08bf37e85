//! Configuration loading and validation.
//!
//! Loads relay configuration from `relay.toml` (or `$RELAY_CONFIG_PATH`,
//! or an explicit `--config` path). Every section is optional.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::delivery::{DeliverySettings, DEFAULT_SEND_TIMEOUT_SECS};
use crate::recipient::{PhoneNormalizer, DEFAULT_COUNTRY_CODE, DEFAULT_DOMAIN_SUFFIX};
use crate::template::{MessageTemplate, DEFAULT_LOGIN_URL, DEFAULT_TEMPLATE};
use crate::whatsapp::client::DEFAULT_BRIDGE_PORT;

/// Config file used when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// Default request body limit (1 MiB).
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

// ── Top-level config ────────────────────────────────────────────

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// WhatsApp bridge settings.
    pub whatsapp: WhatsAppConfig,
    /// Message content and delivery behaviour.
    pub delivery: DeliveryConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Origins allowed by CORS. `"*"` mirrors any origin.
    pub allowed_origins: Vec<String>,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
            allowed_origins: vec!["*".to_owned()],
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// WhatsApp bridge settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Base URL of the bridge sidecar.
    pub bridge_url: String,
    /// Where the bridge persists the login session.
    pub session_dir: PathBuf,
    /// Also write login codes to the log as terminal QR codes.
    pub print_qr: bool,
    /// Run the bridge as a managed Docker container.
    pub container: Option<ContainerConfig>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: format!("http://127.0.0.1:{DEFAULT_BRIDGE_PORT}"),
            session_dir: default_session_dir(),
            print_qr: true,
            container: None,
        }
    }
}

/// Managed bridge container.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    /// Image reference for the bridge.
    pub image: String,
    /// Port the bridge listens on inside and outside the container.
    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

/// Message content and delivery behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Country calling code prefixed to local numbers.
    pub country_code: String,
    /// WhatsApp user domain appended to numbers.
    pub domain_suffix: String,
    /// URL substituted for `{login_url}`.
    pub login_url: String,
    /// Message body template.
    pub template: String,
    /// Image attached to every message, if present.
    pub media_path: Option<PathBuf>,
    /// Per-send timeout in seconds, `0` to disable.
    pub send_timeout_secs: u64,
    /// Check session readiness before each send.
    pub recheck_readiness: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_owned(),
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_owned(),
            login_url: DEFAULT_LOGIN_URL.to_owned(),
            template: DEFAULT_TEMPLATE.to_owned(),
            media_path: Some(PathBuf::from("mindi_wsp.png")),
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
            recheck_readiness: true,
        }
    }
}

impl DeliveryConfig {
    /// Phone normalizer for these settings.
    pub fn normalizer(&self) -> PhoneNormalizer {
        PhoneNormalizer::new(&self.country_code, &self.domain_suffix)
    }

    /// Parsed message template.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is malformed.
    pub fn message_template(&self) -> Result<MessageTemplate> {
        MessageTemplate::new(self.template.clone(), self.login_url.clone())
            .context("invalid message template")
    }

    /// Delivery loop settings.
    pub fn settings(&self) -> DeliverySettings {
        DeliverySettings {
            send_timeout: (self.send_timeout_secs > 0)
                .then(|| std::time::Duration::from_secs(self.send_timeout_secs)),
            recheck_readiness: self.recheck_readiness,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotated JSON logs. Console only when unset.
    pub logs_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logs_dir: None,
            level: "info".to_owned(),
        }
    }
}

fn default_bridge_port() -> u16 {
    DEFAULT_BRIDGE_PORT
}

fn default_session_dir() -> PathBuf {
    data_dir()
        .map(|dir| dir.join("session"))
        .unwrap_or_else(|_| PathBuf::from(".guardian-relay/session"))
}

// ── Loading ─────────────────────────────────────────────────────

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// An explicit `path` must exist. Without one, `$RELAY_CONFIG_PATH` or
    /// `./relay.toml` is used and a missing file means defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => load_config(path)?,
            None => {
                let path = Self::config_path_with(|key| std::env::var(key).ok());
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        tracing::info!(path = %path.display(), "loading config from file");
                        Self::from_toml_str(&contents).with_context(|| {
                            format!("failed to parse config at {}", path.display())
                        })?
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::info!("no config file found, using defaults");
                        Self::default()
                    }
                    Err(e) => {
                        return Err(anyhow::anyhow!(
                            "failed to read config at {}: {e}",
                            path.display()
                        ))
                    }
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration from TOML text, without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("RELAY_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests do not have to mutate the
    /// process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Server.
        if let Some(v) = env("PORT") {
            match v.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(var = "PORT", value = %v, "ignoring invalid env override"),
            }
        }
        if let Some(v) = env("RELAY_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env("RELAY_ALLOWED_ORIGINS") {
            self.server.allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }

        // WhatsApp.
        if let Some(v) = env("RELAY_BRIDGE_URL") {
            self.whatsapp.bridge_url = v;
        }
        if let Some(v) = env("RELAY_SESSION_DIR") {
            self.whatsapp.session_dir = PathBuf::from(v);
        }

        // Delivery.
        if let Some(v) = env("RELAY_MEDIA_PATH") {
            self.delivery.media_path = (!v.trim().is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = env("RELAY_COUNTRY_CODE") {
            self.delivery.country_code = v;
        }
        if let Some(v) = env("RELAY_LOGIN_URL") {
            self.delivery.login_url = v;
        }
        if let Some(v) = env("RELAY_SEND_TIMEOUT_SECS") {
            match v.trim().parse() {
                Ok(secs) => self.delivery.send_timeout_secs = secs,
                Err(_) => tracing::warn!(
                    var = "RELAY_SEND_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Logging.
        if let Some(v) = env("RELAY_LOGS_DIR") {
            self.logging.logs_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("RELAY_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Check values that deserialization cannot.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let code = self.delivery.country_code.trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!(
                "delivery.country_code must be digits only, got {:?}",
                self.delivery.country_code
            );
        }
        if self.delivery.domain_suffix.trim().trim_start_matches('@').is_empty() {
            anyhow::bail!("delivery.domain_suffix must not be empty");
        }
        if self.server.allowed_origins.is_empty() {
            anyhow::bail!("server.allowed_origins must list at least one origin");
        }
        self.delivery.message_template()?;
        Ok(())
    }
}

/// Load configuration from a TOML file, without env overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    Config::from_toml_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))
}

/// Resolve the relay data directory (`~/.guardian-relay/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn data_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".guardian-relay"))
}
