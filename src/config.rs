//! Configuration management

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    // =========================================================================
    // HTTP Server
    // =========================================================================
    /// Host the `/send` API binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Port the `/send` API listens on
    #[serde(default = "default_port")]
    pub port: u16,

    // =========================================================================
    // Forwarding Sink
    // =========================================================================
    /// Endpoint receiving inbound messages
    #[serde(default = "default_forward_url")]
    pub forward_url: String,

    /// Authorization header value sent with every forward (e.g. `Basic ...`)
    #[serde(default, skip_serializing)]
    pub forward_authorization: Option<String>,

    /// Optional timeout for forward requests. Unset means no timeout.
    #[serde(default)]
    pub forward_timeout_secs: Option<u64>,

    // =========================================================================
    // WhatsApp Session
    // =========================================================================
    /// Directory holding the persisted session credentials
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,

    /// Interpreter used to launch the session sidecar
    #[serde(default = "default_sidecar_command")]
    pub sidecar_command: String,

    /// Sidecar entry script
    #[serde(default = "default_sidecar_script")]
    pub sidecar_script: PathBuf,

    /// Browser name announced to WhatsApp when linking the device
    #[serde(default = "default_browser_name")]
    pub browser_name: String,

    /// First backoff step between consecutive failed reconnects (milliseconds)
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Upper bound for the reconnect backoff (milliseconds)
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_forward_url() -> String {
    "http://localhost:3000/api/chat".to_string()
}

fn default_auth_dir() -> PathBuf {
    PathBuf::from("baileys_auth")
}

fn default_sidecar_command() -> String {
    "node".to_string()
}

fn default_sidecar_script() -> PathBuf {
    PathBuf::from("sidecar/index.mjs")
}

fn default_browser_name() -> String {
    "MyApp".to_string()
}

fn default_reconnect_base_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            forward_url: default_forward_url(),
            forward_authorization: None,
            forward_timeout_secs: None,
            auth_dir: default_auth_dir(),
            sidecar_command: default_sidecar_command(),
            sidecar_script: default_sidecar_script(),
            browser_name: default_browser_name(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let forward_authorization = match lookup("FORWARD_AUTHORIZATION") {
            Some(raw) => Some(raw),
            None => match (
                lookup("FORWARD_BASIC_USER"),
                lookup("FORWARD_BASIC_PASSWORD"),
            ) {
                (Some(user), Some(password)) => Some(basic_authorization(&user, &password)),
                (Some(_), None) | (None, Some(_)) => anyhow::bail!(
                    "FORWARD_BASIC_USER and FORWARD_BASIC_PASSWORD must be set together"
                ),
                (None, None) => None,
            },
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
            forward_url: lookup("FORWARD_URL").unwrap_or(defaults.forward_url),
            forward_authorization,
            forward_timeout_secs: parse_var(&lookup, "FORWARD_TIMEOUT_SECS")?,
            auth_dir: lookup("AUTH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.auth_dir),
            sidecar_command: lookup("SIDECAR_COMMAND").unwrap_or(defaults.sidecar_command),
            sidecar_script: lookup("SIDECAR_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or(defaults.sidecar_script),
            browser_name: lookup("BROWSER_NAME").unwrap_or(defaults.browser_name),
            reconnect_base_ms: parse_var(&lookup, "RECONNECT_BASE_MS")?
                .unwrap_or(defaults.reconnect_base_ms),
            reconnect_max_ms: parse_var(&lookup, "RECONNECT_MAX_MS")?
                .unwrap_or(defaults.reconnect_max_ms),
        })
    }

    /// Socket address string for the HTTP listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn forward_timeout(&self) -> Option<Duration> {
        self.forward_timeout_secs.map(Duration::from_secs)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

/// Build a `Basic` authorization header value from a user/password pair
pub fn basic_authorization(user: &str, password: &str) -> String {
    let encoded = general_purpose::STANDARD.encode(format!("{}:{}", user, password));
    format!("Basic {}", encoded)
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} has an invalid value: '{}'", key, raw))
        })
        .transpose()
}
