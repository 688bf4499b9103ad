//! Message types for the WhatsApp session and the relay's HTTP surfaces

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Address suffix for individual WhatsApp users
pub const USER_JID_SUFFIX: &str = "@s.whatsapp.net";

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a single session handle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Externally visible connection status reported by `GET /status`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session handle has been published yet
    Unavailable,
    Connecting,
    Open,
    /// Closed and waiting for a reconnect
    Closed,
    /// Closed by a logout; no reconnect will happen
    LoggedOut,
}

/// Why the last connection closed
///
/// Codes follow the status codes WhatsApp Web reports on close. Only
/// [`DisconnectReason::LoggedOut`] is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Forbidden,
    UnavailableService,
    /// The session transport went away without reporting a close
    TransportExited,
    Other(Option<u16>),
}

impl DisconnectReason {
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(428) => Self::ConnectionClosed,
            Some(408) => Self::ConnectionLost,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(515) => Self::RestartRequired,
            Some(411) => Self::MultideviceMismatch,
            Some(403) => Self::Forbidden,
            Some(503) => Self::UnavailableService,
            other => Self::Other(other),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::LoggedOut => Some(401),
            Self::ConnectionClosed => Some(428),
            Self::ConnectionLost => Some(408),
            Self::ConnectionReplaced => Some(440),
            Self::BadSession => Some(500),
            Self::RestartRequired => Some(515),
            Self::MultideviceMismatch => Some(411),
            Self::Forbidden => Some(403),
            Self::UnavailableService => Some(503),
            Self::TransportExited => None,
            Self::Other(code) => *code,
        }
    }

    /// Terminal reasons must never trigger a reconnect
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoggedOut => "logged out",
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionLost => "connection lost",
            Self::ConnectionReplaced => "connection replaced",
            Self::BadSession => "bad session",
            Self::RestartRequired => "restart required",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::Forbidden => "forbidden",
            Self::UnavailableService => "service unavailable",
            Self::TransportExited => "transport exited",
            Self::Other(_) => "unknown",
        };
        match self.status_code() {
            Some(code) => write!(f, "{} ({})", name, code),
            None => f.write_str(name),
        }
    }
}

// =============================================================================
// Inbound WhatsApp Messages
// =============================================================================

/// Message key: who sent it, where, and whether it was us
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub from_me: bool,
    #[serde(default)]
    pub id: Option<String>,
    /// Sender inside a group chat
    #[serde(default)]
    pub participant: Option<String>,
}

/// `fromMe` may be missing or `null` on some message stubs
fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExtendedTextMessage {
    #[serde(default)]
    pub text: Option<String>,
}

/// Message payload. Only the text-bearing variants are modeled; other
/// payload kinds are accepted and ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedTextMessage>,
}

impl MessageContent {
    /// Plain text first, then extended text, else empty
    pub fn text(&self) -> String {
        self.conversation
            .as_deref()
            .filter(|text| !text.is_empty())
            .or_else(|| {
                self.extended_text_message
                    .as_ref()
                    .and_then(|ext| ext.text.as_deref())
            })
            .unwrap_or_default()
            .to_string()
    }
}

/// One received chat message
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageContent>,
    /// Unix seconds as reported by WhatsApp
    #[serde(default)]
    pub message_timestamp: Option<i64>,
    #[serde(default)]
    pub push_name: Option<String>,
}

impl InboundMessage {
    pub fn sender(&self) -> Option<&str> {
        self.key.remote_jid.as_deref()
    }

    pub fn is_from_me(&self) -> bool {
        self.key.from_me
    }
}

// =============================================================================
// Forwarding Sink Payload
// =============================================================================

/// Body posted to the forwarding sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardPayload {
    pub from: String,
    pub text: String,
    /// ISO-8601 dispatch time (UTC, millisecond precision)
    pub timestamp: String,
}

impl ForwardPayload {
    pub fn new(from: impl Into<String>, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            from: from.into(),
            text: text.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

// =============================================================================
// Send API
// =============================================================================

/// `POST /send` request body
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SendRequest {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /send` success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
}

/// Error body shared by all failing responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// `GET /status` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: ConnectionStatus,
}
