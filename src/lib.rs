//! WhatsApp HTTP Relay Library
//!
//! A thin relay between one WhatsApp Web account and HTTP.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────── Relay (this) ─────────────┐
//! WhatsApp ◀──Baileys──▶ Sidecar ◀─stdio─▶ Session Connector    │
//!                      │                    │        │          │
//!                      │            Session Slot   Inbound      │──POST──▶ Chat API
//!                      │                    │      Forwarder    │         (/api/chat)
//! HTTP client ──POST /send──▶ Outbound Gateway                  │
//!                      └───────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! # Optional overrides
//! export PORT=3001
//! export FORWARD_URL=http://localhost:3000/api/chat
//! export FORWARD_BASIC_USER=relay
//! export FORWARD_BASIC_PASSWORD=secret
//!
//! # Run (scan the QR code on first start)
//! whatsapp-relay
//! ```
//!
//! Sending a message:
//!
//! ```json
//! // POST /send
//! {"number": "15551234567", "message": "hi"}
//! ```

pub mod config;
pub mod connector;
pub mod credentials;
pub mod forwarder;
pub mod gateway;
pub mod pairing;
pub mod session;
pub mod sidecar;
pub mod types;

pub use config::RelayConfig;
pub use connector::{ReconnectPolicy, SessionConnector};
pub use credentials::{CredentialStore, FileCredentialStore};
pub use forwarder::InboundForwarder;
pub use session::{SessionBackend, SessionHandle, SessionSlot};
pub use sidecar::SidecarBackend;
pub use types::*;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::RelayConfig;
    pub use crate::connector::{ReconnectPolicy, SessionConnector};
    pub use crate::credentials::{CredentialStore, FileCredentialStore};
    pub use crate::forwarder::InboundForwarder;
    pub use crate::session::{SessionBackend, SessionEvent, SessionHandle, SessionSlot};
    pub use crate::types::*;
}
