//! Session handle, the slot publishing it, and the backend seam
//!
//! The protocol itself (pairing, encryption, multi-device sync) lives behind
//! [`SessionBackend`]. Everything in the relay only ever sees a
//! [`SessionHandle`] and an ordered stream of [`SessionEvent`]s.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::types::{ConnectionState, ConnectionStatus, DisconnectReason, InboundMessage};

/// Opaque session credentials owned by the protocol library
pub type Credentials = serde_json::Value;

/// Session error type
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,

    #[error("session transport closed")]
    TransportClosed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("failed to start session backend: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to load credentials: {0}")]
    Credentials(#[from] crate::credentials::CredentialError),
}

/// Lifecycle and message events surfaced by a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Pairing data to show out-of-band (QR payload)
    PairingChallenge(String),
    ConnectionOpen,
    ConnectionClosed(DisconnectReason),
    CredentialsUpdated(Credentials),
    MessagesReceived(Vec<InboundMessage>),
}

/// Outbound half of a live connection
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn send_text(&self, jid: &str, text: &str) -> Result<(), SessionError>;
}

/// A freshly opened session: its transport and its event stream
pub struct OpenedSession {
    pub transport: Box<dyn SessionTransport>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Factory for sessions, one per (re)connect attempt
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Start a connection attempt. Must return without waiting for the
    /// connection to open.
    async fn open(&self, credentials: Option<Credentials>) -> Result<OpenedSession, SessionError>;
}

// =============================================================================
// Session Handle
// =============================================================================

/// One live connection to WhatsApp
pub struct SessionHandle {
    generation: u64,
    state: RwLock<ConnectionState>,
    transport: Box<dyn SessionTransport>,
}

impl SessionHandle {
    pub fn new(generation: u64, transport: Box<dyn SessionTransport>) -> Self {
        Self {
            generation,
            state: RwLock::new(ConnectionState::Connecting),
            transport,
        }
    }

    /// Monotonic id of the connect attempt that created this handle
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn mark_open(&self) {
        *self.state.write() = ConnectionState::Open;
    }

    pub fn mark_closed(&self) {
        *self.state.write() = ConnectionState::Closed;
    }

    /// Send a text message to a full JID
    pub async fn send_text(&self, jid: &str, text: &str) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotConnected);
        }
        self.transport.send_text(jid, text).await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("generation", &self.generation)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Session Slot
// =============================================================================

#[derive(Default)]
struct SlotState {
    current: Option<Arc<SessionHandle>>,
    logged_out: bool,
}

/// Process-wide holder for the current session handle
///
/// Handles are replaced, never edited through the slot. Readers clone the
/// `Arc` and release the lock before awaiting anything.
#[derive(Default)]
pub struct SessionSlot {
    inner: RwLock<SlotState>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current handle in whatever state it is
    pub fn current(&self) -> Option<Arc<SessionHandle>> {
        self.inner.read().current.clone()
    }

    /// Current handle, only if it is open
    pub fn open_handle(&self) -> Option<Arc<SessionHandle>> {
        self.current().filter(|handle| handle.is_open())
    }

    /// Publish a new handle, returning the one it replaces
    pub fn replace(&self, handle: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let mut guard = self.inner.write();
        guard.logged_out = false;
        guard.current.replace(handle)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.inner
            .read()
            .current
            .as_ref()
            .is_some_and(|handle| handle.generation() == generation)
    }

    /// Record a terminal logout for status reporting
    pub fn mark_logged_out(&self) {
        let mut guard = self.inner.write();
        if let Some(handle) = guard.current.as_ref() {
            handle.mark_closed();
        }
        guard.logged_out = true;
    }

    pub fn is_logged_out(&self) -> bool {
        self.inner.read().logged_out
    }

    pub fn status(&self) -> ConnectionStatus {
        let guard = self.inner.read();
        if guard.logged_out {
            return ConnectionStatus::LoggedOut;
        }
        match guard.current.as_ref().map(|handle| handle.state()) {
            None => ConnectionStatus::Unavailable,
            Some(ConnectionState::Connecting) => ConnectionStatus::Connecting,
            Some(ConnectionState::Open) => ConnectionStatus::Open,
            Some(ConnectionState::Closed) => ConnectionStatus::Closed,
        }
    }
}
