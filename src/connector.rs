//! Session connector - owns the session lifecycle and the reconnect policy
//!
//! Each connect attempt gets a new [`SessionHandle`] with a fresh generation
//! number and a driver task consuming that handle's events in order. Only
//! the driver of the handle currently in the slot acts on events, so a
//! superseded session can never trigger a second reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::credentials::CredentialStore;
use crate::forwarder::InboundForwarder;
use crate::pairing;
use crate::session::{
    Credentials, SessionBackend, SessionError, SessionEvent, SessionHandle, SessionSlot,
};
use crate::types::{DisconnectReason, InboundMessage};

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Backoff between consecutive reconnects that never reached `Open`
///
/// The first reconnect after an open session drops is immediate. There is
/// no retry cap: only a logout stops reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.reconnect_base(), config.reconnect_max())
    }

    /// No backoff at all
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the reconnect following `attempt` earlier reconnects
    /// since the last successful open
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base.saturating_mul(factor).min(self.max)
    }
}

// =============================================================================
// Event Transitions
// =============================================================================

/// What the connector does in response to one event
#[derive(Debug, Clone)]
pub enum Action {
    ShowPairing(String),
    MarkOpen,
    PersistCredentials(Credentials),
    Forward(Vec<InboundMessage>),
    Reconnect {
        reason: DisconnectReason,
        delay: Duration,
    },
    /// Terminal close; the session stays down
    Stop { reason: DisconnectReason },
}

/// Map an event to the connector's reaction
pub fn decide(event: SessionEvent, attempt: u32, policy: &ReconnectPolicy) -> Action {
    match event {
        SessionEvent::PairingChallenge(payload) => Action::ShowPairing(payload),
        SessionEvent::ConnectionOpen => Action::MarkOpen,
        SessionEvent::CredentialsUpdated(credentials) => Action::PersistCredentials(credentials),
        SessionEvent::MessagesReceived(batch) => Action::Forward(batch),
        SessionEvent::ConnectionClosed(reason) if reason.is_terminal() => Action::Stop { reason },
        SessionEvent::ConnectionClosed(reason) => Action::Reconnect {
            reason,
            delay: policy.delay_for(attempt),
        },
    }
}

// =============================================================================
// Session Connector
// =============================================================================

/// Owns the session lifecycle
pub struct SessionConnector {
    backend: Arc<dyn SessionBackend>,
    store: Arc<dyn CredentialStore>,
    slot: Arc<SessionSlot>,
    forwarder: Arc<InboundForwarder>,
    policy: ReconnectPolicy,
    last_generation: AtomicU64,
    /// Reconnects issued since the last `Open`
    reconnects_since_open: AtomicU32,
}

impl SessionConnector {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        store: Arc<dyn CredentialStore>,
        slot: Arc<SessionSlot>,
        forwarder: Arc<InboundForwarder>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            backend,
            store,
            slot,
            forwarder,
            policy,
            last_generation: AtomicU64::new(0),
            reconnects_since_open: AtomicU32::new(0),
        }
    }

    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }

    /// Start a connection attempt and publish its handle
    ///
    /// Returns once the handle is in the slot (state `Connecting`); the
    /// connection itself progresses on the driver task.
    pub async fn connect(self: &Arc<Self>) -> Result<Arc<SessionHandle>, SessionError> {
        let credentials = self.store.load().await?;
        let opened = self.backend.open(credentials).await?;

        let generation = self.last_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(SessionHandle::new(generation, opened.transport));

        if let Some(previous) = self.slot.replace(handle.clone()) {
            previous.mark_closed();
            debug!(
                "Session #{} replaced by #{}",
                previous.generation(),
                generation
            );
        }

        info!("🔄 Connecting to WhatsApp (session #{})", generation);
        self.spawn_driver(handle.clone(), opened.events);
        Ok(handle)
    }

    /// First connect; a backend that fails to start is retried like a
    /// transient close instead of ending the process
    pub async fn start(self: &Arc<Self>) {
        if let Err(e) = self.connect().await {
            error!("Failed to start WhatsApp session: {}", e);
            let attempt = self.reconnects_since_open.load(Ordering::SeqCst);
            self.schedule_reconnect(self.policy.delay_for(attempt));
        }
    }

    fn spawn_driver(self: &Arc<Self>, handle: Arc<SessionHandle>, events: mpsc::Receiver<SessionEvent>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive(handle, events).await });
    }

    /// Consume one session's events until it closes or is superseded
    async fn drive(
        self: Arc<Self>,
        handle: Arc<SessionHandle>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        let generation = handle.generation();

        loop {
            let event = match events.recv().await {
                Some(event) => event,
                None => {
                    warn!("Event stream of session #{} ended without a close", generation);
                    SessionEvent::ConnectionClosed(DisconnectReason::TransportExited)
                }
            };

            if !self.slot.is_current(generation) {
                debug!("Ignoring event from superseded session #{}", generation);
                return;
            }

            let attempt = self.reconnects_since_open.load(Ordering::SeqCst);
            match decide(event, attempt, &self.policy) {
                Action::ShowPairing(payload) => pairing::display_challenge(&payload),
                Action::MarkOpen => {
                    handle.mark_open();
                    self.reconnects_since_open.store(0, Ordering::SeqCst);
                    info!("✅ WhatsApp connected successfully!");
                }
                Action::PersistCredentials(credentials) => {
                    // Saved before the next event is looked at
                    if let Err(e) = self.store.save(&credentials).await {
                        error!("Failed to persist credentials: {}", e);
                    }
                }
                Action::Forward(batch) => {
                    let forwarder = Arc::clone(&self.forwarder);
                    tokio::spawn(async move {
                        forwarder.handle_batch(&batch).await;
                    });
                }
                Action::Stop { reason } => {
                    self.slot.mark_logged_out();
                    warn!("Connection closed ({}). Reconnecting: false", reason);
                    return;
                }
                Action::Reconnect { reason, delay } => {
                    handle.mark_closed();
                    info!("Connection closed ({}). Reconnecting: true", reason);
                    self.schedule_reconnect(delay);
                    return;
                }
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        self.reconnects_since_open.fetch_add(1, Ordering::SeqCst);
        let this = Arc::clone(self);

        tokio::spawn(async move {
            if !delay.is_zero() {
                info!("⏳ Reconnecting in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            if let Err(e) = this.connect().await {
                error!("Reconnect attempt failed: {}", e);
                let attempt = this.reconnects_since_open.load(Ordering::SeqCst);
                this.schedule_reconnect(this.policy.delay_for(attempt));
            }
        });
    }
}
