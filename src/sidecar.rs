//! Baileys sidecar backend
//!
//! The WhatsApp Web protocol runs in a Node.js sidecar process. The relay
//! talks to it over stdio with newline-delimited JSON:
//!
//! ```text
//! relay ──stdin──▶ {"type":"init","credentials":{..},"browser":["MyApp","Chrome","1.0.0"]}
//!                  {"type":"send","id":"<uuid>","jid":"..@s.whatsapp.net","text":".."}
//!
//! relay ◀─stdout── {"type":"qr","qr":".."}
//!                  {"type":"open"}
//!                  {"type":"close","status_code":401,"message":".."}
//!                  {"type":"creds","credentials":{..}}
//!                  {"type":"messages","messages":[..]}
//!                  {"type":"send_result","id":"<uuid>","ok":true,"error":null}
//! ```
//!
//! One process per session handle. Dropping the handle kills the process.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::session::{
    Credentials, OpenedSession, SessionBackend, SessionError, SessionEvent, SessionTransport,
};
use crate::types::{DisconnectReason, InboundMessage};

/// Channel depth for commands and events
const CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Wire Protocol
// =============================================================================

/// Line sent to the sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarCommand {
    Init {
        credentials: Option<Credentials>,
        browser: [String; 3],
    },
    Send {
        id: Uuid,
        jid: String,
        text: String,
    },
}

/// Line received from the sidecar
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarEvent {
    Qr {
        qr: String,
    },
    Open,
    Close {
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    Creds {
        credentials: Credentials,
    },
    Messages {
        messages: Vec<InboundMessage>,
    },
    SendResult {
        id: Uuid,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

impl SidecarEvent {
    /// Lifecycle/message view of this line; `None` for send results
    pub fn into_session_event(self) -> Option<SessionEvent> {
        match self {
            Self::Qr { qr } => Some(SessionEvent::PairingChallenge(qr)),
            Self::Open => Some(SessionEvent::ConnectionOpen),
            Self::Close { status_code, .. } => Some(SessionEvent::ConnectionClosed(
                DisconnectReason::from_status_code(status_code),
            )),
            Self::Creds { credentials } => Some(SessionEvent::CredentialsUpdated(credentials)),
            Self::Messages { messages } => Some(SessionEvent::MessagesReceived(messages)),
            Self::SendResult { .. } => None,
        }
    }
}

type SendReply = oneshot::Sender<Result<(), String>>;

// =============================================================================
// Backend
// =============================================================================

/// Spawns one sidecar process per connect attempt
#[derive(Debug, Clone)]
pub struct SidecarBackend {
    command: String,
    script: PathBuf,
    browser: [String; 3],
}

impl SidecarBackend {
    pub fn new(command: impl Into<String>, script: impl Into<PathBuf>, browser_name: &str) -> Self {
        Self {
            command: command.into(),
            script: script.into(),
            browser: [
                browser_name.to_string(),
                "Chrome".to_string(),
                "1.0.0".to_string(),
            ],
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.sidecar_command.clone(),
            config.sidecar_script.clone(),
            &config.browser_name,
        )
    }
}

#[async_trait]
impl SessionBackend for SidecarBackend {
    async fn open(&self, credentials: Option<Credentials>) -> Result<OpenedSession, SessionError> {
        debug!("Spawning sidecar: {} {:?}", self.command, self.script);

        let mut child = Command::new(&self.command)
            .arg(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("sidecar stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("sidecar stdout unavailable"))?;

        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pending: Arc<DashMap<Uuid, SendReply>> = Arc::new(DashMap::new());

        command_tx
            .send(SidecarCommand::Init {
                credentials,
                browser: self.browser.clone(),
            })
            .await
            .map_err(|_| SessionError::TransportClosed)?;

        tokio::spawn(write_commands(stdin, command_rx));
        tokio::spawn(read_events(stdout, event_tx, pending.clone()));

        info!("🧩 Sidecar started (pid {:?})", child.id());

        Ok(OpenedSession {
            transport: Box::new(SidecarTransport {
                commands: command_tx,
                pending,
                _child: Mutex::new(child),
            }),
            events: event_rx,
        })
    }
}

/// Write queued commands as JSON lines until the channel or pipe closes
async fn write_commands(mut stdin: ChildStdin, mut commands: mpsc::Receiver<SidecarCommand>) {
    while let Some(command) = commands.recv().await {
        let mut line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode sidecar command: {}", e);
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!("Sidecar stdin closed: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("Sidecar stdin flush failed: {}", e);
            break;
        }
    }
}

/// Parse sidecar output into session events and send results
async fn read_events(
    stdout: ChildStdout,
    events: mpsc::Sender<SessionEvent>,
    pending: Arc<DashMap<Uuid, SendReply>>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read sidecar output: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<SidecarEvent>(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring unparseable sidecar line: {} ({})", line, e);
                continue;
            }
        };

        if let SidecarEvent::Close {
            status_code,
            message,
        } = &event
        {
            debug!("Sidecar reported close: {:?} {:?}", status_code, message);
        }

        match event {
            SidecarEvent::SendResult { id, ok, error } => complete_send(&pending, id, ok, error),
            other => {
                if let Some(session_event) = other.into_session_event() {
                    if events.send(session_event).await.is_err() {
                        // Connector stopped listening; the handle was replaced
                        break;
                    }
                }
            }
        }
    }

    let abandoned: Vec<Uuid> = pending.iter().map(|entry| *entry.key()).collect();
    for id in abandoned {
        if let Some((_, reply)) = pending.remove(&id) {
            let _ = reply.send(Err("sidecar exited".to_string()));
        }
    }

    let _ = events
        .send(SessionEvent::ConnectionClosed(DisconnectReason::TransportExited))
        .await;
    debug!("Sidecar output closed");
}

fn complete_send(pending: &DashMap<Uuid, SendReply>, id: Uuid, ok: bool, error: Option<String>) {
    match pending.remove(&id) {
        Some((_, reply)) => {
            let result = if ok {
                Ok(())
            } else {
                Err(error.unwrap_or_else(|| "unknown send error".to_string()))
            };
            if reply.send(result).is_err() {
                debug!("Send {} completed after its caller went away", id);
            }
        }
        None => warn!("No pending send found for result {}", id),
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Outbound half of a sidecar session
struct SidecarTransport {
    commands: mpsc::Sender<SidecarCommand>,
    /// Sends awaiting a `send_result`: id -> reply channel
    pending: Arc<DashMap<Uuid, SendReply>>,
    /// Held so the process dies with the handle
    _child: Mutex<Child>,
}

#[async_trait]
impl SessionTransport for SidecarTransport {
    async fn send_text(&self, jid: &str, text: &str) -> Result<(), SessionError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let command = SidecarCommand::Send {
            id,
            jid: jid.to_string(),
            text: text.to_string(),
        };
        if self.commands.send(command).await.is_err() {
            self.pending.remove(&id);
            return Err(SessionError::TransportClosed);
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(SessionError::Send(message)),
            Err(_) => Err(SessionError::TransportClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use std::io::Write;
    use std::time::Duration;

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_command_encoding() {
        let id = Uuid::nil();
        let line = serde_json::to_value(SidecarCommand::Send {
            id,
            jid: "1@s.whatsapp.net".to_string(),
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(line["type"], "send");
        assert_eq!(line["id"], id.to_string());
        assert_eq!(line["jid"], "1@s.whatsapp.net");

        let init = serde_json::to_value(SidecarCommand::Init {
            credentials: None,
            browser: ["MyApp".into(), "Chrome".into(), "1.0.0".into()],
        })
        .unwrap();
        assert_eq!(init["type"], "init");
        assert!(init["credentials"].is_null());
        assert_eq!(init["browser"][0], "MyApp");
    }

    #[test]
    fn test_event_decoding() {
        let event: SidecarEvent =
            serde_json::from_str(r#"{"type":"close","status_code":401,"message":"logged out"}"#)
                .unwrap();
        assert!(matches!(
            event.into_session_event(),
            Some(SessionEvent::ConnectionClosed(DisconnectReason::LoggedOut))
        ));

        let event: SidecarEvent = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert!(matches!(
            event.into_session_event(),
            Some(SessionEvent::ConnectionClosed(DisconnectReason::Other(None)))
        ));

        let event: SidecarEvent = serde_json::from_str(
            r#"{"type":"messages","messages":[{"key":{"remoteJid":"1@s.whatsapp.net","fromMe":false},"message":{"conversation":"yo"}}]}"#,
        )
        .unwrap();
        match event.into_session_event() {
            Some(SessionEvent::MessagesReceived(batch)) => {
                assert_eq!(batch.len(), 1);
                assert_eq!(batch[0].sender(), Some("1@s.whatsapp.net"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let event: SidecarEvent = serde_json::from_str(&format!(
            r#"{{"type":"send_result","id":"{}","ok":true}}"#,
            Uuid::nil()
        ))
        .unwrap();
        assert!(event.into_session_event().is_none());
    }

    #[tokio::test]
    async fn test_sidecar_lifecycle_events() {
        let sidecar = script(
            r#"read init
echo '{"type":"qr","qr":"2@pairing"}'
echo 'not json'
echo '{"type":"creds","credentials":{"registrationId":7}}'
echo '{"type":"open"}'
"#,
        );
        let backend = SidecarBackend::new("sh", sidecar.path(), "MyApp");
        let mut opened = backend.open(None).await.unwrap();

        assert!(matches!(
            next_event(&mut opened.events).await,
            SessionEvent::PairingChallenge(ref qr) if qr == "2@pairing"
        ));
        assert!(matches!(
            next_event(&mut opened.events).await,
            SessionEvent::CredentialsUpdated(ref creds) if creds["registrationId"] == 7
        ));
        assert!(matches!(
            next_event(&mut opened.events).await,
            SessionEvent::ConnectionOpen
        ));
        // Script exits: the stream reports a transient close
        assert!(matches!(
            next_event(&mut opened.events).await,
            SessionEvent::ConnectionClosed(DisconnectReason::TransportExited)
        ));
    }

    #[tokio::test]
    async fn test_send_is_correlated_with_result() {
        let sidecar = script(
            r#"read init
echo '{"type":"open"}'
read cmd
id=$(printf '%s' "$cmd" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
echo "{\"type\":\"send_result\",\"id\":\"$id\",\"ok\":true}"
read cmd
id=$(printf '%s' "$cmd" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
echo "{\"type\":\"send_result\",\"id\":\"$id\",\"ok\":false,\"error\":\"not on whatsapp\"}"
read never
"#,
        );
        let backend = SidecarBackend::new("sh", sidecar.path(), "MyApp");
        let mut opened = backend.open(None).await.unwrap();
        assert!(matches!(
            next_event(&mut opened.events).await,
            SessionEvent::ConnectionOpen
        ));

        let handle = SessionHandle::new(1, opened.transport);
        handle.mark_open();

        handle
            .send_text("15551234567@s.whatsapp.net", "hi")
            .await
            .unwrap();

        let err = handle
            .send_text("15551234567@s.whatsapp.net", "again")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Send(ref msg) if msg == "not on whatsapp"));
    }

    #[tokio::test]
    async fn test_pending_send_fails_when_sidecar_exits() {
        let sidecar = script("read init\nread cmd\n");
        let backend = SidecarBackend::new("sh", sidecar.path(), "MyApp");
        let opened = backend.open(None).await.unwrap();

        let handle = SessionHandle::new(1, opened.transport);
        handle.mark_open();

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            handle.send_text("1@s.whatsapp.net", "hi"),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, SessionError::Send(_) | SessionError::TransportClosed));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let backend = SidecarBackend::new("/nonexistent/node", "index.mjs", "MyApp");
        assert!(matches!(
            backend.open(None).await,
            Err(SessionError::Spawn(_))
        ));
    }
}
