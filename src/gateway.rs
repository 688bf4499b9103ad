//! Outbound gateway - HTTP API for sending WhatsApp messages

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::session::{SessionError, SessionSlot};
use crate::types::{ErrorBody, SendRequest, SendResponse, StatusBody, USER_JID_SUFFIX};

/// Gateway server state
#[derive(Clone)]
pub struct GatewayState {
    pub slot: Arc<SessionSlot>,
}

/// Failures surfaced to `/send` callers
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("number and message are required")]
    InvalidRequest,

    #[error("WhatsApp not connected yet")]
    NotConnected,

    #[error("Failed to send message")]
    SendFailed,
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Self::SendFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Turn a phone number into a full user JID; already-suffixed input is kept
pub fn normalize_jid(number: &str) -> String {
    if number.contains(USER_JID_SUFFIX) {
        number.to_string()
    } else {
        format!("{}{}", number, USER_JID_SUFFIX)
    }
}

/// Build the HTTP router
pub fn router(slot: Arc<SessionSlot>) -> Router {
    let state = GatewayState { slot };

    Router::new()
        .route("/send", post(send_message))
        .route("/status", get(status))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Run the gateway HTTP server until `shutdown` resolves
pub async fn run_server<F>(
    addr: SocketAddr,
    slot: Arc<SessionSlot>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(slot);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 Server running on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Current connection status
async fn status(State(state): State<GatewayState>) -> Json<StatusBody> {
    Json(StatusBody {
        status: state.slot.status(),
    })
}

/// Middleware to log all incoming HTTP requests
async fn log_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("🌐 HTTP {} {}", method, path);

    let response = next.run(req).await;

    info!("{} {} -> {}", method, path, response.status());

    response
}

/// Send a text message through the current session
async fn send_message(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<SendResponse>, GatewayError> {
    let request: SendRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejecting unparseable send body: {}", e);
            return Err(GatewayError::InvalidRequest);
        }
    };

    let (number, message) = match (request.number, request.message) {
        (Some(number), Some(message)) if !number.is_empty() && !message.is_empty() => {
            (number, message)
        }
        _ => return Err(GatewayError::InvalidRequest),
    };

    let Some(handle) = state.slot.open_handle() else {
        warn!("Send rejected: session status is {:?}", state.slot.status());
        return Err(GatewayError::NotConnected);
    };

    let jid = normalize_jid(&number);

    match handle.send_text(&jid, &message).await {
        Ok(()) => {
            info!("📤 Message sent to {}: {}", jid, message);
            Ok(Json(SendResponse { success: true }))
        }
        // Closed between the check and the send
        Err(SessionError::NotConnected) => Err(GatewayError::NotConnected),
        Err(e) => {
            error!("Error sending message to {}: {}", jid, e);
            Err(GatewayError::SendFailed)
        }
    }
}
