//! Inbound forwarder - relays received WhatsApp messages to the chat sink
//!
//! Delivery is best effort: one POST per qualifying message, failures are
//! logged and dropped.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, StatusCode, header};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::types::{ForwardPayload, InboundMessage};

/// Why a batch produced no forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyBatch,
    NoPayload,
    FromMe,
    MissingSender,
}

/// Result of handling one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    Skipped(SkipReason),
    Delivered,
    Failed,
}

/// Forwarding error type
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error! status: {0}")]
    Status(StatusCode),
}

/// Pick the message to forward out of a batch
///
/// Only the first message of a batch is considered.
pub fn select(batch: &[InboundMessage]) -> Result<(String, String), SkipReason> {
    let msg = batch.first().ok_or(SkipReason::EmptyBatch)?;
    let content = msg.message.as_ref().ok_or(SkipReason::NoPayload)?;
    if msg.is_from_me() {
        return Err(SkipReason::FromMe);
    }
    let sender = msg.sender().ok_or(SkipReason::MissingSender)?;
    Ok((sender.to_string(), content.text()))
}

/// HTTP client for the forwarding sink
#[derive(Clone)]
pub struct InboundForwarder {
    http_client: Client,
    url: String,
    authorization: Option<String>,
}

impl InboundForwarder {
    pub fn new(
        url: impl Into<String>,
        authorization: Option<String>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().context("Failed to build forwarding client")?;

        Ok(Self {
            http_client,
            url: url.into(),
            authorization,
        })
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        if config.forward_authorization.is_none() {
            warn!("No forwarding credential configured, sending without Authorization header");
        }
        Self::new(
            config.forward_url.clone(),
            config.forward_authorization.clone(),
            config.forward_timeout(),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Filter, normalize and forward one received batch
    pub async fn handle_batch(&self, batch: &[InboundMessage]) -> ForwardOutcome {
        let (sender, text) = match select(batch) {
            Ok(selected) => selected,
            Err(SkipReason::MissingSender) => {
                warn!("Dropping inbound message without a remote JID");
                return ForwardOutcome::Skipped(SkipReason::MissingSender);
            }
            Err(reason) => {
                debug!("Skipping inbound batch: {:?}", reason);
                return ForwardOutcome::Skipped(reason);
            }
        };

        info!("📩 Received message from {}: {:?}", sender, text);

        let payload = ForwardPayload::new(sender, text, Utc::now());
        match self.forward(&payload).await {
            Ok(()) => {
                info!("✅ Message forwarded successfully");
                ForwardOutcome::Delivered
            }
            Err(e) => {
                error!("❌ Failed to forward message: {}", e);
                ForwardOutcome::Failed
            }
        }
    }

    /// POST one payload to the sink; only the status code is inspected
    pub async fn forward(&self, payload: &ForwardPayload) -> Result<(), ForwardError> {
        let mut request = self.http_client.post(&self.url).json(payload);
        if let Some(authorization) = &self.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageContent, MessageKey};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn text_message(jid: &str, text: &str, from_me: bool) -> InboundMessage {
        InboundMessage {
            key: MessageKey {
                remote_jid: Some(jid.to_string()),
                from_me,
                id: Some("3EB0".to_string()),
                participant: None,
            },
            message: Some(MessageContent {
                conversation: Some(text.to_string()),
                extended_text_message: None,
            }),
            message_timestamp: Some(1709251200),
            push_name: None,
        }
    }

    fn forwarder_for(server: &MockServer) -> InboundForwarder {
        InboundForwarder::new(
            format!("{}/api/chat", server.uri()),
            Some("Basic cmVsYXk6c2VjcmV0".to_string()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_select_first_message_only() {
        let batch = vec![
            text_message("1@s.whatsapp.net", "first", false),
            text_message("2@s.whatsapp.net", "second", false),
        ];
        assert_eq!(
            select(&batch),
            Ok(("1@s.whatsapp.net".to_string(), "first".to_string()))
        );
    }

    #[test]
    fn test_select_skips() {
        assert_eq!(select(&[]), Err(SkipReason::EmptyBatch));

        let from_me = text_message("1@s.whatsapp.net", "echo", true);
        assert_eq!(select(&[from_me]), Err(SkipReason::FromMe));

        let mut no_payload = text_message("1@s.whatsapp.net", "x", false);
        no_payload.message = None;
        assert_eq!(select(&[no_payload]), Err(SkipReason::NoPayload));

        let mut no_sender = text_message("1@s.whatsapp.net", "x", false);
        no_sender.key.remote_jid = None;
        assert_eq!(select(&[no_sender]), Err(SkipReason::MissingSender));
    }

    #[test]
    fn test_select_first_skipped_ignores_rest() {
        let batch = vec![
            text_message("me@s.whatsapp.net", "mine", true),
            text_message("2@s.whatsapp.net", "theirs", false),
        ];
        assert_eq!(select(&batch), Err(SkipReason::FromMe));
    }

    #[tokio::test]
    async fn test_forwards_payload_with_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(header("authorization", "Basic cmVsYXk6c2VjcmV0"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = forwarder_for(&server)
            .handle_batch(&[text_message("15551234567@s.whatsapp.net", "hi", false)])
            .await;
        assert_eq!(outcome, ForwardOutcome::Delivered);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["from"], "15551234567@s.whatsapp.net");
        assert_eq!(body["text"], "hi");
        assert!(
            chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap()).is_ok()
        );
    }

    #[tokio::test]
    async fn test_from_me_issues_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = forwarder_for(&server)
            .handle_batch(&[text_message("1@s.whatsapp.net", "echo", true)])
            .await;
        assert_eq!(outcome, ForwardOutcome::Skipped(SkipReason::FromMe));
    }

    #[tokio::test]
    async fn test_payloadless_message_issues_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut receipt = text_message("1@s.whatsapp.net", "unused", false);
        receipt.message = None;

        let outcome = forwarder_for(&server).handle_batch(&[receipt]).await;
        assert_eq!(outcome, ForwardOutcome::Skipped(SkipReason::NoPayload));
    }

    #[tokio::test]
    async fn test_sink_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server);
        let batch = [text_message("1@s.whatsapp.net", "hello", false)];

        // One request per batch even on failure; the next batch still goes out
        assert_eq!(forwarder.handle_batch(&batch).await, ForwardOutcome::Failed);
        assert_eq!(forwarder.handle_batch(&batch).await, ForwardOutcome::Failed);
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_a_failure() {
        let forwarder = InboundForwarder::new("http://127.0.0.1:9/api/chat", None, None).unwrap();
        let payload = ForwardPayload::new("1@s.whatsapp.net", "x", Utc::now());
        assert!(matches!(
            forwarder.forward(&payload).await,
            Err(ForwardError::Http(_))
        ));
    }
}
