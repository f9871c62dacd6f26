//! OneBot v11: group-message event payload and the `send_group_msg` HTTP API.

use crate::channels::inbound::InboundMessage;
use crate::channels::ReplyChannel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Just enough of an event report to decide whether it is a group message.
/// Missing fields are treated as "could be", so bare test payloads still get through.
#[derive(Debug, Default, Deserialize)]
pub struct OnebotEnvelope {
    #[serde(default)]
    pub post_type: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
}

impl OnebotEnvelope {
    pub fn is_group_message(&self) -> bool {
        self.post_type.as_deref().map_or(true, |p| p == "message")
            && self.message_type.as_deref().map_or(true, |m| m == "group")
    }
}

/// Group message event (HTTP POST report body). Only `raw_message`, `group_id` and `user_id`
/// are required. `message_id` and `sender` are kept untyped for logging: implementations
/// disagree on their types (e.g. string message ids) and they must never reject an event.
/// Every other field is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct OnebotGroupMessageEvent {
    pub raw_message: String,
    pub group_id: u64,
    pub user_id: u64,
    #[serde(default)]
    pub message_id: Option<serde_json::Value>,
    #[serde(default)]
    pub sender: Option<serde_json::Value>,
}

impl OnebotGroupMessageEvent {
    /// Sender nickname when present as a string.
    pub fn sender_nickname(&self) -> Option<&str> {
        self.sender
            .as_ref()
            .and_then(|s| s.get("nickname"))
            .and_then(|v| v.as_str())
    }
}

impl From<OnebotGroupMessageEvent> for InboundMessage {
    fn from(event: OnebotGroupMessageEvent) -> Self {
        InboundMessage {
            raw_text: event.raw_message,
            group_id: event.group_id,
            user_id: event.user_id,
        }
    }
}

/// One message segment of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Segment {
    /// Mention; `qq` is the user id as a decimal string.
    At { qq: String },
    Text { text: String },
}

/// `send_group_msg` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub group_id: u64,
    pub message: Vec<Segment>,
}

impl OutboundMessage {
    /// Reply addressed to `user_id`: mention segment first, then the text.
    pub fn reply(group_id: u64, user_id: u64, text: impl Into<String>) -> Self {
        Self {
            group_id,
            message: vec![
                Segment::At {
                    qq: user_id.to_string(),
                },
                Segment::Text { text: text.into() },
            ],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("onebot request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("onebot address not configured")]
    NotConfigured,
}

/// Client for the OneBot HTTP API (e.g. go-cqhttp, NapCat, Lagrange).
#[derive(Clone)]
pub struct OnebotClient {
    base_url: Option<String>,
    access_token: Option<String>,
    verbose: bool,
    client: reqwest::Client,
}

impl OnebotClient {
    pub fn new(base_url: Option<String>, access_token: Option<String>, verbose: bool) -> Self {
        Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            access_token,
            verbose,
            client: reqwest::Client::new(),
        }
    }

    /// POST /send_group_msg. Success means the request completed at the transport level;
    /// the response status and body are logged but not checked.
    pub async fn send_group_msg(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let base = self.base_url.as_deref().ok_or(DeliveryError::NotConfigured)?;
        let url = format!("{}/send_group_msg", base);
        let mut req = self.client.post(&url).json(message);
        if let Some(ref token) = self.access_token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            log::info!("send_group_msg to group {}: {}", message.group_id, status);
        } else {
            log::warn!(
                "send_group_msg to group {} returned {}",
                message.group_id,
                status
            );
        }
        if self.verbose {
            let body = res.text().await.unwrap_or_default();
            log::info!("send_group_msg response body: {}", body);
        }
        Ok(())
    }
}

#[async_trait]
impl ReplyChannel for OnebotClient {
    async fn send_group_message(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.send_group_msg(message).await
    }
}
