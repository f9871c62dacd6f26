//! OneBot channel: inbound group-message events and outbound group replies.
//!
//! The dispatcher talks to the gateway through [`ReplyChannel`] so tests can swap in a fake.

mod inbound;
mod onebot;

use async_trait::async_trait;

pub use inbound::InboundMessage;
pub use onebot::{
    DeliveryError, OnebotClient, OnebotEnvelope, OnebotGroupMessageEvent, OutboundMessage,
    Segment,
};

/// Sends one group message to the messaging gateway. One call is one attempt; no internal retry.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn send_group_message(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}
