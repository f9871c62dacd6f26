//! Inbound message: the three fields of a group-message event the relay acts on.

/// A group message to be answered. Built once from the gateway event and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub raw_text: String,
    pub group_id: u64,
    pub user_id: u64,
}
