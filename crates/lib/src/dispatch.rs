//! Reply dispatcher: build the `[at, text]` reply for an outcome and deliver it with retries.

use crate::channels::{OutboundMessage, ReplyChannel};
use crate::completion::CompletionOutcome;
use crate::retry::{run_tier, RetryPolicy, TierState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered { attempts: u32 },
    Failed { attempts: u32 },
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }
}

/// Outbound message for `outcome`, addressed to `user_id` in `group_id`.
pub fn build_reply(outcome: &CompletionOutcome, group_id: u64, user_id: u64) -> OutboundMessage {
    OutboundMessage::reply(group_id, user_id, outcome.text())
}

/// Deliver the reply, retrying transport failures with the same policy used for completion.
pub async fn deliver<C>(
    channel: &C,
    outcome: &CompletionOutcome,
    group_id: u64,
    user_id: u64,
    policy: &RetryPolicy,
) -> DeliveryResult
where
    C: ReplyChannel + ?Sized,
{
    let message = build_reply(outcome, group_id, user_id);
    let state = run_tier(policy, "send_group_msg", |_| channel.send_group_message(&message)).await;
    match state {
        TierState::Succeeded { attempts, .. } => DeliveryResult::Delivered { attempts },
        other => {
            log::error!(
                "reply to group {} not delivered after {} attempt(s)",
                group_id,
                other.attempts()
            );
            DeliveryResult::Failed {
                attempts: other.attempts(),
            }
        }
    }
}
