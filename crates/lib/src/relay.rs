//! Entry point for one inbound event: parse → normalize → complete → deliver.
//!
//! Only a malformed event is reported back as an error. Completion failures turn into a notice
//! for the user and delivery failures are logged; both still count as handled.

use crate::channels::{InboundMessage, OnebotClient, OnebotGroupMessageEvent, ReplyChannel};
use crate::completion::{self, CompletionOutcome, ModelTiers};
use crate::config::Settings;
use crate::dispatch::{self, DeliveryResult};
use crate::llm::{CompletionBackend, OpenAiClient};
use crate::normalize::normalize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed event: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What happened to one handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleReport {
    pub outcome: CompletionOutcome,
    pub delivery: DeliveryResult,
}

/// Relay with its collaborators. Cheap to clone; shared by all invocations of a process.
#[derive(Clone)]
pub struct Relay {
    settings: Arc<Settings>,
    models: ModelTiers,
    backend: Arc<dyn CompletionBackend>,
    channel: Arc<dyn ReplyChannel>,
}

impl Relay {
    pub fn new(
        settings: Arc<Settings>,
        backend: Arc<dyn CompletionBackend>,
        channel: Arc<dyn ReplyChannel>,
    ) -> Self {
        let models = ModelTiers::new(
            settings.completion.primary_model.clone(),
            settings.completion.secondary_model.clone(),
        );
        Self {
            settings,
            models,
            backend,
            channel,
        }
    }

    /// Relay wired to the OpenAI-compatible service and the OneBot HTTP API from `settings`.
    pub fn from_settings(settings: Settings) -> Self {
        let backend = OpenAiClient::new(
            settings.completion.base_url.clone(),
            settings.completion.api_key.clone(),
            settings.verbose,
        );
        let channel = OnebotClient::new(
            settings.onebot.base_url.clone(),
            settings.onebot.access_token.clone(),
            settings.verbose,
        );
        Self::new(Arc::new(settings), Arc::new(backend), Arc::new(channel))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Parse a group-message event body.
    pub fn parse_event(&self, body: &[u8]) -> Result<InboundMessage, RelayError> {
        let event: OnebotGroupMessageEvent = serde_json::from_slice(body)?;
        if self.settings.verbose {
            log::info!(
                "event: group={} user={} message_id={} sender={:?}",
                event.group_id,
                event.user_id,
                event.message_id.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                event.sender_nickname()
            );
        }
        Ok(event.into())
    }

    /// Handle one raw event body. Returns `Err` only when the body cannot be parsed, in which
    /// case no completion or delivery call is made.
    pub async fn handle(&self, body: &[u8]) -> Result<HandleReport, RelayError> {
        let msg = match self.parse_event(body) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("{}", e);
                return Err(e);
            }
        };
        Ok(self.process(msg).await)
    }

    /// Answer an already parsed message. Always produces exactly one delivery sequence.
    pub async fn process(&self, msg: InboundMessage) -> HandleReport {
        let prompt = normalize(&msg.raw_text);
        if self.settings.verbose {
            log::info!("clean message: {}", prompt);
        }
        let policy = self.settings.retry;
        let outcome = completion::complete(
            self.backend.as_ref(),
            &prompt,
            &self.models,
            &policy,
            self.settings.verbose,
        )
        .await;
        let delivery = dispatch::deliver(
            self.channel.as_ref(),
            &outcome,
            msg.group_id,
            msg.user_id,
            &policy,
        )
        .await;
        log::info!(
            "group {} user {}: outcome={} delivered={}",
            msg.group_id,
            msg.user_id,
            outcome.kind(),
            delivery.is_delivered()
        );
        HandleReport { outcome, delivery }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{DeliveryError, OutboundMessage, Segment};
    use crate::config::Config;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Primary model always fails; secondary answers with `reply`.
    struct PrimaryDown {
        primary: String,
        reply: String,
        prompts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl CompletionBackend for PrimaryDown {
        async fn complete(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
            self.prompts
                .lock()
                .unwrap()
                .push((model.to_string(), prompt.to_string()));
            if model == self.primary {
                Err(LlmError::Api("500 upstream".to_string()))
            } else {
                Ok(self.reply.clone())
            }
        }
    }

    struct AlwaysDown {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for AlwaysDown {
        async fn complete(&self, _model: &str, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::MissingApiKey)
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutboundMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl ReplyChannel for Recorder {
        async fn send_group_message(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(message.clone());
            if self.fail {
                Err(DeliveryError::NotConfigured)
            } else {
                Ok(())
            }
        }
    }

    fn settings(max_retries: &str) -> Arc<Settings> {
        let max_retries = max_retries.to_string();
        Arc::new(Settings::resolve(&Config::default(), move |key| match key {
            "MAX_RETRIES" => Some(max_retries.clone()),
            "RETRY_DELAY" => Some("0".to_string()),
            _ => None,
        }))
    }

    #[tokio::test]
    async fn degraded_scenario_sends_prefixed_reply_to_group() {
        let backend = Arc::new(PrimaryDown {
            primary: "gpt-4-0314".to_string(),
            reply: "hi".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let channel = Arc::new(Recorder::default());
        let relay = Relay::new(settings("2"), backend.clone(), channel.clone());

        let report = relay
            .handle(br#"{"raw_message": "[CQ:at,qq=12345]hello", "group_id": 100, "user_id": 12345}"#)
            .await
            .unwrap();

        assert_eq!(report.delivery, DeliveryResult::Delivered { attempts: 1 });
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].group_id, 100);
        assert_eq!(
            sent[0].message,
            vec![
                Segment::At {
                    qq: "12345".to_string()
                },
                Segment::Text {
                    text: "(对话降级至GPT-3.5)\nhi".to_string()
                },
            ]
        );
        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts.iter().all(|(_, p)| p == "hello"));
    }

    #[tokio::test]
    async fn malformed_event_makes_no_calls() {
        let backend = Arc::new(AlwaysDown {
            calls: AtomicUsize::new(0),
        });
        let channel = Arc::new(Recorder::default());
        let relay = Relay::new(settings("3"), backend.clone(), channel.clone());

        let err = relay.handle(b"{not json").await.unwrap_err();
        assert!(matches!(err, RelayError::Parse(_)));
        let err = relay.handle(br#"{"group_id": 1}"#).await.unwrap_err();
        assert!(matches!(err, RelayError::Parse(_)));

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_failed_still_delivers_notice_once() {
        let backend = Arc::new(AlwaysDown {
            calls: AtomicUsize::new(0),
        });
        let channel = Arc::new(Recorder::default());
        let relay = Relay::new(settings("3"), backend.clone(), channel.clone());

        let report = relay
            .process(InboundMessage {
                raw_text: "question".to_string(),
                group_id: 7,
                user_id: 8,
            })
            .await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
        assert_eq!(
            report.outcome,
            CompletionOutcome::AllFailed(completion::ALL_FAILED_NOTICE.to_string())
        );
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].message[1],
            Segment::Text {
                text: completion::ALL_FAILED_NOTICE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn delivery_failure_is_not_an_error() {
        let backend = Arc::new(PrimaryDown {
            primary: "other".to_string(),
            reply: "answer".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let channel = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
            fail: true,
        });
        let relay = Relay::new(settings("2"), backend, channel.clone());

        let report = relay
            .handle(br#"{"raw_message": "q", "group_id": 1, "user_id": 2}"#)
            .await
            .unwrap();
        assert_eq!(report.outcome, CompletionOutcome::Primary("answer".to_string()));
        assert_eq!(report.delivery, DeliveryResult::Failed { attempts: 2 });
        assert_eq!(channel.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn loosely_typed_passthrough_fields_still_get_a_reply() {
        let backend = Arc::new(PrimaryDown {
            primary: "other".to_string(),
            reply: "answer".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let channel = Arc::new(Recorder::default());
        let mut s = (*settings("1")).clone();
        s.verbose = true;
        let relay = Relay::new(Arc::new(s), backend, channel.clone());

        let report = relay
            .handle(
                br#"{"raw_message": "hi", "group_id": 1, "user_id": 2, "message_id": "abc",
                     "time": 1700000000.5, "self_id": "10001", "sender": {"user_id": "2"}}"#,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, CompletionOutcome::Primary("answer".to_string()));
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].group_id, 1);
    }
}
