//! Completion orchestrator: primary model with retries, then the secondary model with its own
//! retries, then a fixed notice. Exactly one [`CompletionOutcome`] per prompt.

use crate::llm::CompletionBackend;
use crate::retry::{run_tier, RetryPolicy, TierState};

/// Prefix for replies produced by the secondary model.
pub const DEGRADATION_NOTICE: &str = "(对话降级至GPT-3.5)\n";

/// Reply sent when both tiers are exhausted.
pub const ALL_FAILED_NOTICE: &str = "GPT-4、GPT-3.5尝试均失败，请稍后再试。";

/// Model ids for the two tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTiers {
    pub primary: String,
    pub secondary: String,
}

impl ModelTiers {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Primary(String),
    /// Text already carries [`DEGRADATION_NOTICE`].
    DegradedSecondary(String),
    AllFailed(String),
}

impl CompletionOutcome {
    /// Reply text to deliver.
    pub fn text(&self) -> &str {
        match self {
            CompletionOutcome::Primary(t)
            | CompletionOutcome::DegradedSecondary(t)
            | CompletionOutcome::AllFailed(t) => t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CompletionOutcome::Primary(_) => "primary",
            CompletionOutcome::DegradedSecondary(_) => "degraded",
            CompletionOutcome::AllFailed(_) => "all_failed",
        }
    }
}

/// Run both tiers against `backend`. Never fails: exhaustion becomes
/// [`CompletionOutcome::AllFailed`].
pub async fn complete<B>(
    backend: &B,
    prompt: &str,
    models: &ModelTiers,
    policy: &RetryPolicy,
    verbose: bool,
) -> CompletionOutcome
where
    B: CompletionBackend + ?Sized,
{
    if verbose {
        log::info!("completion prompt: {}", prompt);
    }

    let primary = run_tier(policy, &models.primary, |_| {
        backend.complete(&models.primary, prompt)
    })
    .await;
    if let TierState::Succeeded { value, attempts } = primary {
        log::info!(
            "completion: {} answered after {} attempt(s)",
            models.primary,
            attempts
        );
        return CompletionOutcome::Primary(value);
    }

    log::warn!(
        "completion: {} failed {} time(s), switching to {}",
        models.primary,
        policy.max_attempts(),
        models.secondary
    );
    let secondary = run_tier(policy, &models.secondary, |_| {
        backend.complete(&models.secondary, prompt)
    })
    .await;
    match secondary {
        TierState::Succeeded { value, attempts } => {
            log::info!(
                "completion: {} answered after {} attempt(s)",
                models.secondary,
                attempts
            );
            CompletionOutcome::DegradedSecondary(format!("{}{}", DEGRADATION_NOTICE, value))
        }
        _ => {
            log::warn!(
                "completion: all attempts for {} and {} failed",
                models.primary,
                models.secondary
            );
            CompletionOutcome::AllFailed(ALL_FAILED_NOTICE.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted backend: per-model queue of replies; an empty queue means failure.
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<HashMap<String, VecDeque<Option<String>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn script(self, model: &str, replies: &[Option<&str>]) -> Self {
            self.replies.lock().unwrap().insert(
                model.to_string(),
                replies.iter().map(|r| r.map(str::to_string)).collect(),
            );
            self
        }

        fn calls_to(&self, model: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|m| *m == model).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, model: &str, _prompt: &str) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(model.to_string());
            let next = self
                .replies
                .lock()
                .unwrap()
                .get_mut(model)
                .and_then(|q| q.pop_front())
                .flatten();
            next.ok_or_else(|| LlmError::Api("503 overloaded".to_string()))
        }
    }

    fn models() -> ModelTiers {
        ModelTiers::new("gpt-4-0314", "gpt-3.5-turbo-0301")
    }

    fn policy(n: u32) -> RetryPolicy {
        RetryPolicy::new(n, Duration::ZERO)
    }

    #[tokio::test]
    async fn primary_success_on_attempt_k_makes_k_calls() {
        let backend =
            ScriptedBackend::default().script("gpt-4-0314", &[None, None, Some("answer")]);
        let out = complete(&backend, "q", &models(), &policy(3), false).await;
        assert_eq!(out, CompletionOutcome::Primary("answer".to_string()));
        assert_eq!(backend.calls_to("gpt-4-0314"), 3);
        assert_eq!(backend.calls_to("gpt-3.5-turbo-0301"), 0);
    }

    #[tokio::test]
    async fn primary_first_try_success() {
        let backend = ScriptedBackend::default().script("gpt-4-0314", &[Some("fast")]);
        let out = complete(&backend, "q", &models(), &policy(3), true).await;
        assert_eq!(out.text(), "fast");
        assert_eq!(out.kind(), "primary");
        assert_eq!(backend.total_calls(), 1);
    }

    #[tokio::test]
    async fn secondary_success_is_prefixed_once() {
        let backend =
            ScriptedBackend::default().script("gpt-3.5-turbo-0301", &[None, Some("hi")]);
        let out = complete(&backend, "q", &models(), &policy(3), false).await;
        assert_eq!(
            out,
            CompletionOutcome::DegradedSecondary("(对话降级至GPT-3.5)\nhi".to_string())
        );
        assert_eq!(out.text().matches(DEGRADATION_NOTICE).count(), 1);
        assert_eq!(backend.calls_to("gpt-4-0314"), 3);
        assert_eq!(backend.calls_to("gpt-3.5-turbo-0301"), 2);
    }

    #[tokio::test]
    async fn both_tiers_exhausted_yields_fixed_notice() {
        let backend = ScriptedBackend::default();
        let out = complete(&backend, "q", &models(), &policy(4), false).await;
        assert_eq!(out, CompletionOutcome::AllFailed(ALL_FAILED_NOTICE.to_string()));
        assert_eq!(backend.total_calls(), 8);
        assert_eq!(backend.calls_to("gpt-4-0314"), 4);
    }

    #[tokio::test]
    async fn tiers_are_tried_in_order() {
        let backend = ScriptedBackend::default();
        let _ = complete(&backend, "q", &models(), &policy(2), false).await;
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["gpt-4-0314", "gpt-4-0314", "gpt-3.5-turbo-0301", "gpt-3.5-turbo-0301"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn worst_case_wait_excludes_delay_after_each_tier() {
        let backend = ScriptedBackend::default();
        let p = RetryPolicy::new(3, Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        let out = complete(&backend, "q", &models(), &p, false).await;
        assert_eq!(out.kind(), "all_failed");
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }
}
