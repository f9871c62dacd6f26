//! Per-tier retry state machine.
//!
//! A tier runs `Attempting(1) → Attempting(2) → … → Succeeded | Exhausted`. The transition
//! function is pure so the attempt-count invariants can be tested without any I/O; [`run_tier`]
//! drives it against an async attempt closure and sleeps between attempts (never after the last).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Attempt budget and wait between attempts. Shared by completion and delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` below 1 is raised to 1.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_MAX_ATTEMPTS,
            Duration::from_secs(crate::config::DEFAULT_RETRY_DELAY_SECS),
        )
    }
}

/// State of one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierState<T> {
    /// About to make attempt `n` (1-based).
    Attempting(u32),
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl<T> TierState<T> {
    /// Transition after attempt `attempt` produced `result`.
    pub fn after_attempt<E>(attempt: u32, result: Result<T, E>, policy: &RetryPolicy) -> Self {
        match result {
            Ok(value) => TierState::Succeeded {
                value,
                attempts: attempt,
            },
            Err(_) if attempt >= policy.max_attempts() => {
                TierState::Exhausted { attempts: attempt }
            }
            Err(_) => TierState::Attempting(attempt + 1),
        }
    }

    /// Number of attempts made once terminal.
    pub fn attempts(&self) -> u32 {
        match self {
            TierState::Attempting(n) => n.saturating_sub(1),
            TierState::Succeeded { attempts, .. } | TierState::Exhausted { attempts } => *attempts,
        }
    }
}

/// Run one tier to a terminal state. `attempt` receives the 1-based attempt number.
/// Failures are logged with `label` and retried identically regardless of cause.
pub async fn run_tier<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt: F,
) -> TierState<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut state = TierState::Attempting(1);
    while let TierState::Attempting(n) = state {
        let result = attempt(n).await;
        if let Err(ref e) = result {
            log::warn!(
                "{}: attempt {}/{} failed: {}",
                label,
                n,
                policy.max_attempts(),
                e
            );
        }
        state = TierState::after_attempt(n, result, policy);
        if matches!(state, TierState::Attempting(_)) && !policy.delay().is_zero() {
            tokio::time::sleep(policy.delay()).await;
        }
    }
    state
}
