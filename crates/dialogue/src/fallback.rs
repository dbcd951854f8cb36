use std::sync::Arc;
use std::time::Duration;

use patter_core::domain::turn::TurnRecord;

use crate::collaborators::Answering;

/// Reply for a menu-style dead end once the answering budget is spent.
pub const MENU_REPLY: &str = "I can help with product search, your cart, and orders. \
     You can also ask for a human at any time.";

/// Reply when the answering capability errors or times out.
pub const APOLOGY_REPLY: &str =
    "Sorry, I couldn't come up with an answer for that just now.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackOutcome {
    pub reply: String,
    /// Whether an answering invocation was spent on this turn.
    pub consumed_budget: bool,
    /// The budget is gone; the caller registers a human-request signal so
    /// the user is not stuck.
    pub budget_exhausted: bool,
}

/// Routes unclassified turns to the general-answering capability, bounded
/// by a hard per-session budget and a call timeout.
pub struct FallbackRouter {
    answering: Arc<dyn Answering>,
    budget_max: u32,
    timeout: Duration,
}

impl FallbackRouter {
    pub fn new(answering: Arc<dyn Answering>, budget_max: u32, timeout: Duration) -> Self {
        Self { answering, budget_max, timeout }
    }

    pub async fn handle(
        &self,
        budget_used: u32,
        raw_text: &str,
        recent_turns: &[TurnRecord],
    ) -> FallbackOutcome {
        if budget_used >= self.budget_max {
            tracing::info!(
                event_name = "fallback.budget_exhausted",
                budget_used,
                budget_max = self.budget_max,
                "skipping answering capability"
            );
            return FallbackOutcome {
                reply: MENU_REPLY.to_string(),
                consumed_budget: false,
                budget_exhausted: true,
            };
        }

        let reply = match tokio::time::timeout(
            self.timeout,
            self.answering.answer(raw_text, recent_turns),
        )
        .await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(error)) => {
                tracing::warn!(
                    event_name = "fallback.answering_failed",
                    error = %error,
                    "answering capability returned an error"
                );
                APOLOGY_REPLY.to_string()
            }
            Err(_) => {
                tracing::warn!(
                    event_name = "fallback.answering_timeout",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "answering capability timed out"
                );
                APOLOGY_REPLY.to_string()
            }
        };

        FallbackOutcome { reply, consumed_budget: true, budget_exhausted: false }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use patter_core::domain::turn::TurnRecord;

    use crate::collaborators::{Answering, CollaboratorError};

    use super::{FallbackRouter, APOLOGY_REPLY, MENU_REPLY};

    struct CountingAnswering {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Answering for CountingAnswering {
        async fn answer(
            &self,
            query: &str,
            _recent_turns: &[TurnRecord],
        ) -> Result<String, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CollaboratorError::Transport("boom".to_string()))
            } else {
                Ok(format!("about: {query}"))
            }
        }
    }

    #[tokio::test]
    async fn within_budget_returns_capability_answer() {
        let answering = Arc::new(CountingAnswering { calls: AtomicU32::new(0), fail: false });
        let router = FallbackRouter::new(answering.clone(), 5, Duration::from_secs(1));

        let outcome = router.handle(0, "do you ship to Norway?", &[]).await;

        assert_eq!(outcome.reply, "about: do you ship to Norway?");
        assert!(outcome.consumed_budget);
        assert!(!outcome.budget_exhausted);
        assert_eq!(answering.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_never_invokes_capability() {
        let answering = Arc::new(CountingAnswering { calls: AtomicU32::new(0), fail: false });
        let router = FallbackRouter::new(answering.clone(), 5, Duration::from_secs(1));

        let outcome = router.handle(5, "anything", &[]).await;

        assert_eq!(outcome.reply, MENU_REPLY);
        assert!(!outcome.consumed_budget);
        assert!(outcome.budget_exhausted);
        assert_eq!(answering.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn capability_error_becomes_static_apology() {
        let answering = Arc::new(CountingAnswering { calls: AtomicU32::new(0), fail: true });
        let router = FallbackRouter::new(answering, 5, Duration::from_secs(1));

        let outcome = router.handle(2, "anything", &[]).await;

        assert_eq!(outcome.reply, APOLOGY_REPLY);
        assert!(outcome.consumed_budget);
    }

    #[tokio::test]
    async fn slow_capability_times_out_to_apology() {
        struct SlowAnswering;

        #[async_trait]
        impl Answering for SlowAnswering {
            async fn answer(
                &self,
                _query: &str,
                _recent_turns: &[TurnRecord],
            ) -> Result<String, CollaboratorError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("too late".to_string())
            }
        }

        let router = FallbackRouter::new(Arc::new(SlowAnswering), 5, Duration::from_millis(20));
        let outcome = router.handle(0, "anything", &[]).await;

        assert_eq!(outcome.reply, APOLOGY_REPLY);
    }
}
