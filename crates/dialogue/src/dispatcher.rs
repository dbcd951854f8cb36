use std::sync::Arc;
use std::time::Duration;

use patter_core::config::DispatchConfig;
use patter_core::domain::action::{
    ActionOutcome, ActionRequest, ActionTemplate, CollaboratorBinding,
};

use crate::collaborators::{CollaboratorError, ResourceApi, ResourceReply};

#[derive(Clone, Debug)]
pub struct DispatchPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

impl From<&DispatchConfig> for DispatchPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

/// Executes resolved actions against their bound collaborator with a
/// bounded-retry policy. Only transient failures (timeout, 5xx, transport)
/// retry; 4xx replies are terminal. A mutating action against a
/// collaborator that cannot deduplicate fails closed on the first
/// transient failure rather than risking a duplicate side effect.
pub struct ActionDispatcher {
    commerce: Arc<dyn ResourceApi>,
    ticketing: Arc<dyn ResourceApi>,
    policy: DispatchPolicy,
}

impl ActionDispatcher {
    pub fn new(
        commerce: Arc<dyn ResourceApi>,
        ticketing: Arc<dyn ResourceApi>,
        policy: DispatchPolicy,
    ) -> Self {
        Self { commerce, ticketing, policy }
    }

    pub async fn dispatch(
        &self,
        template: &ActionTemplate,
        request: &ActionRequest,
    ) -> ActionOutcome {
        let collaborator = self.binding_for(template.binding);
        let retry_unsafe = template.mutating && !collaborator.deduplicates();

        let mut attempt = 0u32;
        loop {
            let outcome = self.attempt(collaborator.as_ref(), request).await;

            let reason = match outcome {
                ActionOutcome::RecoverableFailure { ref reason } => reason.clone(),
                terminal => {
                    if attempt > 0 {
                        tracing::info!(
                            event_name = "dispatch.retry_resolved",
                            action = %request.action_name,
                            attempt,
                            "dispatch recovered after retry"
                        );
                    }
                    return terminal;
                }
            };

            if retry_unsafe {
                tracing::warn!(
                    event_name = "dispatch.fail_closed",
                    action = %request.action_name,
                    reason = %reason,
                    "mutating action against non-deduplicating collaborator; failing closed"
                );
                return ActionOutcome::UnrecoverableFailure { reason };
            }

            if attempt >= self.policy.max_retries {
                tracing::warn!(
                    event_name = "dispatch.retries_exhausted",
                    action = %request.action_name,
                    attempts = attempt + 1,
                    reason = %reason,
                    "dispatch failed after retry budget"
                );
                return ActionOutcome::UnrecoverableFailure { reason };
            }

            let delay = self.policy.retry_base_delay * 2u32.saturating_pow(attempt);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One call, classified. Timeout and server-side errors are transient;
    /// client errors are terminal.
    async fn attempt(
        &self,
        collaborator: &dyn ResourceApi,
        request: &ActionRequest,
    ) -> ActionOutcome {
        let call = collaborator.call(
            &request.action_name,
            &request.parameters,
            &request.idempotency_key,
        );

        match tokio::time::timeout(self.policy.timeout, call).await {
            Err(_) => ActionOutcome::RecoverableFailure { reason: "timeout".to_string() },
            Ok(Err(CollaboratorError::Timeout)) => {
                ActionOutcome::RecoverableFailure { reason: "timeout".to_string() }
            }
            Ok(Err(CollaboratorError::Transport(message))) => {
                ActionOutcome::RecoverableFailure { reason: message }
            }
            Ok(Ok(ResourceReply::Ok { payload })) => ActionOutcome::Success { payload },
            Ok(Ok(ResourceReply::Empty)) => ActionOutcome::EmptyResult,
            Ok(Ok(ResourceReply::ClientError { code, message })) => {
                ActionOutcome::UnrecoverableFailure { reason: format!("{code}: {message}") }
            }
            Ok(Ok(ResourceReply::ServerError { code, message })) => {
                ActionOutcome::RecoverableFailure { reason: format!("{code}: {message}") }
            }
        }
    }

    fn binding_for(&self, binding: CollaboratorBinding) -> &Arc<dyn ResourceApi> {
        match binding {
            CollaboratorBinding::Commerce => &self.commerce,
            CollaboratorBinding::Ticketing => &self.ticketing,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use patter_core::domain::action::{
        ActionOutcome, ActionRequest, ActionTemplate, CollaboratorBinding, IdempotencyKey,
        ParamMap,
    };
    use patter_core::domain::session::SessionId;

    use crate::collaborators::{CollaboratorError, ResourceApi, ResourceReply};

    use super::{ActionDispatcher, DispatchPolicy};

    struct ScriptedApi {
        replies: Mutex<Vec<Result<ResourceReply, CollaboratorError>>>,
        calls: AtomicU32,
        seen_keys: Mutex<Vec<String>>,
        deduplicates: bool,
    }

    impl ScriptedApi {
        fn new(replies: Vec<Result<ResourceReply, CollaboratorError>>, deduplicates: bool) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
                seen_keys: Mutex::new(Vec::new()),
                deduplicates,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceApi for ScriptedApi {
        fn deduplicates(&self) -> bool {
            self.deduplicates
        }

        async fn call(
            &self,
            _action_name: &str,
            _parameters: &ParamMap,
            idempotency_key: &IdempotencyKey,
        ) -> Result<ResourceReply, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_keys.lock().expect("lock").push(idempotency_key.0.clone());
            let mut replies = self.replies.lock().expect("lock");
            if replies.is_empty() {
                Ok(ResourceReply::Empty)
            } else {
                replies.remove(0)
            }
        }
    }

    fn template(mutating: bool) -> ActionTemplate {
        ActionTemplate {
            name: "add_to_cart".to_string(),
            binding: CollaboratorBinding::Commerce,
            mutating,
            params: Vec::new(),
        }
    }

    fn request() -> ActionRequest {
        ActionRequest {
            action_name: "add_to_cart".to_string(),
            parameters: BTreeMap::new(),
            idempotency_key: IdempotencyKey::derive(
                &SessionId("s-1".to_string()),
                3,
                "add_to_cart",
            ),
        }
    }

    fn policy() -> DispatchPolicy {
        DispatchPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    fn dispatcher(api: Arc<ScriptedApi>) -> ActionDispatcher {
        ActionDispatcher::new(api.clone(), api, policy())
    }

    #[tokio::test]
    async fn transient_failure_retries_and_succeeds_with_same_key() {
        let api = Arc::new(ScriptedApi::new(
            vec![
                Ok(ResourceReply::ServerError { code: 503, message: "busy".to_string() }),
                Ok(ResourceReply::Ok { payload: serde_json::json!({"cart_size": 1}) }),
            ],
            true,
        ));

        let outcome = dispatcher(api.clone()).dispatch(&template(true), &request()).await;

        assert!(matches!(outcome, ActionOutcome::Success { .. }));
        assert_eq!(api.calls(), 2);

        let keys = api.seen_keys.lock().expect("lock").clone();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1], "retries carry the same idempotency key");
    }

    #[tokio::test]
    async fn client_error_is_terminal_without_retry() {
        let api = Arc::new(ScriptedApi::new(
            vec![Ok(ResourceReply::ClientError { code: 409, message: "already shipped".to_string() })],
            true,
        ));

        let outcome = dispatcher(api.clone()).dispatch(&template(true), &request()).await;

        match outcome {
            ActionOutcome::UnrecoverableFailure { reason } => {
                assert!(reason.contains("409"));
            }
            other => panic!("expected unrecoverable failure, got {other:?}"),
        }
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn retries_exhaust_into_unrecoverable_failure() {
        let api = Arc::new(ScriptedApi::new(
            vec![
                Err(CollaboratorError::Transport("reset".to_string())),
                Err(CollaboratorError::Transport("reset".to_string())),
                Err(CollaboratorError::Transport("reset".to_string())),
            ],
            true,
        ));

        let outcome = dispatcher(api.clone()).dispatch(&template(false), &request()).await;

        assert!(matches!(outcome, ActionOutcome::UnrecoverableFailure { .. }));
        // initial call plus two retries
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test]
    async fn mutating_action_fails_closed_without_dedup_support() {
        let api = Arc::new(ScriptedApi::new(
            vec![
                Err(CollaboratorError::Timeout),
                Ok(ResourceReply::Ok { payload: serde_json::Value::Null }),
            ],
            false,
        ));

        let outcome = dispatcher(api.clone()).dispatch(&template(true), &request()).await;

        assert!(matches!(outcome, ActionOutcome::UnrecoverableFailure { .. }));
        assert_eq!(api.calls(), 1, "no retry may be attempted");
    }

    #[tokio::test]
    async fn read_only_action_still_retries_without_dedup_support() {
        let api = Arc::new(ScriptedApi::new(
            vec![
                Err(CollaboratorError::Timeout),
                Ok(ResourceReply::Ok { payload: serde_json::Value::Null }),
            ],
            false,
        ));

        let outcome = dispatcher(api.clone()).dispatch(&template(false), &request()).await;

        assert!(matches!(outcome, ActionOutcome::Success { .. }));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn slow_collaborator_is_cut_off_by_timeout() {
        struct SlowApi;

        #[async_trait]
        impl ResourceApi for SlowApi {
            fn deduplicates(&self) -> bool {
                true
            }

            async fn call(
                &self,
                _action_name: &str,
                _parameters: &ParamMap,
                _idempotency_key: &IdempotencyKey,
            ) -> Result<ResourceReply, CollaboratorError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ResourceReply::Empty)
            }
        }

        let slow: Arc<SlowApi> = Arc::new(SlowApi);
        let dispatcher = ActionDispatcher::new(
            slow.clone(),
            slow,
            DispatchPolicy {
                timeout: Duration::from_millis(20),
                max_retries: 0,
                retry_base_delay: Duration::from_millis(1),
            },
        );

        let outcome = dispatcher.dispatch(&template(false), &request()).await;
        match outcome {
            ActionOutcome::UnrecoverableFailure { reason } => assert_eq!(reason, "timeout"),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }
}
