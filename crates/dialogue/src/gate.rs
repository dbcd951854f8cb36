use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Serializes turn processing per session key while leaving distinct
/// sessions fully concurrent. Guards are handed out in arrival order, so
/// turn N+1 always observes turn N's completed mutation.
#[derive(Clone, Default)]
pub struct SessionGate {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.entry(key.to_string()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
        };

        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::SessionGate;

    #[tokio::test]
    async fn same_key_serializes_in_arrival_order() {
        let gate = SessionGate::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let gate = gate.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = gate.acquire("s-1").await;
                tokio::time::sleep(Duration::from_millis(30)).await;
                order.lock().await.push(1);
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = {
            let gate = gate.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = gate.acquire("s-1").await;
                order.lock().await.push(2);
            })
        };

        first.await.expect("first task");
        second.await.expect("second task");

        assert_eq!(order.lock().await.clone(), vec![1, 2]);
    }

    #[tokio::test]
    async fn different_keys_run_concurrently() {
        let gate = SessionGate::new();

        let _held = gate.acquire("s-1").await;

        // An unrelated session must not wait on s-1's guard.
        let other = tokio::time::timeout(Duration::from_millis(100), gate.acquire("s-2")).await;
        assert!(other.is_ok());
    }
}
