//! Subscription lifecycle: subscribe on entering a scope, tear down on
//! leaving it or when the scope key changes. The key is explicit so the
//! lifecycle is testable without any view layer.

use std::future::Future;

use crate::backend::Subscription;
use crate::error::AppResult;

pub struct ScopedSubscription<K: PartialEq> {
    current: Option<(K, Subscription)>,
}

impl<K: PartialEq> Default for ScopedSubscription<K> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<K: PartialEq> ScopedSubscription<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> Option<&K> {
        self.current.as_ref().map(|(key, _)| key)
    }

    /// Enter a scope. Re-entering the current scope keeps the live
    /// subscription (no duplicate callbacks); a different key tears the
    /// old subscription down before the new subscribe runs.
    pub async fn enter<F, Fut>(&mut self, key: K, subscribe: F) -> AppResult<&mut Subscription>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Subscription>>,
    {
        let same_scope = matches!(&self.current, Some((current, _)) if *current == key);
        if !same_scope {
            // Drop (and thereby unsubscribe) before opening the next
            // one so no stale-scoped event can interleave.
            self.current = None;
            let subscription = subscribe().await?;
            self.current = Some((key, subscription));
        }
        Ok(&mut self.current.as_mut().unwrap().1)
    }

    pub fn exit(&mut self) {
        self.current = None;
    }

    pub fn subscription_mut(&mut self) -> Option<&mut Subscription> {
        self.current.as_mut().map(|(_, sub)| sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::{tables, Backend, Cond};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn subscribe_to(
        backend: &MemoryBackend,
        conversation: &str,
    ) -> AppResult<Subscription> {
        backend
            .subscribe(
                tables::MESSAGES,
                vec![Cond::eq("conversation_id", conversation)],
            )
            .await
    }

    #[tokio::test]
    async fn scope_change_tears_down_the_previous_subscription() {
        let backend = MemoryBackend::new();
        let mut scoped = ScopedSubscription::new();

        scoped
            .enter("c1".to_string(), || subscribe_to(&backend, "c1"))
            .await
            .unwrap();
        scoped
            .enter("c2".to_string(), || subscribe_to(&backend, "c2"))
            .await
            .unwrap();

        backend
            .insert(
                tables::MESSAGES,
                vec![
                    json!({"conversation_id": "c1", "content": "stale scope"}),
                    json!({"conversation_id": "c2", "content": "current scope"}),
                ],
            )
            .await
            .unwrap();

        let sub = scoped.subscription_mut().unwrap();
        let event = sub.next_event().await.unwrap();
        assert_eq!(event.row["content"], "current scope");
        assert!(sub.try_next_event().is_none());
    }

    #[tokio::test]
    async fn re_entering_the_same_scope_does_not_resubscribe() {
        let backend = MemoryBackend::new();
        let mut scoped = ScopedSubscription::new();
        let subscribes = AtomicUsize::new(0);

        for _ in 0..3 {
            scoped
                .enter("c1".to_string(), || {
                    subscribes.fetch_add(1, Ordering::SeqCst);
                    subscribe_to(&backend, "c1")
                })
                .await
                .unwrap();
        }
        assert_eq!(subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(scoped.scope(), Some(&"c1".to_string()));

        backend
            .insert(
                tables::MESSAGES,
                vec![json!({"conversation_id": "c1", "content": "once"})],
            )
            .await
            .unwrap();
        let event = scoped
            .subscription_mut()
            .unwrap()
            .next_event()
            .await
            .unwrap();
        assert_eq!(event.row["content"], "once");
        assert!(scoped.subscription_mut().unwrap().try_next_event().is_none());
    }

    #[tokio::test]
    async fn exit_unsubscribes() {
        let backend = MemoryBackend::new();
        let mut scoped = ScopedSubscription::new();
        scoped
            .enter("c1".to_string(), || subscribe_to(&backend, "c1"))
            .await
            .unwrap();
        scoped.exit();
        assert!(scoped.scope().is_none());
        assert!(scoped.subscription_mut().is_none());
    }
}
