use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{decide, ThrottleDecision, ThrottleEntry, ThrottleSpec, ThrottleStore};

/// In-process throttle store. `hit` updates a single map entry under its shard lock.
#[derive(Debug, Default)]
pub struct InMemoryThrottleStore {
    entries: DashMap<(String, String), ThrottleEntry>,
}

impl InMemoryThrottleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(client: &str, event: &str) -> (String, String) {
        (client.to_string(), event.to_string())
    }
}

#[async_trait]
impl ThrottleStore for InMemoryThrottleStore {
    async fn get(&self, client: &str, event: &str) -> Option<ThrottleEntry> {
        self.entries
            .get(&Self::key(client, event))
            .map(|e| *e.value())
    }

    async fn set(&self, client: &str, event: &str, entry: ThrottleEntry) {
        self.entries.insert(Self::key(client, event), entry);
    }

    async fn cleanup(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Expired throttle entries purged");
        }
    }

    async fn hit(&self, client: &str, event: &str, spec: ThrottleSpec) -> ThrottleDecision {
        let now = Instant::now();
        let mut slot = self
            .entries
            .entry(Self::key(client, event))
            .or_insert(ThrottleEntry {
                count: 0,
                reset_at: now + spec.window,
            });
        if slot.is_expired(now) {
            *slot = ThrottleEntry {
                count: 0,
                reset_at: now + spec.window,
            };
        }
        let (decision, next) = decide(*slot, spec, now);
        if let Some(next) = next {
            *slot = next;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn concurrent_hits_never_exceed_the_limit() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let spec = ThrottleSpec::new(5, Duration::from_secs(60));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.hit("c", "e", spec).await }));
        }

        let mut allowed = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), ThrottleDecision::Allowed { .. }) {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_purges_expired_entries_only() {
        let store = InMemoryThrottleStore::new();
        store
            .hit("old", "e", ThrottleSpec::new(3, Duration::from_secs(1)))
            .await;
        store
            .hit("fresh", "e", ThrottleSpec::new(3, Duration::from_secs(30)))
            .await;
        assert_eq!(store.len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        store.cleanup().await;

        assert_eq!(store.len(), 1);
        assert!(store.get("fresh", "e").await.is_some());
        assert!(store.get("old", "e").await.is_none());
    }
}
