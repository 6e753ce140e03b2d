//! Per-client, per-event rate limiting with a fixed-window counter.

mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::transport::SocketRef;

pub use memory::InMemoryThrottleStore;

/// At most `limit` events per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleSpec {
    pub limit: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl ThrottleSpec {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Counter state for one (client, event) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleEntry {
    pub count: u32,
    pub reset_at: Instant,
}

impl ThrottleEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed { remaining: u32 },
    Limited { retry_in: Duration },
}

/// Storage for throttle counters.
///
/// `hit` is built from `get` + `set` and is therefore only as atomic as the caller's
/// scheduling; shared or external stores should override it with a native
/// increment-or-reject.
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    async fn get(&self, client: &str, event: &str) -> Option<ThrottleEntry>;

    async fn set(&self, client: &str, event: &str, entry: ThrottleEntry);

    /// Drop every expired entry.
    async fn cleanup(&self);

    /// Count one event and decide whether it may proceed.
    async fn hit(&self, client: &str, event: &str, spec: ThrottleSpec) -> ThrottleDecision {
        let now = Instant::now();
        let current = match self.get(client, event).await {
            Some(entry) if !entry.is_expired(now) => entry,
            _ => ThrottleEntry {
                count: 0,
                reset_at: now + spec.window,
            },
        };
        let (decision, next) = decide(current, spec, now);
        if let Some(next) = next {
            self.set(client, event, next).await;
        }
        decision
    }
}

/// Apply one hit to a live (non-expired) entry.
pub(crate) fn decide(
    current: ThrottleEntry,
    spec: ThrottleSpec,
    now: Instant,
) -> (ThrottleDecision, Option<ThrottleEntry>) {
    if current.count >= spec.limit {
        let retry_in = current.reset_at.saturating_duration_since(now);
        return (ThrottleDecision::Limited { retry_in }, None);
    }
    let next = ThrottleEntry {
        count: current.count + 1,
        ..current
    };
    (
        ThrottleDecision::Allowed {
            remaining: spec.limit - next.count,
        },
        Some(next),
    )
}

/// Maps a connection to the identifier throttle counters are keyed by.
pub type ClientIdentifier = Arc<dyn Fn(&SocketRef) -> String + Send + Sync>;

/// Throttling settings for the runtime.
#[derive(Clone)]
pub struct ThrottleOptions {
    /// Applies to every socket-scoped method without its own class or method limit.
    pub rate_limit: Option<ThrottleSpec>,
    pub cleanup_interval: Duration,
    pub store: Arc<dyn ThrottleStore>,
    /// Defaults to the connection id.
    pub client_identifier: Option<ClientIdentifier>,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            rate_limit: None,
            cleanup_interval: Duration::from_secs(60),
            store: Arc::new(InMemoryThrottleStore::new()),
            client_identifier: None,
        }
    }
}

impl fmt::Debug for ThrottleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleOptions")
            .field("rate_limit", &self.rate_limit)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("custom_identifier", &self.client_identifier.is_some())
            .finish()
    }
}

impl ThrottleOptions {
    pub(crate) fn identify(&self, socket: &SocketRef) -> String {
        match &self.client_identifier {
            Some(identify) => identify(socket),
            None => socket.id().to_string(),
        }
    }
}
