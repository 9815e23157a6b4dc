//! ==============================================================================
//! cache.rs - per-sensor polling cache
//! ==============================================================================
//!
//! purpose:
//!     owns the fetch state of exactly one sensor and drives fetch + retry +
//!     normalization whenever `refresh()` is called.
//!
//! state machine:
//!
//! ```text
//!     Idle ──refresh──> Loading ──ok──────────────> Ready { value, fetched_at }
//!                          │  └──err, attempts < max──┐
//!                          │         (retry) <────────┘
//!                          └──err, attempts == max──> Failed { error, attempts }
//!
//!     Ready / Failed ──refresh──> Loading
//! ```
//!
//! concurrency:
//!     - at most one fetch (retries included) is in flight per cache.
//!       `refresh()` while Loading is a no-op.
//!     - state lives in a tokio watch channel. `current_value()` only borrows
//!       it and never waits.
//!     - the spawned fetch task holds a Weak handle. once the cache is
//!       dropped it stops retrying and publishes nothing.
//!
//! relationships:
//!     - used by: feed.rs (one cache per sensor / log metric)
//!     - implemented by: feed.rs ReadingSource, SeriesSource
//!
//! ==============================================================================

use crate::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// upper bound for a single retry delay
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FetchState<T> {
    Idle,
    Loading,
    Ready {
        value: T,
        fetched_at: DateTime<Utc>,
    },
    Failed {
        error: FetchError,
        attempts: u32,
    },
}

impl<T> FetchState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, FetchState::Loading)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            FetchState::Ready { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// How many times one refresh may try before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// delay before retry n is `backoff * n`, capped at five seconds
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt).min(MAX_BACKOFF)
    }
}

/// One fetch attempt: transport call plus normalization.
#[async_trait]
pub trait Source<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, FetchError>;
}

#[derive(Debug)]
struct Slot<T> {
    state: FetchState<T>,
    last_value: Option<T>,
}

pub struct PollingCache<T> {
    label: String,
    source: Arc<dyn Source<T>>,
    policy: RetryPolicy,
    slot: Arc<watch::Sender<Slot<T>>>,
}

impl<T> PollingCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>, source: Arc<dyn Source<T>>, policy: RetryPolicy) -> Self {
        let (tx, _) = watch::channel(Slot {
            state: FetchState::Idle,
            last_value: None,
        });
        Self {
            label: label.into(),
            source,
            policy,
            slot: Arc::new(tx),
        }
    }

    /// Start a fetch unless one is already in flight.
    ///
    /// Returns immediately; the handle resolves once the fetch (with its
    /// retries) has settled. `None` means a fetch was already running.
    /// Must be called from within a tokio runtime.
    pub fn refresh(&self) -> Option<JoinHandle<()>> {
        let started = self.slot.send_if_modified(|slot| {
            if slot.state.is_loading() {
                false
            } else {
                slot.state = FetchState::Loading;
                true
            }
        });
        if !started {
            debug!(cache = %self.label, "refresh skipped, fetch already in flight");
            return None;
        }

        let task = FetchTask {
            label: self.label.clone(),
            source: Arc::clone(&self.source),
            policy: self.policy,
            slot: Arc::downgrade(&self.slot),
        };
        Some(tokio::spawn(task.run()))
    }

    /// Snapshot of the current state.
    pub fn current_value(&self) -> FetchState<T> {
        self.slot.borrow().state.clone()
    }

    /// last successfully published value; survives Loading and Failed
    pub fn last_value(&self) -> Option<T> {
        self.slot.borrow().last_value.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.slot.borrow().state.is_loading()
    }

    /// Wait until no fetch is in flight and return the state at that point.
    pub async fn settled(&self) -> FetchState<T> {
        let mut rx = self.slot.subscribe();
        let settled = match rx.wait_for(|slot| !slot.state.is_loading()).await {
            Ok(slot) => Some(slot.state.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.current_value())
    }
}

struct FetchTask<T> {
    label: String,
    source: Arc<dyn Source<T>>,
    policy: RetryPolicy,
    slot: Weak<watch::Sender<Slot<T>>>,
}

impl<T> FetchTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run(self) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = self.source.fetch().await;

            let Some(slot) = self.slot.upgrade() else {
                debug!(cache = %self.label, "cache dropped, discarding fetch result");
                return;
            };

            match outcome {
                Ok(value) => {
                    info!(cache = %self.label, attempts, "published");
                    slot.send_modify(|s| {
                        s.last_value = Some(value.clone());
                        s.state = FetchState::Ready {
                            value,
                            fetched_at: Utc::now(),
                        };
                    });
                    return;
                }
                Err(e) if attempts < self.policy.max_attempts => {
                    warn!(
                        cache = %self.label,
                        attempt = attempts,
                        max = self.policy.max_attempts,
                        "fetch failed, retrying: {}",
                        e
                    );
                }
                Err(e) => {
                    error!(cache = %self.label, attempts, "fetch failed: {}", e);
                    slot.send_modify(|s| {
                        s.state = FetchState::Failed { error: e, attempts };
                    });
                    return;
                }
            }

            drop(slot);
            let delay = self.policy.delay(attempts);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NormalizationError, TransportError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// replays scripted outcomes, repeating the last one; optionally waits
    /// for a permit before answering
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<u32, FetchError>>>,
        calls: AtomicU32,
        gate: Option<Arc<Semaphore>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<u32, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
                gate: None,
            })
        }

        fn gated(outcomes: Vec<Result<u32, FetchError>>, gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Source<u32> for Scripted {
        async fn fetch(&self) -> Result<u32, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let mut q = self.outcomes.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().unwrap()
            }
        }
    }

    fn down() -> FetchError {
        TransportError::Status {
            status: 503,
            message: "down".to_string(),
        }
        .into()
    }

    fn cache(source: Arc<Scripted>) -> PollingCache<u32> {
        PollingCache::new("test", source, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_starts_idle_and_becomes_ready() {
        let source = Scripted::new(vec![Ok(42)]);
        let cache = cache(source.clone());
        assert_eq!(cache.current_value(), FetchState::Idle);

        cache.refresh().unwrap().await.unwrap();

        match cache.current_value() {
            FetchState::Ready { value, .. } => assert_eq!(value, 42),
            other => panic!("expected ready, got {:?}", other),
        }
        assert_eq!(cache.last_value(), Some(42));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_three_failures_end_in_failed() {
        let source = Scripted::new(vec![Err(down())]);
        let cache = cache(source.clone());

        cache.refresh().unwrap().await.unwrap();

        assert_eq!(
            cache.current_value(),
            FetchState::Failed {
                error: down(),
                attempts: 3
            }
        );
        assert_eq!(source.calls(), 3);

        // no further automatic retries
        tokio::task::yield_now().await;
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let source = Scripted::new(vec![Err(down()), Err(down()), Ok(7)]);
        let cache = cache(source.clone());

        cache.refresh().unwrap().await.unwrap();

        assert_eq!(cache.current_value().value(), Some(&7));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_value() {
        let invalid: FetchError = NormalizationError::InvalidValue("not-a-number".into()).into();
        let source = Scripted::new(vec![Ok(1), Err(invalid.clone())]);
        let cache = cache(source.clone());

        cache.refresh().unwrap().await.unwrap();
        cache.refresh().unwrap().await.unwrap();

        assert_eq!(
            cache.current_value(),
            FetchState::Failed {
                error: invalid,
                attempts: 3
            }
        );
        assert_eq!(cache.last_value(), Some(1));

        // manual refresh after terminal failure starts over
        assert!(cache.refresh().is_some());
    }

    #[tokio::test]
    async fn test_refresh_while_loading_is_noop() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Scripted::gated(vec![Ok(5)], gate.clone());
        let cache = cache(source.clone());

        let handle = cache.refresh().expect("first refresh starts");
        assert!(cache.is_loading());
        assert!(cache.refresh().is_none());
        assert!(cache.refresh().is_none());

        gate.add_permits(1);
        handle.await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(cache.current_value().value(), Some(&5));
    }

    #[tokio::test]
    async fn test_settled_waits_for_fetch() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Scripted::gated(vec![Ok(9)], gate.clone());
        let cache = cache(source);

        cache.refresh();
        gate.add_permits(1);

        assert_eq!(cache.settled().await.value(), Some(&9));
    }

    #[tokio::test]
    async fn test_dropped_cache_ignores_in_flight_fetch() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Scripted::gated(vec![Err(down())], gate.clone());
        let cache = cache(source.clone());

        let handle = cache.refresh().unwrap();
        drop(cache);
        gate.add_permits(10);
        handle.await.unwrap();

        // the failed attempt is not retried once the owner is gone
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let source = Scripted::new(vec![Err(down()), Err(down()), Ok(3)]);
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let cache = PollingCache::new("backoff", source.clone(), policy);

        let start = tokio::time::Instant::now();
        cache.refresh().unwrap().await.unwrap();
        let elapsed = start.elapsed();

        // 100ms after the first failure, 200ms after the second
        assert_eq!(source.calls(), 3);
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "{:?}", elapsed);
        assert_eq!(cache.current_value().value(), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exhausts_attempt_budget() {
        let source = Scripted::new(vec![Err(down())]);
        let policy = RetryPolicy::new(4, Duration::from_secs(2));
        let cache = PollingCache::new("backoff", source.clone(), policy);

        let start = tokio::time::Instant::now();
        cache.refresh().unwrap().await.unwrap();

        // 2s + 4s + capped 5s
        assert!(start.elapsed() >= Duration::from_secs(11));
        assert_eq!(source.calls(), 4);
        assert!(matches!(
            cache.current_value(),
            FetchState::Failed { attempts: 4, .. }
        ));
    }

    #[test]
    fn test_retry_delay_is_bounded() {
        let policy = RetryPolicy::new(0, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), MAX_BACKOFF);
        assert_eq!(RetryPolicy::default().delay(2), Duration::ZERO);
    }
}
