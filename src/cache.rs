//! Freshness-gated caching for upstream API data.
//!
//! Each upstream source (card catalog, exchange rate, profile) is wrapped in a
//! [`FreshCache`] configured with two TTLs: a short in-memory TTL and a longer
//! persistent-tier TTL. Reads resolve in order: memory hit, join of an
//! in-flight refresh (single-flight), persistent-tier adoption, upstream
//! fetch. When upstream fails, the cache degrades to stale persisted data,
//! then the last in-memory value, then a configured constant. Only when all
//! of those are absent does [`CacheError::NoData`] surface to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Failure reported by a [`Backing`] operation.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network or remote failure reaching the upstream source.
    #[error("upstream unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
    /// The upstream responded, but the payload did not match expectations.
    /// Treated identically to [`FetchError::Unavailable`] by the cache.
    #[error("malformed upstream payload: {0}")]
    Malformed(#[source] anyhow::Error),
}

/// Terminal error surfaced from [`FreshCache::get`].
///
/// `Display`/`Error` are implemented by hand because the field is named
/// `source` but is a plain label, not an underlying error cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// No memory value, no persisted row, no configured fallback, and the
    /// upstream fetch failed. Callers must render an explicit "unavailable"
    /// state rather than a fabricated value.
    NoData { source: &'static str },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::NoData { source } => write!(f, "no data available for '{source}'"),
        }
    }
}

impl std::error::Error for CacheError {}

/// The two storage/fetch tiers behind a cache instance.
///
/// `load`/`store` talk to the persistent tier (a database row, or nothing for
/// memory-only instances); `fetch` performs the expensive upstream call. The
/// bulk catalog backing persists inside `fetch` itself (the snapshot replace
/// must be transactional) and leaves `store` a no-op.
#[async_trait]
pub trait Backing: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Short name identifying this source in logs and errors.
    fn source(&self) -> &'static str;

    /// Read the persistent tier: the stored value and when it was written.
    async fn load(&self) -> Result<Option<(Self::Value, DateTime<Utc>)>, FetchError>;

    /// Call the upstream source.
    async fn fetch(&self) -> Result<Self::Value, FetchError>;

    /// Write a freshly fetched value to the persistent tier.
    async fn store(&self, value: &Self::Value) -> Result<(), FetchError>;
}

/// Per-instance tuning. TTL defaults live in [`crate::config::Config`]; this
/// struct only carries what the cache core needs.
pub struct CacheConfig<V> {
    pub memory_ttl: Duration,
    pub persistent_ttl: Duration,
    /// Last-resort constant returned when upstream fails and no cached data
    /// of any age exists. Never written to either cache tier.
    pub fallback: Option<V>,
}

struct Inner<V> {
    value: Option<V>,
    fetched_at: Option<Instant>,
    /// Set by `invalidate()`. Makes the next refresh skip the persistent-tier
    /// freshness shortcut so it genuinely re-contacts upstream.
    force_upstream: bool,
    /// Single-flight slot: present while a refresh task is running. Callers
    /// arriving during that window subscribe instead of starting another.
    inflight: Option<broadcast::Sender<Result<V, CacheError>>>,
}

/// How a refresh produced its value, deciding whether the memory tier is
/// repopulated. Fallback constants are served but never cached.
enum Refreshed<V> {
    Cacheable(V),
    Fallback(V),
}

impl<V> Refreshed<V> {
    fn into_value(self) -> V {
        match self {
            Refreshed::Cacheable(v) | Refreshed::Fallback(v) => v,
        }
    }
}

/// Clears the in-flight slot if the refresh task unwinds before its normal
/// exit path runs. A dangling slot would wedge every subsequent caller.
struct InflightGuard<V> {
    inner: Arc<Mutex<Inner<V>>>,
    armed: bool,
}

impl<V> Drop for InflightGuard<V> {
    fn drop(&mut self) {
        if self.armed
            && let Ok(mut inner) = self.inner.lock()
        {
            inner.inflight = None;
        }
    }
}

pub struct FreshCache<B: Backing> {
    backing: Arc<B>,
    memory_ttl: Duration,
    persistent_ttl: Duration,
    fallback: Option<B::Value>,
    inner: Arc<Mutex<Inner<B::Value>>>,
}

impl<B: Backing> FreshCache<B> {
    pub fn new(backing: B, config: CacheConfig<B::Value>) -> Self {
        Self {
            backing: Arc::new(backing),
            memory_ttl: config.memory_ttl,
            persistent_ttl: config.persistent_ttl,
            fallback: config.fallback,
            inner: Arc::new(Mutex::new(Inner {
                value: None,
                fetched_at: None,
                force_upstream: false,
                inflight: None,
            })),
        }
    }

    /// Return a value that is fresh enough, contacting upstream at most once
    /// concurrently. All callers that join an in-flight refresh observe the
    /// same resolved value (or the same failure).
    pub async fn get(&self) -> Result<B::Value, CacheError> {
        let mut rx = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");

            if let (Some(value), Some(fetched_at)) = (&inner.value, inner.fetched_at)
                && fetched_at.elapsed() < self.memory_ttl
            {
                return Ok(value.clone());
            }

            if let Some(tx) = &inner.inflight {
                tx.subscribe()
            } else {
                let (tx, rx) = broadcast::channel(1);
                inner.inflight = Some(tx.clone());
                let force_upstream = std::mem::take(&mut inner.force_upstream);
                let previous = inner.value.clone();
                self.spawn_refresh(tx, force_upstream, previous);
                rx
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            // The refresh task unwound before broadcasting. Its drop guard
            // cleared the in-flight slot, so the next call starts fresh.
            Err(_) => Err(CacheError::NoData {
                source: self.backing.source(),
            }),
        }
    }

    /// Drop the memory freshness stamp (the value is retained for stale
    /// fallback) and force the next refresh past the persistent-tier
    /// shortcut. Does not touch the persisted row.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.fetched_at = None;
        inner.force_upstream = true;
    }

    /// Runs the refresh in its own task so it completes even if every waiting
    /// caller is cancelled mid-await.
    fn spawn_refresh(
        &self,
        tx: broadcast::Sender<Result<B::Value, CacheError>>,
        force_upstream: bool,
        previous: Option<B::Value>,
    ) {
        let backing = self.backing.clone();
        let inner = self.inner.clone();
        let persistent_ttl = self.persistent_ttl;
        let fallback = self.fallback.clone();

        tokio::spawn(async move {
            let mut guard = InflightGuard {
                inner: inner.clone(),
                armed: true,
            };

            let outcome =
                refresh(backing.as_ref(), persistent_ttl, force_upstream, previous, fallback)
                    .await;

            {
                let mut inner = inner.lock().expect("cache lock poisoned");
                if let Ok(Refreshed::Cacheable(value)) = &outcome {
                    inner.value = Some(value.clone());
                    inner.fetched_at = Some(Instant::now());
                }
                // A failed refresh never clears an existing value, and the
                // in-flight slot never outlives the task.
                inner.inflight = None;
            }
            guard.armed = false;

            let _ = tx.send(outcome.map(Refreshed::into_value));
        });
    }
}

/// One full refresh pass: persistent-tier adoption, upstream fetch, then the
/// stale-is-better-than-nothing ladder.
async fn refresh<B: Backing>(
    backing: &B,
    persistent_ttl: Duration,
    force_upstream: bool,
    previous: Option<B::Value>,
    fallback: Option<B::Value>,
) -> Result<Refreshed<B::Value>, CacheError> {
    let source = backing.source();
    let persistent_ttl =
        chrono::Duration::from_std(persistent_ttl).unwrap_or(chrono::Duration::MAX);

    if !force_upstream {
        match backing.load().await {
            Ok(Some((value, stored_at))) => {
                let age = Utc::now().signed_duration_since(stored_at);
                if age < persistent_ttl {
                    debug!(source, age_hours = age.num_hours(), "adopted persisted value");
                    return Ok(Refreshed::Cacheable(value));
                }
                debug!(source, age_hours = age.num_hours(), "persisted value expired");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(source, error = ?e, "persistent tier read failed, going upstream")
            }
        }
    }

    match backing.fetch().await {
        Ok(value) => {
            if let Err(e) = backing.store(&value).await {
                // Non-fatal: the value is still served and memory-cached;
                // the next expiry will retry persistence.
                warn!(source, error = ?e, "failed to persist fetched value");
            }
            info!(source, "refreshed from upstream");
            Ok(Refreshed::Cacheable(value))
        }
        Err(e) => {
            warn!(source, error = ?e, "upstream fetch failed, degrading to stale data");

            match backing.load().await {
                Ok(Some((value, stored_at))) => {
                    info!(source, stored_at = %stored_at, "serving stale persisted value");
                    return Ok(Refreshed::Cacheable(value));
                }
                Ok(None) => {}
                Err(e) => warn!(source, error = ?e, "stale read failed"),
            }

            if let Some(value) = previous {
                info!(source, "serving stale in-memory value");
                return Ok(Refreshed::Cacheable(value));
            }

            if let Some(value) = fallback {
                warn!(source, "serving configured fallback value");
                return Ok(Refreshed::Fallback(value));
            }

            Err(CacheError::NoData { source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Shared handle into a [`MockBacking`] so tests can flip behavior and
    /// inspect call counts after the cache takes ownership of the backing.
    #[derive(Default)]
    struct MockState {
        persisted: Mutex<Option<(u32, DateTime<Utc>)>>,
        fetch_fails: AtomicBool,
        loads: AtomicUsize,
        fetches: AtomicUsize,
        stores: AtomicUsize,
    }

    impl MockState {
        fn set_persisted(&self, value: u32, stored_at: DateTime<Utc>) {
            *self.persisted.lock().unwrap() = Some((value, stored_at));
        }

        fn clear_persisted(&self) {
            *self.persisted.lock().unwrap() = None;
        }
    }

    struct MockBacking {
        state: Arc<MockState>,
        fetch_value: u32,
        fetch_delay: Duration,
    }

    impl MockBacking {
        fn new(fetch_value: u32) -> (Self, Arc<MockState>) {
            let state = Arc::new(MockState::default());
            (
                Self {
                    state: state.clone(),
                    fetch_value,
                    fetch_delay: Duration::ZERO,
                },
                state,
            )
        }
    }

    #[async_trait]
    impl Backing for MockBacking {
        type Value = u32;

        fn source(&self) -> &'static str {
            "mock"
        }

        async fn load(&self) -> Result<Option<(u32, DateTime<Utc>)>, FetchError> {
            self.state.loads.fetch_add(1, Ordering::SeqCst);
            Ok(*self.state.persisted.lock().unwrap())
        }

        async fn fetch(&self) -> Result<u32, FetchError> {
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            self.state.fetches.fetch_add(1, Ordering::SeqCst);
            if self.state.fetch_fails.load(Ordering::SeqCst) {
                Err(FetchError::Unavailable(anyhow!("connection refused")))
            } else {
                Ok(self.fetch_value)
            }
        }

        async fn store(&self, value: &u32) -> Result<(), FetchError> {
            self.state.stores.fetch_add(1, Ordering::SeqCst);
            self.state.set_persisted(*value, Utc::now());
            Ok(())
        }
    }

    fn config(fallback: Option<u32>) -> CacheConfig<u32> {
        CacheConfig {
            memory_ttl: Duration::from_secs(3600),
            persistent_ttl: Duration::from_secs(86400),
            fallback,
        }
    }

    #[tokio::test]
    async fn single_flight_deduplicates_concurrent_callers() {
        let (mut backing, state) = MockBacking::new(42);
        backing.fetch_delay = Duration::from_millis(50);
        let cache = Arc::new(FreshCache::new(backing, config(None)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(state.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memory_hit_makes_no_io() {
        let (backing, state) = MockBacking::new(42);
        let cache = FreshCache::new(backing, config(None));

        assert_eq!(cache.get().await, Ok(42));
        assert_eq!(cache.get().await, Ok(42));

        assert_eq!(state.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(state.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_persisted_row_skips_upstream() {
        let (backing, state) = MockBacking::new(42);
        state.set_persisted(7, Utc::now());
        let cache = FreshCache::new(backing, config(None));

        assert_eq!(cache.get().await, Ok(7));
        assert_eq!(state.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_persisted_row_goes_upstream() {
        let (backing, state) = MockBacking::new(42);
        state.set_persisted(7, Utc::now() - chrono::Duration::days(2));
        let cache = FreshCache::new(backing, config(None));

        assert_eq!(cache.get().await, Ok(42));
        assert_eq!(state.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_persisted_served_on_upstream_failure() {
        let (backing, state) = MockBacking::new(42);
        state.set_persisted(7, Utc::now() - chrono::Duration::days(30));
        state.fetch_fails.store(true, Ordering::SeqCst);
        let cache = FreshCache::new(backing, config(None));

        assert_eq!(cache.get().await, Ok(7));
        // The stale row is adopted, not deleted or overwritten.
        let persisted = (*state.persisted.lock().unwrap()).map(|(v, _)| v);
        assert_eq!(persisted, Some(7));
        assert_eq!(state.stores.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_served_but_never_cached() {
        let (backing, state) = MockBacking::new(42);
        state.fetch_fails.store(true, Ordering::SeqCst);
        let cache = FreshCache::new(backing, config(Some(9)));

        assert_eq!(cache.get().await, Ok(9));
        // The fallback constant did not populate the memory tier, so the
        // next call attempts a brand-new fetch.
        assert_eq!(cache.get().await, Ok(9));
        assert_eq!(state.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_data_anywhere_is_a_hard_failure() {
        let (backing, state) = MockBacking::new(42);
        state.fetch_fails.store(true, Ordering::SeqCst);
        let cache = FreshCache::new(backing, config(None));

        assert_eq!(cache.get().await, Err(CacheError::NoData { source: "mock" }));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_memory_value() {
        let (backing, state) = MockBacking::new(42);
        let cache = FreshCache::new(backing, config(None));

        assert_eq!(cache.get().await, Ok(42));

        // Upstream goes down and the persisted copy disappears: the stale
        // in-memory value is still served after invalidation.
        state.fetch_fails.store(true, Ordering::SeqCst);
        state.clear_persisted();
        cache.invalidate();

        assert_eq!(cache.get().await, Ok(42));
    }

    #[tokio::test]
    async fn invalidate_forces_upstream_refetch() {
        let (backing, state) = MockBacking::new(42);
        let cache = FreshCache::new(backing, config(None));

        assert_eq!(cache.get().await, Ok(42));
        assert_eq!(state.fetches.load(Ordering::SeqCst), 1);

        // The persisted row written by the first fetch is fresh, but
        // invalidate() bypasses both the memory TTL and the persistent-tier
        // shortcut.
        cache.invalidate();
        assert_eq!(cache.get().await, Ok(42));
        assert_eq!(state.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn inflight_slot_cleared_after_failure() {
        let (backing, state) = MockBacking::new(42);
        state.fetch_fails.store(true, Ordering::SeqCst);
        let cache = FreshCache::new(backing, config(None));

        assert!(cache.get().await.is_err());

        // A subsequent call is able to start a brand-new upstream fetch.
        state.fetch_fails.store(false, Ordering::SeqCst);
        assert_eq!(cache.get().await, Ok(42));
        assert_eq!(state.fetches.load(Ordering::SeqCst), 2);
    }
}
