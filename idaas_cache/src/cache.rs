use std::{fmt, sync::Arc, time::Duration};

use aliri_clock::{Clock, System};
use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    jitter::JitterSource,
    prefetch::PrefetchStrategy,
    refresh::{BoxError, RefreshResult, RefreshSource},
};

/// An error returned when a cached value cannot be served
#[derive(Debug, Error)]
pub enum CacheError {
    /// No value has ever been produced and no refresh was attempted
    #[error("no cached value is available")]
    NoCachedValue,

    /// The refresh function failed and the failure could not be absorbed
    #[error("failed to refresh the cached value")]
    RefreshFailed(#[source] BoxError),
}

/// How a cache behaves when a refresh fails while a previous value exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleValueBehavior {
    /// Surface the refresh failure to the caller that needed the refresh
    Strict,
    /// Keep serving the previous value until a later refresh succeeds
    AllowStale,
}

/// Tunables for a [`RefreshCache`]
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long a refresh attempt waits for the refresh lock before giving
    /// up and leaving the current value in place
    pub lock_wait: Duration,
    /// What to do when a refresh fails
    pub stale_value_behavior: StaleValueBehavior,
}

impl Default for CacheConfig {
    /// Waits up to five seconds for the refresh lock and keeps serving the
    /// previous value when a refresh fails
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(5),
            stale_value_behavior: StaleValueBehavior::AllowStale,
        }
    }
}

/// A memoizing wrapper around a refresh function
///
/// Reads are lock-free snapshots of the most recently stored
/// [`RefreshResult`]. When a read finds the value stale it performs the
/// renewal inline before returning; when it merely finds the value past its
/// prefetch deadline it hands a renewal task to the configured
/// [`PrefetchStrategy`] and serves the current value. At most one renewal
/// runs per cache at any instant, regardless of how many tasks are reading.
///
/// Cloning is cheap and every clone reads from and renews the same state.
pub struct RefreshCache<T, C = System> {
    inner: Arc<Inner<T, C>>,
}

impl<T, C> Clone for RefreshCache<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, C: fmt::Debug> fmt::Debug for RefreshCache<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCache")
            .field("lock_wait", &self.inner.lock_wait)
            .field("stale_value_behavior", &self.inner.stale_value_behavior)
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}

struct Inner<T, C> {
    current: ArcSwapOption<RefreshResult<T>>,
    source: Box<dyn RefreshSource<T>>,
    // The lock guards refresh execution, never reads; it also hands the
    // winning refresher exclusive use of the jitter source.
    refresh_lock: Mutex<Box<dyn JitterSource + Send>>,
    prefetch: Box<dyn PrefetchStrategy>,
    lock_wait: Duration,
    stale_value_behavior: StaleValueBehavior,
    clock: C,
}

impl<T> RefreshCache<T, System>
where
    T: Clone + Send + Sync + 'static,
{
    /// Constructs a cache reading the system clock
    pub fn new(
        source: impl RefreshSource<T> + 'static,
        prefetch: impl PrefetchStrategy + 'static,
        jitter: impl JitterSource + Send + 'static,
        config: CacheConfig,
    ) -> Self {
        Self::with_clock(source, prefetch, jitter, config, System)
    }
}

impl<T, C> RefreshCache<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Constructs a cache with a custom clock
    ///
    /// Useful for testing purposes
    pub fn with_clock(
        source: impl RefreshSource<T> + 'static,
        prefetch: impl PrefetchStrategy + 'static,
        jitter: impl JitterSource + Send + 'static,
        config: CacheConfig,
        clock: C,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: ArcSwapOption::from(None),
                source: Box::new(source),
                refresh_lock: Mutex::new(Box::new(jitter)),
                prefetch: Box::new(prefetch),
                lock_wait: config.lock_wait,
                stale_value_behavior: config.stale_value_behavior,
                clock,
            }),
        }
    }

    /// Returns the cached value, renewing it first if it has gone stale
    ///
    /// A stale value is renewed inline and the renewed value returned. A
    /// value past its prefetch deadline is served as-is while a renewal is
    /// handed to the prefetch strategy. Fails with
    /// [`CacheError::RefreshFailed`] when a required renewal fails and the
    /// stale-value behavior does not absorb it, or with
    /// [`CacheError::NoCachedValue`] when no value has ever been produced.
    pub async fn get(&self) -> Result<T, CacheError> {
        let mut current = self.inner.current.load_full();

        if self.inner.is_stale(current.as_deref()) {
            self.inner.refresh_cache().await?;
            current = self.inner.current.load_full();
        }

        let current = current.ok_or(CacheError::NoCachedValue)?;

        if self.inner.should_prefetch(&current) {
            let inner = Arc::clone(&self.inner);
            let task = Box::pin(async move {
                if let Err(error) = inner.refresh_cache().await {
                    let error: &dyn std::error::Error = &error;
                    tracing::warn!(error, "look-ahead refresh failed");
                }
            });
            self.inner.prefetch.prefetch(task).await;
        }

        Ok(current.value().clone())
    }

    /// The most recently stored result, if any, without triggering a refresh
    pub fn snapshot(&self) -> Option<Arc<RefreshResult<T>>> {
        self.inner.current.load_full()
    }
}

impl<T, C> Inner<T, C>
where
    T: Send + Sync,
    C: Clock,
{
    fn is_stale(&self, current: Option<&RefreshResult<T>>) -> bool {
        match current {
            None => true,
            Some(result) => match result.stale_at() {
                Some(stale_at) => self.clock.now() > stale_at,
                None => false,
            },
        }
    }

    fn should_prefetch(&self, current: &RefreshResult<T>) -> bool {
        match current.prefetch_at() {
            Some(prefetch_at) => self.clock.now() > prefetch_at,
            None => false,
        }
    }

    /// Whether a refresh would still accomplish anything
    ///
    /// Re-evaluated under the refresh lock so that a waiter whose refresh was
    /// already performed by a concurrent winner skips the redundant work,
    /// while a look-ahead refresh of a value that is aging but not yet stale
    /// still proceeds.
    fn needs_refresh(&self) -> bool {
        let guard = self.current.load();
        match guard.as_deref() {
            None => true,
            Some(result) => self.is_stale(Some(result)) || self.should_prefetch(result),
        }
    }

    async fn refresh_cache(&self) -> Result<(), CacheError> {
        let mut jitter = match tokio::time::timeout(self.lock_wait, self.refresh_lock.lock()).await
        {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!(
                    wait = ?self.lock_wait,
                    "timed out waiting for the refresh lock, keeping the current value"
                );
                return Ok(());
            }
        };

        if !self.needs_refresh() {
            return Ok(());
        }

        match self.source.refresh().await {
            Ok(fresh) => {
                let fresh = fresh.jittered(&mut **jitter);
                self.current.store(Some(Arc::new(fresh)));
                Ok(())
            }
            Err(error) => self.handle_refresh_failure(error),
        }
    }

    fn handle_refresh_failure(&self, error: BoxError) -> Result<(), CacheError> {
        match self.stale_value_behavior {
            StaleValueBehavior::Strict => Err(CacheError::RefreshFailed(error)),
            StaleValueBehavior::AllowStale => {
                if self.current.load().is_none() {
                    // Nothing to fall back to; the caller learns the real cause
                    return Err(CacheError::RefreshFailed(error));
                }
                let error: &dyn std::error::Error = &*error;
                tracing::warn!(error, "refresh failed, continuing to serve the previous value");
                Ok(())
            }
        }
    }
}
