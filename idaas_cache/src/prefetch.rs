//! Strategies for running look-ahead refreshes
//!
//! A prefetch strategy is consulted when a cached value has crossed its
//! prefetch deadline but is not yet stale. Whatever the strategy does, it
//! must not make the reading caller wait longer than its own contract allows:
//! [`OneCallerBlocks`] lets exactly one caller per renewal cycle pay the
//! refresh latency inline, while [`BoundedAsync`] hands the refresh to the
//! tokio runtime and returns immediately.

use std::{
    future::Future,
    ops::Deref,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tokio::sync::{Semaphore, TryAcquireError};

/// A ready-to-run refresh, packaged by the cache that owns the value
///
/// Running the task to completion performs the refresh and absorbs any
/// failure it encounters; strategies never observe refresh errors.
pub type RefreshTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A policy deciding how, and whether, to run a look-ahead refresh
#[async_trait]
pub trait PrefetchStrategy: Send + Sync {
    /// Possibly runs the given refresh task
    ///
    /// Invoked only while the cached value is still valid, so skipping the
    /// task entirely is always acceptable.
    async fn prefetch(&self, refresh: RefreshTask);
}

/// Resets an in-flight flag on every exit path
struct InFlight<F: Deref<Target = AtomicBool>>(F);

impl<F: Deref<Target = AtomicBool>> Drop for InFlight<F> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A strategy where one winning caller performs the refresh inline
///
/// The first caller to cross the prefetch deadline runs the refresh to
/// completion and returns the pre-refresh value afterwards; every other
/// caller returns immediately without waiting. This needs no background
/// tasks, at the cost of one caller per cycle paying the refresh latency.
#[derive(Debug, Default)]
pub struct OneCallerBlocks {
    in_flight: AtomicBool,
}

impl OneCallerBlocks {
    /// Constructs the strategy
    pub const fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PrefetchStrategy for OneCallerBlocks {
    async fn prefetch(&self, refresh: RefreshTask) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _reset = InFlight(&self.in_flight);
            refresh.await;
        }
    }
}

/// The default number of background refreshes allowed to run at once
pub const DEFAULT_CONCURRENT_REFRESHES: usize = 100;

/// A process-wide allowance for concurrent background refreshes
///
/// Construct one budget per process and derive a [`BoundedAsync`] strategy
/// from it for each cache that should refresh in the background. All derived
/// strategies draw permits from the same pool, bounding the total number of
/// simultaneously running background refreshes no matter how many caches
/// exist.
#[derive(Clone, Debug)]
pub struct PrefetchBudget {
    permits: Arc<Semaphore>,
}

impl Default for PrefetchBudget {
    /// A budget of 100 concurrent background refreshes
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENT_REFRESHES)
    }
}

impl PrefetchBudget {
    /// Constructs a budget allowing up to `max_concurrent` background refreshes
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Derives a background refresh strategy for one cache instance
    pub fn bounded_async(&self) -> BoundedAsync {
        BoundedAsync {
            permits: Arc::clone(&self.permits),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The number of background refreshes that could start right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A strategy that refreshes on the tokio runtime under a shared budget
///
/// A permit is taken from the owning [`PrefetchBudget`] without waiting; if
/// none is available the refresh round is skipped and a later read past the
/// prefetch deadline will try again. A per-instance flag keeps a single cache
/// from scheduling its own refresh twice.
#[derive(Debug)]
pub struct BoundedAsync {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicBool>,
}

#[async_trait]
impl PrefetchStrategy for BoundedAsync {
    async fn prefetch(&self, refresh: RefreshTask) {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                tracing::warn!("background refresh budget exhausted, skipping prefetch");
                return;
            }
            Err(TryAcquireError::Closed) => return,
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let in_flight = InFlight(Arc::clone(&self.in_flight));
            tokio::spawn(async move {
                let _permit = permit;
                let _in_flight = in_flight;
                refresh.await;
            });
        }
        // A lost exchange means a running task already covers this cache; the
        // just-acquired permit drops here and returns to the budget.
    }
}
