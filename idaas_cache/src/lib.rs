//! Time-based caching of refreshable values
//!
//! This library is the caching core used by credential providers that need to
//! keep a short-lived value on hand without making their callers aware of how
//! or when that value gets renewed. A [`RefreshCache`] wraps a refresh
//! function, remembers its most recent result, and decides on every read
//! whether the value can be served as-is, must be renewed before it can be
//! served, or should be renewed opportunistically in the background while the
//! current value is still good.
//!
//! A refresh function reports two deadlines alongside each value it produces:
//! the _stale_ deadline, after which the value must not be served without a
//! successful renewal, and the earlier _prefetch_ deadline, after which the
//! cache starts looking ahead for a replacement while continuing to serve the
//! current value. Both deadlines are jittered when the result is stored (see
//! [`jitter`]) so that many caches fed by the same authority do not line up
//! and renew in lockstep.
//!
//! How a look-ahead renewal runs is decided by a [prefetch
//! strategy](prefetch::PrefetchStrategy). [`prefetch::OneCallerBlocks`] makes
//! a single winning caller pay the renewal latency inline, which needs no
//! runtime support. [`prefetch::BoundedAsync`] pushes the renewal onto the
//! tokio runtime instead, with a process-wide
//! [budget](prefetch::PrefetchBudget) bounding how many background renewals
//! may run at once across every cache that shares it.
//!
//! Renewal failures are handled according to a [`StaleValueBehavior`]: a
//! strict cache surfaces the failure to the caller that needed the renewal,
//! while a lenient cache keeps serving the previous value until some later
//! renewal succeeds.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod jitter;
pub mod prefetch;

mod cache;
mod refresh;

pub use cache::{CacheConfig, CacheError, RefreshCache, StaleValueBehavior};
pub use refresh::{BoxError, RefreshResult, RefreshSource};
