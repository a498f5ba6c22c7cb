use aliri_clock::UnixTime;
use async_trait::async_trait;

use crate::jitter::JitterSource;

/// A type-erased error returned by a refresh function
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An asynchronous producer of cacheable values
///
/// Implementations perform whatever exchange yields a new value and report,
/// alongside the value itself, when that value goes stale and when the cache
/// should start looking ahead for a replacement.
#[async_trait]
pub trait RefreshSource<T>: Send + Sync {
    /// Produces a fresh value together with its deadlines
    async fn refresh(&self) -> Result<RefreshResult<T>, BoxError>;
}

/// A value produced by a refresh together with its lifecycle deadlines
///
/// Results are immutable once constructed. A cache replaces its current
/// result wholesale whenever a later refresh succeeds; nothing ever updates
/// one in place.
#[derive(Clone, Debug)]
pub struct RefreshResult<T> {
    value: T,
    stale_at: Option<UnixTime>,
    prefetch_at: Option<UnixTime>,
}

impl<T> RefreshResult<T> {
    /// Constructs a result with the given deadlines
    ///
    /// A missing stale deadline means the value never goes stale; a missing
    /// prefetch deadline means the cache never attempts a look-ahead refresh
    /// for it.
    pub fn new(value: T, stale_at: Option<UnixTime>, prefetch_at: Option<UnixTime>) -> Self {
        Self {
            value,
            stale_at,
            prefetch_at,
        }
    }

    /// Constructs a result that is never renewed
    pub fn permanent(value: T) -> Self {
        Self::new(value, None, None)
    }

    /// The cached value
    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Unwraps the cached value
    #[inline]
    pub fn into_value(self) -> T {
        self.value
    }

    /// The time after which the value must not be served without a renewal
    #[inline]
    pub fn stale_at(&self) -> Option<UnixTime> {
        self.stale_at
    }

    /// The time after which a look-ahead renewal should be attempted
    #[inline]
    pub fn prefetch_at(&self) -> Option<UnixTime> {
        self.prefetch_at
    }

    /// Applies jitter to each present deadline independently
    pub(crate) fn jittered(self, jitter: &mut (dyn JitterSource + Send)) -> Self {
        Self {
            value: self.value,
            stale_at: self.stale_at.map(|t| jitter.jitter(t)),
            prefetch_at: self.prefetch_at.map(|t| jitter.jitter(t)),
        }
    }
}
