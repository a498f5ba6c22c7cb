//! Deadline jittering to break up renewal stampedes
//!
//! Many caches holding values issued by the same authority tend to receive
//! similar lifetimes, which would have them all renew at nearly the same
//! moment. Jittering each stored deadline by a randomized positive offset
//! spreads those renewals out. Jitter only ever moves a deadline later, so a
//! value is never treated as stale before its producer said it would be.

use aliri_clock::UnixTime;

/// A type that can jitter refresh deadlines
pub trait JitterSource {
    /// Jitters a deadline
    fn jitter(&mut self, time: UnixTime) -> UnixTime;
}

/// A jitter source that passes deadlines through unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&mut self, time: UnixTime) -> UnixTime {
        time
    }
}

#[cfg(feature = "rand")]
mod random {
    use aliri_clock::{DurationSecs, UnixTime};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// The default fixed offset added to every jittered deadline
    pub const DEFAULT_JITTER_BASE: DurationSecs = DurationSecs(300);

    /// The default width of the random jitter interval
    pub const DEFAULT_JITTER_SPREAD: DurationSecs = DurationSecs(300);

    /// Jitters deadlines later by a fixed base plus a uniform random spread
    ///
    /// Deadlines jittered by this type land in `[time + base, time + base + spread)`.
    #[derive(Debug)]
    pub struct RandomLateJitter<R = StdRng> {
        base: DurationSecs,
        spread: DurationSecs,
        rand_source: R,
    }

    impl RandomLateJitter {
        /// Constructs a jitter source with the given base offset and spread
        pub fn new(base: DurationSecs, spread: DurationSecs) -> Self {
            Self {
                base,
                spread,
                rand_source: StdRng::from_rng(rand::thread_rng()).unwrap(),
            }
        }
    }

    impl Default for RandomLateJitter {
        /// Jitter of five minutes plus up to five more minutes
        fn default() -> Self {
            Self::new(DEFAULT_JITTER_BASE, DEFAULT_JITTER_SPREAD)
        }
    }

    impl<R: Rng> super::JitterSource for RandomLateJitter<R> {
        fn jitter(&mut self, time: UnixTime) -> UnixTime {
            let spread = if self.spread.0 > 0 {
                DurationSecs(self.rand_source.gen_range(0..self.spread.0))
            } else {
                DurationSecs(0)
            };
            time + self.base + spread
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::jitter::JitterSource;

        #[test]
        fn jittered_deadline_lands_in_expected_interval() {
            let mut jitter = RandomLateJitter::new(DurationSecs(300), DurationSecs(300));
            for _ in 0..1000 {
                let jittered = jitter.jitter(UnixTime(10_000));
                assert!(jittered >= UnixTime(10_300));
                assert!(jittered < UnixTime(10_600));
            }
        }

        #[test]
        fn zero_spread_adds_only_the_base() {
            let mut jitter = RandomLateJitter::new(DurationSecs(60), DurationSecs(0));
            assert_eq!(jitter.jitter(UnixTime(500)), UnixTime(560));
        }
    }
}

#[cfg(feature = "rand")]
pub use random::{RandomLateJitter, DEFAULT_JITTER_BASE, DEFAULT_JITTER_SPREAD};
