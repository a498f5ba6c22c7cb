//! Refreshed credential providers
//!
//! A provider binds one credential source to a refresh cache configured from
//! [`ProviderOptions`], and exposes retrieval as its only entry point. It
//! performs no retries of its own; a refresh is attempted once per cycle and
//! failure handling is entirely the cache's stale-value policy.

use std::fmt;

use aliri_clock::{Clock, System};
use idaas_cache::{
    jitter::RandomLateJitter,
    prefetch::{OneCallerBlocks, PrefetchBudget},
    CacheConfig, CacheError, RefreshCache, RefreshSource,
};

use crate::config::ProviderOptions;
use crate::tokens::TokenSet;
use crate::AccessToken;

/// A credential provider renewing its value through a refresh cache
///
/// When background updates are enabled in the options, look-ahead renewals
/// draw on the given [`PrefetchBudget`]; otherwise one retrieving caller per
/// cycle performs the renewal inline.
pub struct CredentialProvider<T, C = System> {
    cache: RefreshCache<T, C>,
    async_credential_update: bool,
}

impl<T, C> Clone for CredentialProvider<T, C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            async_credential_update: self.async_credential_update,
        }
    }
}

impl<T, C: fmt::Debug> fmt::Debug for CredentialProvider<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("cache", &self.cache)
            .field("async_credential_update", &self.async_credential_update)
            .finish()
    }
}

impl<T> CredentialProvider<T, System>
where
    T: Clone + Send + Sync + 'static,
{
    /// Constructs a provider reading the system clock
    pub fn new(
        source: impl RefreshSource<T> + 'static,
        options: ProviderOptions,
        budget: &PrefetchBudget,
    ) -> Self {
        Self::with_clock(source, options, budget, System)
    }
}

impl<T, C> CredentialProvider<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Constructs a provider with a custom clock
    ///
    /// Useful for testing purposes
    pub fn with_clock(
        source: impl RefreshSource<T> + 'static,
        options: ProviderOptions,
        budget: &PrefetchBudget,
        clock: C,
    ) -> Self {
        let config = CacheConfig {
            lock_wait: options.lock_wait,
            stale_value_behavior: options.stale_value_behavior,
        };
        let jitter = RandomLateJitter::new(options.jitter_base, options.jitter_spread);

        let cache = if options.async_credential_update {
            RefreshCache::with_clock(source, budget.bounded_async(), jitter, config, clock)
        } else {
            RefreshCache::with_clock(source, OneCallerBlocks::new(), jitter, config, clock)
        };

        Self {
            cache,
            async_credential_update: options.async_credential_update,
        }
    }

    /// Retrieves the current credential, renewing it first when stale
    pub async fn get(&self) -> Result<T, CacheError> {
        self.cache.get().await
    }

    /// Obtains the first credential eagerly
    ///
    /// Interactive sources benefit from performing their first, possibly
    /// slow, acquisition at a well-defined moment during startup instead of
    /// on some arbitrary later retrieval.
    pub async fn warm_up(&self) -> Result<(), CacheError> {
        self.cache.get().await.map(drop)
    }

    /// Whether look-ahead renewals run in the background
    pub fn async_credential_update_enabled(&self) -> bool {
        self.async_credential_update
    }
}

impl<C> CredentialProvider<TokenSet, C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Retrieves the current access token
    pub async fn access_token(&self) -> Result<AccessToken, CacheError> {
        Ok(self.get().await?.access_token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use aliri_clock::{DurationSecs, UnixTime};
    use async_trait::async_trait;
    use idaas_cache::{BoxError, RefreshResult, StaleValueBehavior};

    use super::*;
    use crate::sources::StaticTokenSource;
    use crate::tokens::BEARER_TOKEN_TYPE;
    use crate::{AccessToken, IdToken, RefreshToken};

    fn token(expires_at: u64, expires_in: u64) -> TokenSet {
        TokenSet {
            access_token: AccessToken::from_static("at-1"),
            id_token: Some(IdToken::from_static("idt-1")),
            refresh_token: Some(RefreshToken::from_static("rt-1")),
            token_type: BEARER_TOKEN_TYPE.to_owned(),
            expires_in: DurationSecs(expires_in),
            expires_at: UnixTime(expires_at),
        }
    }

    struct CountingTokenSource {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RefreshSource<TokenSet> for CountingTokenSource {
        async fn refresh(&self) -> Result<RefreshResult<TokenSet>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(token(100_000, 3600).into_refresh_result())
        }
    }

    #[tokio::test]
    async fn warm_up_fills_the_cache_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let budget = PrefetchBudget::default();
        let provider = CredentialProvider::new(
            CountingTokenSource {
                calls: Arc::clone(&calls),
            },
            ProviderOptions::default(),
            &budget,
        );

        provider.warm_up().await.unwrap();
        assert_eq!(provider.access_token().await.unwrap().as_str(), "at-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_static_credential_is_never_renewed() {
        let budget = PrefetchBudget::default();
        let provider = CredentialProvider::new(
            StaticTokenSource::new(token(10, 10)),
            ProviderOptions {
                stale_value_behavior: StaleValueBehavior::Strict,
                lock_wait: Duration::from_millis(100),
                ..ProviderOptions::default()
            },
            &budget,
        );

        // The recorded expiry is long past, but a permanent result carries no
        // deadlines and stays served
        for _ in 0..3 {
            assert_eq!(provider.get().await.unwrap().access_token.as_str(), "at-1");
        }
    }

    #[tokio::test]
    async fn options_select_the_background_strategy() {
        let budget = PrefetchBudget::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CredentialProvider::new(
            CountingTokenSource {
                calls: Arc::clone(&calls),
            },
            ProviderOptions {
                async_credential_update: true,
                ..ProviderOptions::default()
            },
            &budget,
        );

        assert!(provider.async_credential_update_enabled());
        provider.warm_up().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
