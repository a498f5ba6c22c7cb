//! Interactive credential acquisition for a human operator
//!
//! A [`HumanFederatedSource`] is a refresh function with memory. The very
//! first cycle in a process tries to reuse the credential persisted by an
//! earlier run, renewing it when it is close to expiry, and only falls back
//! to an interactive device-code login when nothing usable is on disk. Every
//! later cycle renews with the refresh token captured from the previous
//! cycle. That refresh token is held privately by the source itself; reading
//! it back through the owning cache would re-enter the refresh function that
//! is currently executing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use aliri_clock::{Clock, DurationSecs, System};
use async_trait::async_trait;
use idaas_cache::{BoxError, RefreshResult, RefreshSource};
use tokio::sync::Mutex;

use super::oauth2::{DevicePoll, TokenEndpoint};
use crate::error::CredentialError;
use crate::persist::CredentialStore;
use crate::tokens::TokenSet;
use crate::{ClientId, RefreshToken};

/// The scope requested during interactive login
pub const HUMAN_LOGIN_SCOPE: &str = "openid offline_access";

/// Poll interval used when the server does not specify one
const DEFAULT_POLL_INTERVAL: DurationSecs = DurationSecs(5);

/// Extra delay added to the poll interval on a slow-down response
const SLOW_DOWN_INCREMENT: DurationSecs = DurationSecs(5);

/// Maximum total time spent polling for one login before giving up
const MAX_POLL_WAIT: DurationSecs = DurationSecs(180);

/// A refresh function implementing the interactive login lifecycle
pub struct HumanFederatedSource<E, C = System> {
    endpoint: E,
    client_id: ClientId,
    scope: String,
    store: CredentialStore,
    // One-way transition: set until the first cycle completes, never again
    first_run: AtomicBool,
    current_refresh_token: Mutex<Option<RefreshToken>>,
    clock: C,
}

impl<E, C> fmt::Debug for HumanFederatedSource<E, C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HumanFederatedSource")
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("store", &self.store)
            .field("first_run", &self.first_run)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<E> HumanFederatedSource<E, System> {
    /// Constructs a source reading the system clock
    pub fn new(endpoint: E, client_id: ClientId, store: CredentialStore) -> Self {
        Self::with_clock(endpoint, client_id, store, System)
    }
}

impl<E, C> HumanFederatedSource<E, C> {
    /// Constructs a source with a custom clock
    ///
    /// Useful for testing purposes
    pub fn with_clock(endpoint: E, client_id: ClientId, store: CredentialStore, clock: C) -> Self {
        Self {
            endpoint,
            client_id,
            scope: HUMAN_LOGIN_SCOPE.to_owned(),
            store,
            first_run: AtomicBool::new(true),
            current_refresh_token: Mutex::new(None),
            clock,
        }
    }

    /// The client this source logs in as
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }
}

impl<E, C> HumanFederatedSource<E, C>
where
    E: TokenEndpoint,
    C: Clock + Send + Sync,
{
    /// Stashes the cycle's refresh token and packages the credential
    async fn complete_cycle(&self, token: TokenSet) -> RefreshResult<TokenSet> {
        *self.current_refresh_token.lock().await = token.refresh_token.clone();
        token.into_refresh_result()
    }

    /// Persists a freshly obtained credential
    ///
    /// Failure to persist does not invalidate the credential itself; the
    /// next process start simply logs in again.
    async fn persist(&self, token: &TokenSet) {
        if let Err(error) = self.store.write(token).await {
            let error: &dyn std::error::Error = &error;
            tracing::warn!(
                error,
                path = %self.store.path().display(),
                "failed to persist the renewed credential"
            );
        }
    }

    /// Tries to satisfy the first cycle from the persisted credential
    ///
    /// Returns `None` whenever the persisted credential is absent, unusable,
    /// or could not be renewed; the caller then falls back to an interactive
    /// login.
    async fn try_reuse_persisted(&self) -> Option<TokenSet> {
        let persisted = match self.store.read().await {
            Ok(token) => token,
            Err(error) => {
                let error: &dyn std::error::Error = &error;
                tracing::debug!(error, "no usable persisted credential");
                return None;
            }
        };

        if let Err(error) = persisted.validate_persisted() {
            let error: &dyn std::error::Error = &error;
            tracing::warn!(error, "discarding persisted credential");
            return None;
        }

        if !persisted.will_soon_expire(self.clock.now()) {
            tracing::debug!(
                expires_at = persisted.expires_at.0,
                "reusing persisted credential"
            );
            return Some(persisted);
        }

        // Validation guarantees the refresh token is present
        let refresh_token = persisted.refresh_token.clone()?;
        match self
            .endpoint
            .refresh_token_grant(&self.client_id, &refresh_token)
            .await
        {
            Ok(token) => {
                self.persist(&token).await;
                Some(token)
            }
            Err(error) => {
                let error: &dyn std::error::Error = &error;
                tracing::warn!(error, "could not renew the persisted credential");
                None
            }
        }
    }

    /// Renews with the refresh token captured from the previous cycle
    async fn renew(&self) -> Result<TokenSet, CredentialError> {
        let refresh_token = self
            .current_refresh_token
            .lock()
            .await
            .clone()
            .ok_or(CredentialError::MissingRefreshToken)?;

        let token = self
            .endpoint
            .refresh_token_grant(&self.client_id, &refresh_token)
            .await?;
        self.persist(&token).await;
        Ok(token)
    }

    /// Obtains a credential through the device authorization grant
    async fn login_with_device_authorization(&self) -> Result<TokenSet, CredentialError> {
        let authorization = self
            .endpoint
            .device_authorization(&self.client_id, &self.scope)
            .await?;

        let verification_uri = authorization
            .verification_uri_complete
            .as_deref()
            .unwrap_or(&authorization.verification_uri);

        tracing::info!(
            user_code = %authorization.user_code,
            verification_uri = %verification_uri,
            "open the verification URL in your browser to continue signing in"
        );
        if let Err(error) = open::that(verification_uri) {
            tracing::warn!(
                %error,
                verification_uri = %verification_uri,
                "could not open a browser, open the verification URL manually"
            );
        }

        let mut interval = authorization
            .interval
            .map(DurationSecs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let mut waited = DurationSecs(0);

        loop {
            if waited.0 + interval.0 > MAX_POLL_WAIT.0 {
                tracing::error!(waited = waited.0, "timed out waiting for verification");
                return Err(CredentialError::DeviceFlowTimeout {
                    waited_secs: waited.0,
                });
            }

            tokio::time::sleep(interval.into()).await;
            waited = DurationSecs(waited.0 + interval.0);

            match self
                .endpoint
                .poll_device_token(&self.client_id, &authorization.device_code)
                .await?
            {
                DevicePoll::Issued(token) => {
                    tracing::info!(waited = waited.0, "user verification completed");
                    self.persist(&token).await;
                    return Ok(token);
                }
                DevicePoll::Pending => {}
                DevicePoll::SlowDown => {
                    interval = DurationSecs(interval.0 + SLOW_DOWN_INCREMENT.0);
                }
            }
        }
    }
}

#[async_trait]
impl<E, C> RefreshSource<TokenSet> for HumanFederatedSource<E, C>
where
    E: TokenEndpoint,
    C: Clock + Send + Sync,
{
    async fn refresh(&self) -> Result<RefreshResult<TokenSet>, BoxError> {
        if self.first_run.load(Ordering::Acquire) {
            let token = match self.try_reuse_persisted().await {
                Some(token) => token,
                None => self.login_with_device_authorization().await?,
            };
            self.first_run.store(false, Ordering::Release);
            Ok(self.complete_cycle(token).await)
        } else {
            let token = self.renew().await?;
            Ok(self.complete_cycle(token).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use aliri_clock::UnixTime;

    use super::*;
    use crate::sources::oauth2::{DeviceAuthorization, TokenRequestError};
    use crate::tokens::BEARER_TOKEN_TYPE;
    use crate::{AccessToken, ClientIdRef, DeviceCode, DeviceCodeRef, IdToken, RefreshTokenRef, UserCode};

    #[derive(Clone, Copy, Debug)]
    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now(&self) -> UnixTime {
            UnixTime(self.0)
        }
    }

    fn token(tag: &str, expires_at: u64, expires_in: u64) -> TokenSet {
        TokenSet {
            access_token: AccessToken::from(format!("at-{}", tag)),
            id_token: Some(IdToken::from(format!("idt-{}", tag))),
            refresh_token: Some(RefreshToken::from(format!("rt-{}", tag))),
            token_type: BEARER_TOKEN_TYPE.to_owned(),
            expires_in: DurationSecs(expires_in),
            expires_at: UnixTime(expires_at),
        }
    }

    /// Scripted token endpoint recording every interaction
    #[derive(Debug, Default)]
    struct ScriptedEndpoint {
        device_authorizations: AtomicUsize,
        polls: AtomicUsize,
        poll_script: Mutex<VecDeque<DevicePoll>>,
        refresh_grants: Mutex<Vec<RefreshToken>>,
        refresh_response: Mutex<VecDeque<TokenSet>>,
        poll_interval: Option<u64>,
    }

    impl ScriptedEndpoint {
        fn with_polls(polls: Vec<DevicePoll>) -> Self {
            Self {
                poll_script: Mutex::new(polls.into_iter().collect()),
                ..Self::default()
            }
        }

        fn with_refresh_responses(responses: Vec<TokenSet>) -> Self {
            Self {
                refresh_response: Mutex::new(responses.into_iter().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TokenEndpoint for ScriptedEndpoint {
        async fn device_authorization(
            &self,
            _client_id: &ClientIdRef,
            _scope: &str,
        ) -> Result<DeviceAuthorization, TokenRequestError> {
            self.device_authorizations.fetch_add(1, Ordering::SeqCst);
            Ok(DeviceAuthorization {
                device_code: DeviceCode::from_static("dc-1"),
                user_code: UserCode::from_static("WDJB-MJHT"),
                verification_uri: "https://idaas.example.com/activate".to_owned(),
                verification_uri_complete: None,
                expires_in: DurationSecs(600),
                interval: self.poll_interval,
            })
        }

        async fn poll_device_token(
            &self,
            _client_id: &ClientIdRef,
            _device_code: &DeviceCodeRef,
        ) -> Result<DevicePoll, TokenRequestError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .poll_script
                .lock()
                .await
                .pop_front()
                .unwrap_or(DevicePoll::Pending))
        }

        async fn refresh_token_grant(
            &self,
            _client_id: &ClientIdRef,
            refresh_token: &RefreshTokenRef,
        ) -> Result<TokenSet, TokenRequestError> {
            self.refresh_grants
                .lock()
                .await
                .push(refresh_token.to_owned());
            Ok(self
                .refresh_response
                .lock()
                .await
                .pop_front()
                .expect("unexpected refresh grant"))
        }
    }

    fn source_in(
        dir: &tempfile::TempDir,
        endpoint: ScriptedEndpoint,
        now: u64,
    ) -> HumanFederatedSource<ScriptedEndpoint, FixedClock> {
        HumanFederatedSource::with_clock(
            endpoint,
            ClientId::from_static("app-42"),
            CredentialStore::at_path(dir.path().join("credential.json")),
            FixedClock(now),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_logs_in_with_device_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let issued = token("new", 10_000, 3600);
        let endpoint = ScriptedEndpoint::with_polls(vec![
            DevicePoll::Pending,
            DevicePoll::Pending,
            DevicePoll::Issued(issued),
        ]);
        let source = source_in(&dir, endpoint, 6_400);

        let result = source.refresh().await.unwrap();
        assert_eq!(result.value().access_token.as_str(), "at-new");
        assert_eq!(result.stale_at(), Some(UnixTime(10_000 - 720)));
        assert_eq!(result.prefetch_at(), Some(UnixTime(10_000 - 1200)));

        assert_eq!(source.endpoint.device_authorizations.load(Ordering::SeqCst), 1);
        assert_eq!(source.endpoint.polls.load(Ordering::SeqCst), 3);

        // The credential was persisted for the next process start
        let persisted = source.store.read().await.unwrap();
        assert_eq!(persisted.access_token.as_str(), "at-new");
    }

    #[tokio::test(start_paused = true)]
    async fn polling_gives_up_after_the_maximum_wait() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_in(&dir, ScriptedEndpoint::default(), 6_400);

        let error = source.refresh().await.unwrap_err();
        let error = error.downcast::<CredentialError>().unwrap();
        assert!(matches!(
            *error,
            CredentialError::DeviceFlowTimeout { waited_secs: 180 }
        ));

        // 180 seconds of waiting at the default five second interval
        assert_eq!(source.endpoint.polls.load(Ordering::SeqCst), 36);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_down_stretches_the_poll_interval() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = ScriptedEndpoint::with_polls(vec![DevicePoll::SlowDown]);
        let source = source_in(&dir, endpoint, 6_400);

        let error = source.refresh().await.unwrap_err();
        assert!(error.downcast_ref::<CredentialError>().is_some());

        // One poll at five seconds, then seventeen more at ten
        assert_eq!(source.endpoint.polls.load(Ordering::SeqCst), 18);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_persisted_credential_is_reused_without_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_in(&dir, ScriptedEndpoint::default(), 6_400);
        source.store.write(&token("old", 10_000, 3600)).await.unwrap();

        let result = source.refresh().await.unwrap();
        assert_eq!(result.value().access_token.as_str(), "at-old");

        assert_eq!(source.endpoint.device_authorizations.load(Ordering::SeqCst), 0);
        assert_eq!(source.endpoint.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn soon_expiring_persisted_credential_is_renewed() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint =
            ScriptedEndpoint::with_refresh_responses(vec![token("renewed", 13_600, 3600)]);
        // 100 seconds of lifetime left out of 3600 is inside the 15% window
        let source = source_in(&dir, endpoint, 9_900);
        source.store.write(&token("old", 10_000, 3600)).await.unwrap();

        let result = source.refresh().await.unwrap();
        assert_eq!(result.value().access_token.as_str(), "at-renewed");

        let grants = source.endpoint.refresh_grants.lock().await;
        assert_eq!(*grants, vec![RefreshToken::from_static("rt-old")]);
        drop(grants);

        let persisted = source.store.read().await.unwrap();
        assert_eq!(persisted.access_token.as_str(), "at-renewed");
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_persisted_credential_falls_back_to_device_login() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = ScriptedEndpoint::with_polls(vec![DevicePoll::Issued(token(
            "new", 10_000, 3600,
        ))]);
        let source = source_in(&dir, endpoint, 6_400);

        let mut unusable = token("old", 10_000, 3600);
        unusable.refresh_token = None;
        source.store.write(&unusable).await.unwrap();

        let result = source.refresh().await.unwrap();
        assert_eq!(result.value().access_token.as_str(), "at-new");
        assert_eq!(source.endpoint.device_authorizations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_state_renews_with_the_stashed_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut endpoint = ScriptedEndpoint::with_polls(vec![DevicePoll::Issued(token(
            "first", 10_000, 3600,
        ))]);
        endpoint.refresh_response = Mutex::new(
            vec![token("second", 13_600, 3600), token("third", 17_200, 3600)]
                .into_iter()
                .collect(),
        );
        let source = source_in(&dir, endpoint, 6_400);

        source.refresh().await.unwrap();
        source.refresh().await.unwrap();
        source.refresh().await.unwrap();

        // Each renewal presented the refresh token captured one cycle earlier
        let grants = source.endpoint.refresh_grants.lock().await;
        assert_eq!(
            *grants,
            vec![
                RefreshToken::from_static("rt-first"),
                RefreshToken::from_static("rt-second"),
            ]
        );
        drop(grants);

        // Device authorization happened exactly once, on the first cycle
        assert_eq!(source.endpoint.device_authorizations.load(Ordering::SeqCst), 1);

        let persisted = source.store.read().await.unwrap();
        assert_eq!(persisted.access_token.as_str(), "at-third");
    }
}
