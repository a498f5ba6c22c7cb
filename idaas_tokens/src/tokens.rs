use aliri_clock::{DurationSecs, UnixTime};
use idaas_cache::RefreshResult;
use serde::{Deserialize, Serialize};

use crate::{AccessToken, IdToken, RefreshToken};
use crate::error::CredentialError;

/// The token type tag expected on every usable credential
pub const BEARER_TOKEN_TYPE: &str = "Bearer";

/// The fraction of a credential's lifetime below which it is renewed rather
/// than reused from local persistence
const SOON_EXPIRING_FRACTION: f64 = 0.15;

/// A credential set as issued by the identity platform
///
/// The field layout matches the token endpoint's wire format, which is also
/// the format persisted to the local credential cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenSet {
    /// The access token presented to relying services
    pub access_token: AccessToken,

    /// The OIDC ID token, when the requested scope produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,

    /// The refresh token used to renew this credential without the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,

    /// The token type tag, `Bearer` for usable credentials
    pub token_type: String,

    /// The lifetime granted at issuance
    pub expires_in: DurationSecs,

    /// The absolute expiry as unix time
    pub expires_at: UnixTime,
}

impl TokenSet {
    /// Whether the remaining lifetime has dropped below 15% of the total
    pub fn will_soon_expire(&self, now: UnixTime) -> bool {
        let remaining = self.expires_at.0.saturating_sub(now.0);
        (self.expires_in.0 as f64) * SOON_EXPIRING_FRACTION > remaining as f64
    }

    /// The renewal deadlines derived from this credential's lifetime
    ///
    /// The credential goes stale once 80% of its lifetime has elapsed and
    /// becomes eligible for look-ahead renewal at roughly 67%, both measured
    /// back from the absolute expiry.
    pub fn renewal_deadlines(&self) -> (UnixTime, UnixTime) {
        let stale_at = UnixTime(self.expires_at.0.saturating_sub(self.expires_in.0 / 5));
        let prefetch_at = UnixTime(self.expires_at.0.saturating_sub(self.expires_in.0 / 3));
        (stale_at, prefetch_at)
    }

    /// Packages this credential as a refresh result carrying its deadlines
    pub fn into_refresh_result(self) -> RefreshResult<TokenSet> {
        let (stale_at, prefetch_at) = self.renewal_deadlines();
        RefreshResult::new(self, Some(stale_at), Some(prefetch_at))
    }

    /// Checks that the credential carries a usable bearer token
    pub fn validate_bearer(&self) -> Result<(), CredentialError> {
        if self.token_type != BEARER_TOKEN_TYPE {
            return Err(CredentialError::InvalidPersistedCredential {
                reason: format!("unexpected token type `{}`", self.token_type),
            });
        }
        if self.access_token.as_str().is_empty() {
            return Err(CredentialError::InvalidPersistedCredential {
                reason: "access token is empty".to_owned(),
            });
        }
        Ok(())
    }

    /// Checks the full shape required of a locally persisted credential
    ///
    /// A persisted credential is only worth reusing if it can also be
    /// renewed, so the refresh and ID tokens are required in addition to the
    /// bearer access token.
    pub fn validate_persisted(&self) -> Result<(), CredentialError> {
        self.validate_bearer()?;
        if self.id_token.is_none() {
            return Err(CredentialError::InvalidPersistedCredential {
                reason: "id token is missing".to_owned(),
            });
        }
        if self.refresh_token.is_none() {
            return Err(CredentialError::InvalidPersistedCredential {
                reason: "refresh token is missing".to_owned(),
            });
        }
        Ok(())
    }
}
