//! DTOs for the token and device authorization endpoints

use aliri_clock::{DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use crate::tokens::TokenSet;
use crate::{ClientIdRef, DeviceCode, DeviceCodeRef, RefreshTokenRef, UserCode};

/// A device authorization grant awaiting user verification
///
/// Transient; lives only for the duration of one login attempt.
#[derive(Debug, Deserialize)]
pub struct DeviceAuthorization {
    /// The opaque code the client polls with
    pub device_code: DeviceCode,

    /// The short code the user enters on the verification page
    pub user_code: UserCode,

    /// Where the user completes verification
    pub verification_uri: String,

    /// Verification URI with the user code already filled in, when offered
    #[serde(default)]
    pub verification_uri_complete: Option<String>,

    /// How long this authorization remains valid
    pub expires_in: DurationSecs,

    /// The server-requested poll interval in seconds
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(super) struct DeviceAuthorizationRequest<'a> {
    pub client_id: &'a ClientIdRef,
    pub scope: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct DeviceTokenRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a ClientIdRef,
    pub device_code: &'a DeviceCodeRef,
}

#[derive(Debug, Serialize)]
pub(super) struct RefreshTokenRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a ClientIdRef,
    pub refresh_token: &'a RefreshTokenRef,
}

/// The token endpoint's success body
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: crate::AccessToken,
    #[serde(default)]
    pub id_token: Option<crate::IdToken>,
    #[serde(default)]
    pub refresh_token: Option<crate::RefreshToken>,
    pub token_type: String,
    pub expires_in: DurationSecs,
    #[serde(default)]
    pub expires_at: Option<UnixTime>,
}

impl TokenResponse {
    /// Converts the wire response into a credential set
    ///
    /// Authorities that do not report an absolute expiry get one computed
    /// from the granted lifetime.
    pub(super) fn into_token_set(self, now: UnixTime) -> TokenSet {
        let expires_at = self.expires_at.unwrap_or(now + self.expires_in);
        TokenSet {
            access_token: self.access_token,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_in: self.expires_in,
            expires_at,
        }
    }
}

/// The token endpoint's error body
#[derive(Debug, Deserialize)]
pub(super) struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
