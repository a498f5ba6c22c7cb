use thiserror::Error;

use crate::sources::oauth2::TokenRequestError;

/// Errors arising while obtaining or renewing a credential
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Device authorization polling exhausted its maximum wait
    #[error("gave up after {waited_secs}s waiting for device authorization to complete")]
    DeviceFlowTimeout {
        /// Total seconds spent polling before giving up
        waited_secs: u64,
    },

    /// The previous cycle produced no refresh token to renew with
    #[error("no refresh token is available to renew the credential")]
    MissingRefreshToken,

    /// A persisted credential failed shape validation
    #[error("persisted credential is not usable: {reason}")]
    InvalidPersistedCredential {
        /// Why the credential was rejected
        reason: String,
    },

    /// A token endpoint request failed
    #[error("token endpoint request failed")]
    TokenRequest(#[from] TokenRequestError),

    /// Reading or writing a persisted credential failed
    #[error("credential persistence failed")]
    Persistence(#[source] std::io::Error),
}
