use aliri_braid::braid;
use std::fmt;

/// Masks a credential-bearing type's contents in all printed output
macro_rules! redacted {
    ($ty:ty: $hidden:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }
    };
}

/// An OAuth2 client identifier
#[braid(serde)]
pub struct ClientId;

/// An identifier for an IDaaS identity instance
#[braid(serde)]
pub struct InstanceId;

/// An access token issued by the identity platform
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef: "ACCESS TOKEN");

/// An OIDC ID token
#[braid(serde)]
pub struct IdToken;

/// A refresh token held back for renewing a credential
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef: "REFRESH TOKEN");

/// The opaque code a client polls with during device authorization
#[braid(serde, debug = "owned", display = "owned")]
pub struct DeviceCode;

redacted!(DeviceCodeRef: "DEVICE CODE");

/// The short code a user enters on the verification page
#[braid(serde)]
pub struct UserCode;
