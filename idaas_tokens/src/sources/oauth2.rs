//! The token endpoint boundary
//!
//! The credential layer talks to its authorization server through the
//! [`TokenEndpoint`] capability rather than a concrete transport. The
//! provided [`HttpTokenEndpoint`] exchanges form-encoded grants over HTTPS;
//! tests substitute scripted implementations.

use aliri_clock::{Clock, System};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ClientConfig, ConfigError};
use crate::tokens::TokenSet;
use crate::{ClientIdRef, DeviceCodeRef, RefreshTokenRef};

pub mod dto;

pub use dto::DeviceAuthorization;

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const REFRESH_TOKEN_GRANT_TYPE: &str = "refresh_token";

const AUTHORIZATION_PENDING: &str = "authorization_pending";
const SLOW_DOWN: &str = "slow_down";

/// The outcome of one device-code poll
#[derive(Debug)]
pub enum DevicePoll {
    /// The user completed verification and a credential was issued
    Issued(TokenSet),
    /// The user has not completed verification yet
    Pending,
    /// The server asked the client to poll less often
    SlowDown,
}

/// An error while attempting a token endpoint request
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The endpoint answered with an error status and body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the response body
    #[error("error deserializing response from authority")]
    BodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(reqwest::Error),
    /// Unable to send the request to the authority
    #[error("error sending request to authority")]
    RequestSend(reqwest::Error),
    /// The operation requires a device authorization endpoint and none is
    /// configured
    #[error("no device authorization endpoint is configured")]
    DeviceAuthorizationUnsupported,
}

/// The authorization-server operations the credential layer depends on
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Begins a device authorization for the given client and scope
    async fn device_authorization(
        &self,
        client_id: &ClientIdRef,
        scope: &str,
    ) -> Result<DeviceAuthorization, TokenRequestError>;

    /// Polls for completion of an outstanding device authorization
    async fn poll_device_token(
        &self,
        client_id: &ClientIdRef,
        device_code: &DeviceCodeRef,
    ) -> Result<DevicePoll, TokenRequestError>;

    /// Renews a credential through the refresh token grant
    async fn refresh_token_grant(
        &self,
        client_id: &ClientIdRef,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenSet, TokenRequestError>;
}

/// A [`TokenEndpoint`] backed by an OAuth2 authorization server over HTTP
#[derive(Clone, Debug)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: reqwest::Url,
    device_authorization_url: Option<reqwest::Url>,
}

impl HttpTokenEndpoint {
    /// Constructs an endpoint from its URLs
    ///
    /// The device authorization URL may be omitted when interactive login is
    /// not in use.
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        device_authorization_url: Option<reqwest::Url>,
    ) -> Self {
        Self {
            client,
            token_url,
            device_authorization_url,
        }
    }

    /// Constructs an endpoint from validated client configuration
    pub fn from_config(
        client: reqwest::Client,
        config: &ClientConfig,
    ) -> Result<Self, ConfigError> {
        let token_url = reqwest::Url::parse(&config.token_endpoint).map_err(|error| {
            ConfigError::InvalidEndpoint {
                name: "token_endpoint",
                reason: error.to_string(),
            }
        })?;

        let device_authorization_url = config
            .device_authorization_endpoint
            .as_deref()
            .map(|endpoint| {
                reqwest::Url::parse(endpoint).map_err(|error| ConfigError::InvalidEndpoint {
                    name: "device_authorization_endpoint",
                    reason: error.to_string(),
                })
            })
            .transpose()?;

        Ok(Self::new(client, token_url, device_authorization_url))
    }

    async fn post_form<P: Serialize + ?Sized>(
        &self,
        url: reqwest::Url,
        payload: &P,
    ) -> Result<reqwest::Response, TokenRequestError> {
        self.client
            .post(url)
            .form(payload)
            .send()
            .await
            .map_err(TokenRequestError::RequestSend)
    }
}

async fn parse_success<R: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<R, TokenRequestError> {
    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }
    let body = resp.bytes().await.map_err(TokenRequestError::BodyReadError)?;
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    #[tracing::instrument(err, skip(self, scope), fields(token_url = %self.token_url))]
    async fn device_authorization(
        &self,
        client_id: &ClientIdRef,
        scope: &str,
    ) -> Result<DeviceAuthorization, TokenRequestError> {
        let url = self
            .device_authorization_url
            .clone()
            .ok_or(TokenRequestError::DeviceAuthorizationUnsupported)?;

        let payload = dto::DeviceAuthorizationRequest { client_id, scope };
        let resp = self.post_form(url, &payload).await?;
        let authorization: DeviceAuthorization = parse_success(resp).await?;

        tracing::debug!(
            interval = authorization.interval,
            expires_in = authorization.expires_in.0,
            "device authorization started"
        );

        Ok(authorization)
    }

    async fn poll_device_token(
        &self,
        client_id: &ClientIdRef,
        device_code: &DeviceCodeRef,
    ) -> Result<DevicePoll, TokenRequestError> {
        let payload = dto::DeviceTokenRequest {
            grant_type: DEVICE_CODE_GRANT_TYPE,
            client_id,
            device_code,
        };

        let resp = self.post_form(self.token_url.clone(), &payload).await?;

        if let Err(error) = resp.error_for_status_ref() {
            let body = resp
                .text()
                .await
                .map_err(TokenRequestError::BodyReadError)?;
            if let Ok(not_ready) = serde_json::from_str::<dto::ErrorResponse>(&body) {
                match not_ready.error.as_str() {
                    AUTHORIZATION_PENDING => return Ok(DevicePoll::Pending),
                    SLOW_DOWN => return Ok(DevicePoll::SlowDown),
                    _ => {
                        tracing::debug!(
                            error_code = %not_ready.error,
                            error_description = not_ready.error_description.as_deref(),
                            "device authorization rejected"
                        );
                    }
                }
            }
            return Err(TokenRequestError::ErrorWithBody {
                source: error,
                body,
            });
        }

        let body = resp.bytes().await.map_err(TokenRequestError::BodyReadError)?;
        let token: dto::TokenResponse = serde_json::from_slice(&body)?;
        Ok(DevicePoll::Issued(token.into_token_set(System.now())))
    }

    #[tracing::instrument(err, skip(self, refresh_token), fields(token_url = %self.token_url))]
    async fn refresh_token_grant(
        &self,
        client_id: &ClientIdRef,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenSet, TokenRequestError> {
        let payload = dto::RefreshTokenRequest {
            grant_type: REFRESH_TOKEN_GRANT_TYPE,
            client_id,
            refresh_token,
        };

        let resp = self.post_form(self.token_url.clone(), &payload).await?;
        let token: dto::TokenResponse = parse_success(resp).await?;
        let token = token.into_token_set(System.now());

        tracing::info!(
            has_refresh_token = token.refresh_token.is_some(),
            lifetime = token.expires_in.0,
            expires_at = token.expires_at.0,
            "credential renewed"
        );

        Ok(token)
    }
}
