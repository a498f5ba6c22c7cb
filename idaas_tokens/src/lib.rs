//! Client-side credential management for an IDaaS identity platform
//!
//! This library obtains, caches, and autonomously renews the short-lived
//! credentials an application presents to the identity platform's relying
//! services. Renewal mechanics live in [`idaas_cache`]; this crate supplies
//! the credential types, the token endpoint boundary, local persistence, and
//! the refresh functions for the supported acquisition styles.
//!
//! # General flow (interactive login)
//!
//! A [`sources::HumanFederatedSource`] signs a human operator in. The first
//! acquisition in a process reuses the credential persisted by an earlier
//! run when one is still healthy; otherwise it walks the operator through a
//! device-code verification in their browser. Every acquisition after that
//! renews silently with the refresh token captured one cycle earlier, and
//! every success is persisted so the next process start does not have to
//! bother the operator again.
//!
//! Wrap the source in a [`CredentialProvider`] to get caching, background
//! renewal, and jittered renewal deadlines:
//!
//! ```no_run
//! use idaas_cache::prefetch::PrefetchBudget;
//! use idaas_tokens::sources::oauth2::HttpTokenEndpoint;
//! use idaas_tokens::sources::HumanFederatedSource;
//! use idaas_tokens::{ClientId, CredentialProvider, CredentialStore, InstanceId, ProviderOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = HttpTokenEndpoint::new(
//!     reqwest::Client::new(),
//!     reqwest::Url::parse("https://idaas.example.com/oauth2/token")?,
//!     Some(reqwest::Url::parse("https://idaas.example.com/oauth2/device")?),
//! );
//!
//! let client_id = ClientId::from_static("app-42");
//! let store = CredentialStore::for_identity(&InstanceId::from_static("idaas-eu-1"), &client_id)?;
//! let source = HumanFederatedSource::new(endpoint, client_id, store);
//!
//! let budget = PrefetchBudget::default();
//! let provider = CredentialProvider::new(source, ProviderOptions::default(), &budget);
//!
//! provider.warm_up().await?;
//! let access_token = provider.access_token().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Non-interactive workloads use the simpler sources instead:
//! [`sources::FileTokenSource`] for credentials rotated into a file by an
//! outside agent, or [`sources::StaticTokenSource`] for a fixed credential.

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

pub mod config;
pub mod sources;

mod braids;
mod error;
mod persist;
mod provider;
mod tokens;

pub use braids::*;
pub use config::{ClientConfig, ConfigError, ProviderOptions};
pub use error::CredentialError;
pub use persist::{CredentialStore, CREDENTIAL_CACHE_PATH_ENV};
pub use provider::CredentialProvider;
pub use tokens::{TokenSet, BEARER_TOKEN_TYPE};
