use std::time::Duration;

use clap::Parser;
use idaas_cache::prefetch::PrefetchBudget;
use idaas_cache::StaleValueBehavior;
use idaas_tokens::sources::oauth2::HttpTokenEndpoint;
use idaas_tokens::sources::HumanFederatedSource;
use idaas_tokens::{ClientId, CredentialProvider, CredentialStore, InstanceId, ProviderOptions};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The authority's token endpoint
    #[arg(long, env)]
    token_url: reqwest::Url,

    /// The authority's device authorization endpoint
    #[arg(long, env)]
    device_authorization_url: reqwest::Url,

    /// The client ID used for interactive login
    #[arg(long, env)]
    client_id: String,

    /// The identity instance this login belongs to
    #[arg(long, env)]
    instance_id: String,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let endpoint = HttpTokenEndpoint::new(
        reqwest::Client::new(),
        opts.token_url,
        Some(opts.device_authorization_url),
    );

    let client_id = ClientId::from(opts.client_id);
    let store =
        CredentialStore::for_identity(&InstanceId::from(opts.instance_id), &client_id)?;
    tracing::info!(path = %store.path().display(), "using local credential cache");

    let source = HumanFederatedSource::new(endpoint, client_id, store);

    let budget = PrefetchBudget::default();
    let provider = CredentialProvider::new(
        source,
        ProviderOptions {
            async_credential_update: true,
            stale_value_behavior: StaleValueBehavior::AllowStale,
            ..ProviderOptions::default()
        },
        &budget,
    );

    // The first acquisition may walk through an interactive login
    provider.warm_up().await?;

    let mut interval = time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;

        match provider.get().await {
            Ok(token) => {
                tracing::info!(
                    token_type = %token.token_type,
                    expires_at = token.expires_at.0,
                    "credential available"
                );
            }
            Err(error) => {
                let error: &dyn std::error::Error = &error;
                tracing::error!(error, "credential unavailable");
            }
        }
    }
}
