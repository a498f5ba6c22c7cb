//! A source backed by an externally provisioned credential file
//!
//! Some workloads receive their credential from outside the process, with an
//! agent or sidecar rotating the file contents. This source simply re-reads
//! the file on every refresh cycle and trusts the expiry recorded in it.

use async_trait::async_trait;
use idaas_cache::{BoxError, RefreshResult, RefreshSource};

use crate::persist::CredentialStore;
use crate::tokens::TokenSet;

/// A credential source that reads a file on every refresh
#[derive(Debug)]
pub struct FileTokenSource {
    store: CredentialStore,
}

impl FileTokenSource {
    /// Constructs a source reading the given file
    pub fn new(path: std::path::PathBuf) -> Self {
        Self {
            store: CredentialStore::at_path(path),
        }
    }
}

#[async_trait]
impl RefreshSource<TokenSet> for FileTokenSource {
    async fn refresh(&self) -> Result<RefreshResult<TokenSet>, BoxError> {
        let token = self.store.read().await?;
        // Externally rotated credentials need not be renewable by us, so only
        // the bearer shape is required
        token.validate_bearer()?;
        Ok(token.into_refresh_result())
    }
}
