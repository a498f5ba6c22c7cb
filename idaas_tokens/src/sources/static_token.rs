//! A fixed credential source

use async_trait::async_trait;
use idaas_cache::{BoxError, RefreshResult, RefreshSource};

use crate::tokens::TokenSet;

/// A source that always supplies the same credential
///
/// The supplied result carries no deadlines, so a cache holding it never
/// considers it stale and never refreshes it again.
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
    token: TokenSet,
}

impl StaticTokenSource {
    /// Wraps a fixed credential
    pub fn new(token: TokenSet) -> Self {
        Self { token }
    }
}

#[async_trait]
impl RefreshSource<TokenSet> for StaticTokenSource {
    async fn refresh(&self) -> Result<RefreshResult<TokenSet>, BoxError> {
        Ok(RefreshResult::permanent(self.token.clone()))
    }
}
