//! Local persistence of credentials
//!
//! A credential store owns a single file holding one serialized [`TokenSet`].
//! The file location is resolved exactly once, at construction.

use std::{
    env,
    path::{Path, PathBuf},
};

use tokio::fs::OpenOptions;

use crate::config::ConfigError;
use crate::config::DATA_DIR_NAME;
use crate::error::CredentialError;
use crate::tokens::TokenSet;
use crate::{ClientIdRef, InstanceIdRef};

/// Environment variable overriding the human credential cache path
pub const CREDENTIAL_CACHE_PATH_ENV: &str = "IDAAS_HUMAN_CREDENTIAL_CACHE_PATH";

/// Reads and writes one persisted credential at a fixed path
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Resolves the store location for an identity instance and client pair
    ///
    /// The environment override is consulted here and never again.
    pub fn for_identity(
        instance_id: &InstanceIdRef,
        client_id: &ClientIdRef,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CREDENTIAL_CACHE_PATH_ENV) {
            if !path.is_empty() {
                return Ok(Self {
                    path: PathBuf::from(path),
                });
            }
        }

        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self {
            path: home.join(DATA_DIR_NAME).join(format!(
                "human_credential_{}_{}.json",
                instance_id, client_id
            )),
        })
    }

    /// Uses an explicit path, bypassing identity-based resolution
    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// The file this store reads and writes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted credential
    ///
    /// The credential is deserialized but not shape-validated; callers apply
    /// the validation appropriate to their use.
    pub async fn read(&self) -> Result<TokenSet, CredentialError> {
        use tokio::io::AsyncReadExt;

        let mut file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .await
            .map_err(CredentialError::Persistence)?;
        let mut data = String::new();
        file.read_to_string(&mut data)
            .await
            .map_err(CredentialError::Persistence)?;
        serde_json::from_str(&data).map_err(|error| CredentialError::InvalidPersistedCredential {
            reason: error.to_string(),
        })
    }

    /// Writes the credential, replacing any previous contents
    pub async fn write(&self, token: &TokenSet) -> Result<(), CredentialError> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(CredentialError::Persistence)?;
        }

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts
            .open(&self.path)
            .await
            .map_err(CredentialError::Persistence)?;
        let data = serde_json::to_string_pretty(token)
            .map_err(|error| CredentialError::Persistence(error.into()))?;
        file.write_all(data.as_bytes())
            .await
            .map_err(CredentialError::Persistence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::{DurationSecs, UnixTime};

    use super::*;
    use crate::tokens::BEARER_TOKEN_TYPE;
    use crate::{AccessToken, IdToken, RefreshToken};

    fn token() -> TokenSet {
        TokenSet {
            access_token: AccessToken::from_static("at-abc"),
            id_token: Some(IdToken::from_static("idt-abc")),
            refresh_token: Some(RefreshToken::from_static("rt-abc")),
            token_type: BEARER_TOKEN_TYPE.to_owned(),
            expires_in: DurationSecs(3600),
            expires_at: UnixTime(1_700_003_600),
        }
    }

    #[tokio::test]
    async fn written_credentials_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at_path(dir.path().join("credential.json"));

        store.write(&token()).await.unwrap();
        let read = store.read().await.unwrap();

        assert_eq!(read.access_token, token().access_token);
        assert_eq!(read.expires_at, UnixTime(1_700_003_600));
        assert!(read.validate_persisted().is_ok());
    }

    #[tokio::test]
    async fn a_missing_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at_path(dir.path().join("absent.json"));

        assert!(matches!(
            store.read().await,
            Err(CredentialError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn garbage_contents_are_an_invalid_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        tokio::fs::write(&path, "{ not a credential").await.unwrap();

        let store = CredentialStore::at_path(path);
        assert!(matches!(
            store.read().await,
            Err(CredentialError::InvalidPersistedCredential { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn credentials_are_written_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at_path(dir.path().join("credential.json"));
        store.write(&token()).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
