//! Single best-effort push of a ledger entry to the remote store

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::SessionCache;
use crate::client::{AuthToken, RemoteStoreClient};
use crate::config::CredentialStore;
use crate::db::models::{Feature, FeatureSettings, LedgerEntry};
use crate::error::SyncError;

/// Why a push did not land
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Transient; the scheduler tries again on its next trigger
    #[error("network error: {0}")]
    Network(String),

    /// Credentials were rejected; needs the user to sign in again
    #[error("authentication error: {0}")]
    Auth(String),

    /// Nobody is signed in; there is nothing to push to
    #[error("not signed in")]
    NotSignedIn,
}

impl PushError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PushError::Network(_))
    }
}

impl From<SyncError> for PushError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Authentication(msg) => PushError::Auth(msg),
            SyncError::NotAuthenticated => PushError::NotSignedIn,
            other => PushError::Network(other.to_string()),
        }
    }
}

/// Pushes ledger entries upstream. One request per call and no retry loop.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn push(&self, entry: &LedgerEntry) -> Result<(), PushError>;
}

/// [`Uploader`] writing to the remote key-value store
pub struct RemoteUploader {
    client: RemoteStoreClient,
    credentials: Arc<CredentialStore>,
    cache: Arc<SessionCache>,
}

impl RemoteUploader {
    pub fn new(
        client: RemoteStoreClient,
        credentials: Arc<CredentialStore>,
        cache: Arc<SessionCache>,
    ) -> Self {
        Self {
            client,
            credentials,
            cache,
        }
    }

    /// Token for the current session, from the cache or the credential store
    fn token(&self) -> Result<AuthToken, PushError> {
        let token = match self.cache.token() {
            Some(token) => token,
            None => {
                let token = self
                    .credentials
                    .load_token()
                    .map_err(|e| PushError::Auth(format!("stored credentials unreadable: {}", e)))?
                    .ok_or(PushError::NotSignedIn)?;
                self.cache.set_token(token.clone());
                token
            }
        };

        if token.is_expired() {
            self.cache.clear();
            return Err(PushError::Auth("stored token has expired".to_string()));
        }
        Ok(token)
    }

    fn on_error(&self, err: SyncError) -> PushError {
        let err = PushError::from(err);
        if matches!(err, PushError::Auth(_)) {
            self.cache.clear();
        }
        err
    }

    /// Mirror a feature's settings to `{feature}_settings/{uid}`
    pub async fn push_settings(
        &self,
        feature: Feature,
        settings: FeatureSettings,
    ) -> Result<(), PushError> {
        let token = self.token()?;
        let path = RemoteStoreClient::settings_path(feature, &token.uid);
        self.client
            .put_json(&token, &path, &settings)
            .await
            .map_err(|e| self.on_error(e))
    }

    /// Read a feature's settings from the remote store, if any were written
    pub async fn fetch_settings(
        &self,
        feature: Feature,
    ) -> Result<Option<FeatureSettings>, PushError> {
        let token = self.token()?;
        let path = RemoteStoreClient::settings_path(feature, &token.uid);
        self.client
            .get_json::<Option<FeatureSettings>>(&token, &path)
            .await
            .map_err(|e| self.on_error(e))
    }
}

#[async_trait]
impl Uploader for RemoteUploader {
    async fn push(&self, entry: &LedgerEntry) -> Result<(), PushError> {
        let token = self.token()?;
        let path = RemoteStoreClient::entry_path(&token.uid, entry.feature, entry.day_key);

        match self.client.put_json(&token, &path, &entry.remote_value()).await {
            Ok(()) => {
                debug!(feature = %entry.feature, day = %entry.day_key, "entry pushed");
                Ok(())
            }
            Err(e) => {
                let err = self.on_error(e);
                warn!(feature = %entry.feature, day = %entry.day_key, error = %err, "push failed");
                Err(err)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_error_classification() {
        assert_eq!(
            PushError::from(SyncError::auth("rejected")),
            PushError::Auth("rejected".to_string())
        );
        assert_eq!(
            PushError::from(SyncError::NotAuthenticated),
            PushError::NotSignedIn
        );
        assert!(PushError::from(SyncError::Remote {
            status: 503,
            message: "down".to_string()
        })
        .is_transient());
        assert!(!PushError::Auth("x".to_string()).is_transient());
        assert!(!PushError::NotSignedIn.is_transient());
    }
}
