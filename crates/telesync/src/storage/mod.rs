//! Local storage for telesync
//!
//! Everything the device owns lives in a single SQLite file:
//!
//! ```text
//! ~/.local/share/telesync/
//! └── <profile>/
//!     ├── credentials.json     # Bearer token for the remote store
//!     └── telesync.db          # ledger, feature_state, kv
//! ```
//!
//! The connection is shared behind a mutex; every operation is short and
//! synchronous, so holding it across an await point never happens.

mod ledger;
mod sync_db;

pub use ledger::Ledger;
pub use sync_db::SyncDb;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::db::models::{Feature, FeatureState};
use crate::error::{Result, SyncError};

/// Database file name inside a profile directory
pub const DB_FILENAME: &str = "telesync.db";

/// Shared handle to the sync database
pub type SharedDb = Arc<Mutex<SyncDb>>;

pub(crate) fn poisoned<T>(_: PoisonError<T>) -> SyncError {
    SyncError::database("Sync database lock poisoned")
}

/// Get the default storage path for a profile
pub fn default_storage_path(profile: &str) -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join(profile))
}

/// Storage manager owning the sync database
#[derive(Clone)]
pub struct Storage {
    db: SharedDb,
}

impl Storage {
    /// Open storage in a directory, creating it if needed
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            SyncError::database(format!("Failed to create storage directory: {}", e))
        })?;

        let db = SyncDb::open(base_path.join(DB_FILENAME))?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open in-memory storage (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Arc::new(Mutex::new(SyncDb::open_in_memory()?)),
        })
    }

    pub fn shared_db(&self) -> SharedDb {
        Arc::clone(&self.db)
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, SyncDb>> {
        self.db.lock().map_err(poisoned)
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.shared_db())
    }

    /// Sync state for a feature, creating a disabled row on first use
    pub fn feature_state(&self, feature: Feature, default_interval: Duration) -> Result<FeatureState> {
        let db = self.lock()?;
        match db.get_feature_state(feature)? {
            Some(state) => Ok(state),
            None => {
                let state = FeatureState::new(feature, default_interval);
                db.upsert_feature_state(&state)?;
                Ok(state)
            }
        }
    }

    pub fn save_feature_state(&self, state: &FeatureState) -> Result<()> {
        self.lock()?.upsert_feature_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_storage_open() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("default");
        Storage::open(&dir).unwrap();
        assert!(dir.join(DB_FILENAME).exists());
    }

    #[test]
    fn test_storage_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("default");

        {
            let storage = Storage::open(&path).unwrap();
            let mut state = storage
                .feature_state(Feature::Steps, Duration::from_secs(900))
                .unwrap();
            state.enabled = true;
            storage.save_feature_state(&state).unwrap();
        }

        let storage = Storage::open(&path).unwrap();
        let state = storage
            .feature_state(Feature::Steps, Duration::from_secs(60))
            .unwrap();
        assert!(state.enabled);
        assert_eq!(state.interval_secs, 900);
    }

    #[test]
    fn test_feature_state_defaults_to_disabled() {
        let storage = Storage::open_in_memory().unwrap();
        let state = storage
            .feature_state(Feature::Location, Duration::from_secs(1800))
            .unwrap();
        assert!(!state.enabled);
        assert!(!state.pending);
        assert_eq!(state.interval_secs, 1800);
    }
}
