//! Per-profile token file

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::client::AuthToken;
use crate::error::Result;

const TOKEN_FILENAME: &str = "credentials.json";

/// The signed-in token of one profile, kept as an owner-only JSON file
pub struct CredentialStore {
    profile: String,
    dir: PathBuf,
}

impl CredentialStore {
    /// Store for `profile` (or "default") under the platform data directory
    pub fn new(profile: Option<String>) -> Result<Self> {
        let profile = profile.unwrap_or_else(|| "default".to_string());
        Self::with_dir(profile, super::data_dir()?)
    }

    /// Store rooted at `base_dir` instead of the data directory
    pub fn with_dir(profile: impl Into<String>, base_dir: PathBuf) -> Result<Self> {
        let profile = profile.into();
        let dir = base_dir.join(&profile);
        super::ensure_dir(&dir)?;
        Ok(Self { profile, dir })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILENAME)
    }

    pub fn save_token(&self, token: &AuthToken) -> Result<()> {
        write_private(&self.token_path(), &serde_json::to_vec_pretty(token)?)
    }

    /// `None` when nobody has signed in on this profile
    pub fn load_token(&self) -> Result<Option<AuthToken>> {
        match fs::read(self.token_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.token_path().is_file()
    }

    /// Forget the token. A profile that never signed in clears fine.
    pub fn clear(&self) -> Result<()> {
        remove_if_present(&self.token_path())
    }
}

/// Replace `path` with `contents`, readable by the owner only.
///
/// The bytes land in a sibling temp file that is renamed over `path`, so
/// readers see either the old token or the new one.
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let staging = path.with_extension("tmp");
    remove_if_present(&staging)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&staging)?;
    file.write_all(contents)?;
    file.sync_all()?;
    fs::rename(&staging, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CredentialStore {
        CredentialStore::with_dir("test_profile", dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_profile_gets_own_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        assert_eq!(store.profile(), "test_profile");
        assert!(temp_dir.path().join("test_profile").is_dir());
    }

    #[test]
    fn test_save_and_load_token() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let token = AuthToken::new("uid-42", "secret").expiring_in(3600);
        store.save_token(&token).unwrap();
        assert_eq!(store.load_token().unwrap(), Some(token));

        // Signing in again replaces the token without leaving the staging file
        let next = AuthToken::new("uid-42", "rotated");
        store.save_token(&next).unwrap();
        assert_eq!(store.load_token().unwrap(), Some(next));
        assert!(!store.token_path().with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_token() {
        let temp_dir = TempDir::new().unwrap();
        assert!(store(&temp_dir).load_token().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_token_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        fs::write(store.token_path(), "{not json").unwrap();

        assert!(store.load_token().is_err());
    }

    #[test]
    fn test_has_credentials_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        assert!(!store.has_credentials());
        store.save_token(&AuthToken::new("uid", "t")).unwrap();
        assert!(store.has_credentials());

        store.clear().unwrap();
        assert!(!store.has_credentials());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        // A stale staging file from an interrupted save must not leak its mode
        fs::write(store.token_path().with_extension("tmp"), "old").unwrap();
        store.save_token(&AuthToken::new("uid", "t")).unwrap();

        let mode = fs::metadata(store.token_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
