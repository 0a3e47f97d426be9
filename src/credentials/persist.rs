//! Durable storage for the credential pair.
//!
//! The store only needs load/save/erase; [`TokenFile`] keeps the pair in a
//! small JSON document next to the rest of the user's configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use super::store::CredentialPair;

/// Backing storage for a [`super::CredentialStore`]. Calls are synchronous
/// and expected to be fast.
pub trait CredentialPersistence: Send + Sync {
    fn load(&self) -> io::Result<Option<CredentialPair>>;
    fn save(&self, pair: &CredentialPair) -> io::Result<()>;
    fn erase(&self) -> io::Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTokens {
    access: String,
    refresh: String,
    saved_at: DateTime<Utc>,
}

/// JSON file holding the current pair.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/dashlink/credentials.json`, when the platform has a
    /// config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dashlink").join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the pair on disk was written, if there is one.
    pub fn saved_at(&self) -> io::Result<Option<DateTime<Utc>>> {
        Ok(self.read()?.map(|stored| stored.saved_at))
    }

    fn read(&self) -> io::Result<Option<StoredTokens>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let stored: StoredTokens = serde_json::from_str(&content)?;
        Ok(Some(stored))
    }

    fn write_private(path: &Path, content: &str) -> io::Result<()> {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        // `mode` only applies on create; a leftover file keeps its old bits
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(content.as_bytes())?;
        file.sync_all()
    }
}

impl CredentialPersistence for TokenFile {
    fn load(&self) -> io::Result<Option<CredentialPair>> {
        Ok(self
            .read()?
            .map(|stored| CredentialPair::new(stored.access, stored.refresh)))
    }

    fn save(&self, pair: &CredentialPair) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredTokens {
            access: pair.access.clone(),
            refresh: pair.refresh.clone(),
            saved_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&stored)?;

        // Write beside the target, then rename, so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        Self::write_private(&tmp, &content)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn erase(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialStore;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path().join("credentials.json"));
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path().join("nested/credentials.json"));
        file.save(&CredentialPair::new("A1", "R1")).unwrap();

        assert_eq!(file.load().unwrap(), Some(CredentialPair::new("A1", "R1")));
        assert!(file.saved_at().unwrap().is_some());
        assert!(!dir.path().join("nested/credentials.json.tmp").exists());
    }

    #[test]
    fn test_erase_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path().join("credentials.json"));
        file.save(&CredentialPair::new("A1", "R1")).unwrap();
        file.erase().unwrap();
        file.erase().unwrap();
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();
        let err = TokenFile::new(&path).load().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path().join("credentials.json"));
        file.save(&CredentialPair::new("A1", "R1")).unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_leftover_temp_file_does_not_widen_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let tmp = dir.path().join("credentials.json.tmp");
        std::fs::write(&tmp, "stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        let file = TokenFile::new(&path);
        file.save(&CredentialPair::new("A1", "R1")).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(file.load().unwrap(), Some(CredentialPair::new("A1", "R1")));
    }

    #[test]
    fn test_store_writes_through_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::with_persistence(TokenFile::new(&path));
        assert!(!store.is_authenticated());
        store.set_pair("A1", "R1");

        let reopened = CredentialStore::with_persistence(TokenFile::new(&path));
        assert_eq!(reopened.access().as_deref(), Some("A1"));
        assert!(reopened.session_state().is_authenticated());

        reopened.clear();
        assert!(!path.exists());
    }

    #[test]
    fn test_store_survives_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{").unwrap();
        let store = CredentialStore::with_persistence(TokenFile::new(&path));
        assert!(!store.is_authenticated());
    }
}
