use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::types::TokenRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize token record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Single-record token cache backed by a JSON file.
///
/// Pure persistence: no validity checks, no network.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record. A missing or unreadable file is `None`.
    pub fn load(&self) -> Option<TokenRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read token cache");
                return None;
            },
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt token cache");
                None
            },
        }
    }

    /// Replace the persisted record.
    ///
    /// Writes a sibling temp file and renames it over the target, so a
    /// concurrent `load` sees either the old or the new record.
    pub fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_err(&dir, e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tokens.json".into());
        let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = write_private(&tmp, &json)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| self.io_err(&self.path, e));
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result?;

        debug!(path = %self.path.display(), "token cache saved");
        Ok(())
    }

    /// Remove the persisted record. Clearing an empty store is not an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "token cache cleared");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(&self.path, e)),
        }
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write `bytes` to a new file readable only by the owner.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::BTreeSet};

    fn record() -> TokenRecord {
        TokenRecord {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at: 1_700_000_000,
            scopes: BTreeSet::from(["Mail.Read".to_string(), "User.Read".to_string()]),
        }
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("tokens.json"));
        store.save(&record()).unwrap();
        assert_eq!(store.load(), Some(record()));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("absent.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_corrupt_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tokens.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(TokenStore::new(&path).load().is_none());
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("tokens.json"));
        store.save(&record()).unwrap();

        let mut updated = record();
        updated.access_token = "access-2".into();
        updated.refresh_token = None;
        store.save(&updated).unwrap();

        assert_eq!(store.load(), Some(updated));
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("nested/dir/tokens.json"));
        store.save(&record()).unwrap();
        assert!(store.load().is_some());
    }

    #[test]
    fn test_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("tokens.json"));
        store.save(&record()).unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("tokens.json"));
        store.save(&record()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
