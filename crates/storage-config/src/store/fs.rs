//! Filesystem slot: one file per entry, replaced through a synced temp file.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ConfigStorage, DEFAULT_CONFIG_ENTRY};
use crate::error::StoreError;

/// Filesystem-backed store writing one file per entry under `root`.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    entry: String,
    path: PathBuf,
}

impl FsConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_entry(root, DEFAULT_CONFIG_ENTRY)
    }

    pub fn with_entry(root: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        let entry = entry.into();
        let path = root.into().join(file_name(&entry));
        Self { entry, path }
    }

    /// Location of the blob on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling the next blob is staged in before it is renamed into place.
    pub fn staging_path(&self) -> PathBuf {
        let mut staging = OsString::from(self.path.as_os_str());
        staging.push(".tmp");
        PathBuf::from(staging)
    }

    fn read_blocking(path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn replace_blocking(path: &Path, staging: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(staging)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(staging, path)
    }
}

/// Single path component for `entry`. Bytes outside `[A-Za-z0-9._-]` are
/// percent-encoded, as is a leading dot, so no entry maps to `.`, `..` or a
/// hidden file.
fn file_name(entry: &str) -> String {
    let mut name = String::with_capacity(entry.len());
    for (i, b) in entry.bytes().enumerate() {
        let keep = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_') || (b == b'.' && i > 0);
        if keep {
            name.push(char::from(b));
        } else {
            name.push_str(&format!("%{b:02X}"));
        }
    }
    name
}

#[async_trait]
impl ConfigStorage for FsConfigStore {
    async fn get(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read_blocking(&path))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.path.display())))
    }

    async fn put(&self, blob: &[u8]) -> Result<(), StoreError> {
        let path = self.path.clone();
        let staging = self.staging_path();
        let bytes = blob.to_vec();
        tokio::task::spawn_blocking(move || Self::replace_blocking(&path, &staging, &bytes))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.path.display())))?;
        debug!(entry = %self.entry, bytes = blob.len(), "persisted configuration blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_are_encoded_into_one_component() {
        let store = FsConfigStore::with_entry("/var/lib/dpe", "mount-a/config/transform");
        assert_eq!(
            store.path(),
            Path::new("/var/lib/dpe/mount-a%2Fconfig%2Ftransform")
        );
    }

    #[test]
    fn dot_entries_stay_under_the_root() {
        for (entry, name) in [
            ("..", "%2E."),
            (".", "%2E"),
            ("../config", "%2E.%2Fconfig"),
            (".hidden", "%2Ehidden"),
        ] {
            let store = FsConfigStore::with_entry("/var/lib/dpe", entry);
            assert_eq!(store.path(), Path::new("/var/lib/dpe").join(name), "{entry}");
            assert_eq!(store.path().parent(), Some(Path::new("/var/lib/dpe")));
        }
    }

    #[test]
    fn inner_dots_and_non_ascii_bytes() {
        assert_eq!(file_name("config.v2"), "config.v2");
        assert_eq!(file_name("clé"), "cl%C3%A9");
        assert_eq!(file_name("a b"), "a%20b");
    }

    #[test]
    fn staging_file_is_a_sibling() {
        let store = FsConfigStore::with_entry("/var/lib/dpe", "config.json");
        assert_eq!(
            store.staging_path(),
            Path::new("/var/lib/dpe/config.json.tmp")
        );
    }
}
