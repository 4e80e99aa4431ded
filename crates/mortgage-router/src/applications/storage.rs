use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use super::domain::StorageKey;

/// Blob storage for uploaded documents, addressed only by generated [`StorageKey`]s.
pub trait DocumentStorage: Send + Sync {
    /// Store `bytes` under a fresh key. Never overwrites.
    fn put(&self, key: &StorageKey, bytes: &[u8]) -> Result<(), StorageError>;
    fn get(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError>;
    /// Remove a blob; removing a missing blob succeeds.
    fn remove(&self, key: &StorageKey) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no stored document at {0}")]
    Missing(StorageKey),
    #[error("a document is already stored at {0}")]
    AlreadyExists(StorageKey),
    #[error("storage io failure at {key}: {source}")]
    Io {
        key: StorageKey,
        #[source]
        source: io::Error,
    },
}

/// Stores documents as files below a fixed upload root.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    /// Use `root` as the upload directory, creating it when absent.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &StorageKey) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.as_str());
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !contained {
            return Err(StorageError::Missing(key.clone()));
        }
        Ok(self.root.join(relative))
    }
}

impl DocumentStorage for FileSystemStorage {
    fn put(&self, key: &StorageKey, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_error = |source| StorageError::Io {
            key: key.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(key.clone()));
            }
            Err(err) => return Err(io_error(err)),
        };

        if let Err(err) = file.write_all(bytes).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(io_error(err));
        }
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StorageError::Missing(key.clone()),
            _ => StorageError::Io {
                key: key.clone(),
                source,
            },
        })
    }

    fn remove(&self, key: &StorageKey) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applications::domain::{ApplicationId, DocumentCategory};

    fn key() -> StorageKey {
        StorageKey::generate(
            ApplicationId(9),
            DocumentCategory::Identification,
            Some("id.png"),
        )
    }

    #[test]
    fn put_get_remove_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileSystemStorage::open(dir.path().join("uploads")).expect("open");
        let key = key();

        storage.put(&key, b"scan").expect("stored");
        assert_eq!(storage.get(&key).expect("read back"), b"scan");
        assert!(storage.root().join(key.as_str()).is_file());

        storage.remove(&key).expect("removed");
        assert!(matches!(storage.get(&key), Err(StorageError::Missing(_))));
        storage.remove(&key).expect("second remove is a no-op");
    }

    #[test]
    fn put_never_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileSystemStorage::open(dir.path()).expect("open");
        let key = key();

        storage.put(&key, b"original").expect("stored");
        assert!(matches!(
            storage.put(&key, b"replacement"),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(storage.get(&key).expect("read back"), b"original");
    }

    #[test]
    fn stored_keys_with_parent_components_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileSystemStorage::open(dir.path().join("uploads")).expect("open");
        fs::write(dir.path().join("secret.txt"), b"do not serve").expect("seed");

        let hostile = StorageKey::from_stored("../secret.txt".to_string());
        assert!(matches!(
            storage.get(&hostile),
            Err(StorageError::Missing(_))
        ));
    }
}
