use crate::error::StorageError;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

/// Namespaced write-by-key storage for attachment contents.
pub trait BlobStore {
    /// Stream `contents` to `namespace/key` and return the storage path.
    fn put(&self, namespace: &str, key: &str, contents: &mut dyn Read) -> Result<String, StorageError>;

    fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Blob store backed by a directory on the local filesystem.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, namespace: &str, key: &str, contents: &mut dyn Read) -> Result<String, StorageError> {
        let storage_path = format!("{namespace}/{key}");
        let write_err = |source| StorageError::BlobWrite {
            path: storage_path.clone(),
            source,
        };

        std::fs::create_dir_all(self.root.join(namespace)).map_err(write_err)?;
        let target = self.resolve(&storage_path);
        let mut file = File::create(&target).map_err(write_err)?;
        let bytes = match std::io::copy(contents, &mut file).and_then(|n| file.sync_all().map(|_| n)) {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = std::fs::remove_file(&target);
                return Err(write_err(e));
            }
        };

        tracing::debug!(path = %storage_path, bytes, "stored blob");
        Ok(storage_path)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        std::fs::remove_file(self.resolve(path)).map_err(|source| StorageError::BlobDelete {
            path: path.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_writes_under_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path().to_path_buf());

        let path = blobs.put("webhooks", "a.txt", &mut &b"hello"[..]).unwrap();

        assert_eq!(path, "webhooks/a.txt");
        assert_eq!(std::fs::read(dir.path().join("webhooks/a.txt")).unwrap(), b"hello");

        blobs.delete(&path).unwrap();
        assert!(!blobs.resolve(&path).exists());
    }

    #[test]
    fn failed_copy_leaves_no_partial_blob() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("connection reset"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path().to_path_buf());

        let err = blobs.put("webhooks", "a.txt", &mut Broken).unwrap_err();
        assert!(matches!(err, StorageError::BlobWrite { .. }));
        assert!(!dir.path().join("webhooks/a.txt").exists());
    }

    #[test]
    fn put_reports_write_failures() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the namespace directory should be.
        std::fs::write(dir.path().join("webhooks"), b"").unwrap();
        let blobs = FsBlobStore::new(dir.path().to_path_buf());

        let err = blobs.put("webhooks", "a.txt", &mut &b"hello"[..]).unwrap_err();
        assert!(matches!(err, StorageError::BlobWrite { ref path, .. } if path == "webhooks/a.txt"));
    }
}
