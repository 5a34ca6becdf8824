use crate::blob::BlobStore;
use crate::error::StorageError;
use crate::types::{AttachmentMetadata, Attachments};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use tempfile::TempPath;
use uuid::Uuid;

/// Blob namespace all webhook attachments are written to.
pub const ATTACHMENT_NAMESPACE: &str = "webhooks";

/// Where the bytes of an upload are held until they reach the blob store.
#[derive(Debug)]
pub enum FileContents {
    Memory(Vec<u8>),
    /// Streamed to a temporary file while the request was read.
    /// The file is removed when the upload is dropped.
    Spooled(TempPath),
}

/// A file part received with a multipart request.
#[derive(Debug)]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_type: String,
    size: u64,
    contents: FileContents,
}

impl UploadedFile {
    pub fn new(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        let contents = contents.into();
        Self {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            size: contents.len() as u64,
            contents: FileContents::Memory(contents),
        }
    }

    /// An upload already written to `path`, `size` bytes long.
    pub fn spooled(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        path: TempPath,
        size: u64,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            size,
            contents: FileContents::Spooled(path),
        }
    }

    /// Extension of the client-supplied name, without the dot.
    pub fn extension(&self) -> &str {
        match self.original_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext,
            _ => "",
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the upload without loading a spooled file into memory.
    pub fn open(&self) -> std::io::Result<Box<dyn Read + '_>> {
        match &self.contents {
            FileContents::Memory(bytes) => Ok(Box::new(bytes.as_slice())),
            FileContents::Spooled(path) => Ok(Box::new(File::open(path)?)),
        }
    }
}

/// One or many files uploaded under the same form field.
#[derive(Debug)]
pub enum FileField {
    Single(UploadedFile),
    Many(Vec<UploadedFile>),
}

impl FileField {
    pub fn files(&self) -> &[UploadedFile] {
        match self {
            FileField::Single(file) => std::slice::from_ref(file),
            FileField::Many(files) => files,
        }
    }

    pub fn into_files(self) -> Vec<UploadedFile> {
        match self {
            FileField::Single(file) => vec![file],
            FileField::Many(files) => files,
        }
    }

    pub fn push(&mut self, file: UploadedFile) {
        let mut files = std::mem::replace(self, FileField::Many(Vec::new())).into_files();
        files.push(file);
        *self = FileField::Many(files);
    }
}

/// File parts of a request keyed by form field name, in arrival order.
pub type UploadedParts = IndexMap<String, FileField>;

/// Add `file` under `field`, turning a single upload into a list on repeat.
pub fn add_part(parts: &mut UploadedParts, field: impl Into<String>, file: UploadedFile) {
    match parts.entry(field.into()) {
        indexmap::map::Entry::Occupied(mut entry) => entry.get_mut().push(file),
        indexmap::map::Entry::Vacant(entry) => {
            entry.insert(FileField::Single(file));
        }
    }
}

/// Storage name for an upload: a hash of a fresh UUID and the original
/// name, followed by the original extension.
pub fn unique_filename(original_name: &str, extension: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(original_name.as_bytes());
    let digest = hex::encode(hasher.finalize());

    if extension.is_empty() {
        digest
    } else {
        format!("{digest}.{extension}")
    }
}

/// Write every uploaded file to the blob store and describe what was stored.
///
/// Files are written one at a time in field order. If any write fails the
/// blobs already written by this call are removed and the error returned,
/// so callers never see a partial attachment set.
pub fn extract(blobs: &dyn BlobStore, parts: &UploadedParts) -> Result<Attachments, StorageError> {
    let mut stored = Attachments::new();
    let mut written: Vec<String> = Vec::new();

    for (field, uploads) in parts {
        let entries = stored.entry(field.clone()).or_default();

        for file in uploads.files() {
            let filename = unique_filename(&file.original_name, file.extension());
            let stored_at = file
                .open()
                .map_err(|source| StorageError::UploadRead {
                    name: file.original_name.clone(),
                    source,
                })
                .and_then(|mut reader| blobs.put(ATTACHMENT_NAMESPACE, &filename, &mut reader));
            let storage_path = match stored_at {
                Ok(path) => path,
                Err(e) => {
                    discard(blobs, &written);
                    return Err(e);
                }
            };
            written.push(storage_path.clone());

            entries.push(AttachmentMetadata {
                original_name: file.original_name.clone(),
                storage_path,
                mime_type: file.mime_type.clone(),
                size: file.size(),
            });
        }
    }

    Ok(stored)
}

fn discard(blobs: &dyn BlobStore, paths: &[String]) {
    for path in paths {
        if let Err(e) = blobs.delete(path) {
            tracing::warn!(%path, error = %e, "failed to remove blob after aborted extraction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, HashSet};

    /// In-memory store that can be told to fail after a number of writes.
    #[derive(Default)]
    struct MemoryBlobs {
        blobs: RefCell<BTreeMap<String, Vec<u8>>>,
        fail_after: Option<usize>,
    }

    impl BlobStore for MemoryBlobs {
        fn put(&self, namespace: &str, key: &str, contents: &mut dyn Read) -> Result<String, StorageError> {
            let path = format!("{namespace}/{key}");
            if self.fail_after == Some(self.blobs.borrow().len()) {
                return Err(StorageError::BlobWrite {
                    path,
                    source: std::io::Error::other("disk full"),
                });
            }
            let mut bytes = Vec::new();
            contents.read_to_end(&mut bytes).unwrap();
            self.blobs.borrow_mut().insert(path.clone(), bytes);
            Ok(path)
        }

        fn delete(&self, path: &str) -> Result<(), StorageError> {
            self.blobs.borrow_mut().remove(path);
            Ok(())
        }
    }

    fn parts() -> UploadedParts {
        let mut parts = UploadedParts::new();
        add_part(&mut parts, "doc", UploadedFile::new("a.pdf", "application/pdf", b"aaaa".to_vec()));
        add_part(&mut parts, "doc", UploadedFile::new("b.txt", "text/plain", b"bb".to_vec()));
        add_part(&mut parts, "avatar", UploadedFile::new("me.png", "image/png", b"png".to_vec()));
        parts
    }

    #[test]
    fn extension_comes_from_original_name() {
        assert_eq!(UploadedFile::new("report.final.pdf", "", b"".to_vec()).extension(), "pdf");
        assert_eq!(UploadedFile::new("README", "", b"".to_vec()).extension(), "");
        assert_eq!(UploadedFile::new(".env", "", b"".to_vec()).extension(), "");
    }

    #[test]
    fn repeated_field_becomes_a_list() {
        let parts = parts();
        assert!(matches!(parts["doc"], FileField::Many(ref files) if files.len() == 2));
        assert!(matches!(parts["avatar"], FileField::Single(_)));
    }

    #[test]
    fn spooled_uploads_are_read_from_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, b"spooled bytes").unwrap();
        let path = tmp.into_temp_path();
        let on_disk = path.to_path_buf();

        let mut parts = UploadedParts::new();
        add_part(&mut parts, "doc", UploadedFile::spooled("notes.txt", "text/plain", path, 13));

        let blobs = MemoryBlobs::default();
        let stored = extract(&blobs, &parts).unwrap();
        assert_eq!(stored["doc"][0].size, 13);
        assert_eq!(blobs.blobs.borrow()[&stored["doc"][0].storage_path], b"spooled bytes");

        drop(parts);
        assert!(!on_disk.exists());
    }

    #[test]
    fn filenames_are_distinct_for_identical_names() {
        let names: HashSet<String> = (0..100).map(|_| unique_filename("same.txt", "txt")).collect();
        assert_eq!(names.len(), 100);
        assert!(names.iter().all(|n| n.ends_with(".txt") && n.len() == 64 + 4));
        assert!(!unique_filename("README", "").contains('.'));
    }

    #[test]
    fn extract_preserves_field_and_file_order() {
        let blobs = MemoryBlobs::default();
        let stored = extract(&blobs, &parts()).unwrap();

        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["doc", "avatar"]);
        let doc = &stored["doc"];
        assert_eq!(doc[0].original_name, "a.pdf");
        assert_eq!(doc[0].size, 4);
        assert_eq!(doc[0].mime_type, "application/pdf");
        assert_eq!(doc[1].original_name, "b.txt");
        assert!(doc[1].storage_path.starts_with("webhooks/"));
        assert_eq!(blobs.blobs.borrow().len(), 3);
        assert_eq!(blobs.blobs.borrow()[&doc[0].storage_path], b"aaaa");
    }

    #[test]
    fn failed_write_discards_earlier_blobs() {
        let blobs = MemoryBlobs {
            fail_after: Some(2),
            ..Default::default()
        };

        let err = extract(&blobs, &parts()).unwrap_err();
        assert!(matches!(err, StorageError::BlobWrite { .. }));
        assert!(blobs.blobs.borrow().is_empty());
    }
}
