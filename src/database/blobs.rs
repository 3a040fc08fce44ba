use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::database::store::StoreError;
use crate::ingest::mimetype::detect_mimetype;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: String,
    pub url: String,
    pub size: u64,
    pub content_type: String,
}

/// Binary storage that hands out a fetchable URL per uploaded path.
pub trait BlobStore {
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<StoredBlob, StoreError>;

    /// Removing a path that holds nothing is not an error.
    fn delete(&self, path: &str) -> Result<(), StoreError>;
}

/// Blob store rooted at a local directory.
pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<StoredBlob, StoreError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        debug!("Stored blob {} ({} bytes)", path, bytes.len());

        let file_name = path.rsplit('/').next().unwrap_or(path);
        Ok(StoredBlob {
            path: path.to_string(),
            url: format!("{}/{}", self.public_base, path),
            size: bytes.len() as u64,
            content_type: detect_mimetype(bytes, file_name),
        })
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Blob {} already gone", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Makes an uploaded file name safe to embed in a blob path.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_issues_url_and_delete_removes() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let blobs = FsBlobStore::new(dir.path(), "https://cdn.example/");

        let stored = blobs.upload("galleries/g1/1_a.pdf", b"%PDF-1.4 body")?;
        assert_eq!(stored.url, "https://cdn.example/galleries/g1/1_a.pdf");
        assert_eq!(stored.size, 13);
        assert_eq!(stored.content_type, "application/pdf");
        assert!(dir.path().join("galleries/g1/1_a.pdf").exists());

        blobs.delete("galleries/g1/1_a.pdf")?;
        assert!(!dir.path().join("galleries/g1/1_a.pdf").exists());
        blobs.delete("galleries/g1/1_a.pdf")?;
        Ok(())
    }

    #[test]
    fn rejects_paths_escaping_the_root() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let blobs = FsBlobStore::new(dir.path(), "file://x");
        for bad in ["../evil", "/etc/passwd", "a/../../b", ""] {
            assert!(matches!(
                blobs.upload(bad, b"x"),
                Err(StoreError::InvalidPath(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("photo 1.jpg"), "photo 1.jpg");
    }
}
