use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::store::ObjectStore;

/// Stores objects as files under `<root>/<bucket>/<key>`.
///
/// Writes go to a uniquely named temporary file in the target directory
/// and are renamed into place, so readers never see partial content.
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `(bucket, key)` to a path, rejecting anything that could
    /// escape the bucket directory.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let bucket_path = validate_relative(bucket)?;
        let key_path = validate_relative(key)?;
        if bucket_path.components().count() != 1 {
            return Err(StoreError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket_path).join(key_path))
    }
}

fn validate_relative(raw: &str) -> Result<&Path, StoreError> {
    let path = Path::new(raw);
    let valid = !raw.is_empty()
        && !raw.contains('\\')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(StoreError::InvalidKey(raw.to_string()))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;

        tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;

        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&path)(e));
        }

        debug!(
            bucket,
            bytes = bytes.len(),
            content_type,
            "Stored object"
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(&path)(e)),
        }

        // Drop the per-document directory once it is empty.
        if let Some(dir) = path.parent() {
            let bucket_dir = self.root.join(bucket);
            if dir != bucket_dir {
                let _ = tokio::fs::remove_dir(dir).await;
            }
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(io_err(&path)(e)),
        }
    }
}
