use crate::{Cache, CacheError, CacheLookup};
use async_std::fs;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::digest::{Context, SHA256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Filesystem cache with one file per key.
///
/// File names are derived from a hash of the key, so arbitrary keys never escape the directory.
#[derive(Clone, Debug)]
pub struct DirCache {
    dir: PathBuf,
}

impl DirCache {
    /// Opens the cache, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        if let Err(source) = fs::create_dir_all(&dir).await {
            return Err(CacheError::Directory { path: dir, source });
        }
        let metadata = fs::metadata(&dir).await.map_err(|source| CacheError::Directory {
            path: dir.clone(),
            source,
        })?;
        if metadata.permissions().readonly() {
            return Err(CacheError::Directory {
                path: dir,
                source: std::io::Error::new(ErrorKind::PermissionDenied, "directory is read-only"),
            });
        }
        Ok(Self { dir })
    }
    pub fn path(&self) -> &Path {
        &self.dir
    }
    fn file_name(key: &str) -> String {
        let mut ctx = Context::new(&SHA256);
        ctx.update(key.as_bytes());
        let hash = URL_SAFE_NO_PAD.encode(ctx.finish());
        format!("cached_{}", hash)
    }
}

#[async_trait]
impl Cache for DirCache {
    async fn get(&self, key: &str) -> Result<CacheLookup, CacheError> {
        let path = self.dir.join(Self::file_name(key));
        match fs::read(path).await {
            Ok(content) => Ok(CacheLookup::Hit(content)),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(CacheLookup::Miss),
                _ => Err(err.into()),
            },
        }
    }
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let file_name = Self::file_name(key);
        let tmp = self.dir.join(format!("{}.tmp", file_name));
        fs::write(&tmp, data).await?;
        // rename keeps readers from ever seeing a partial file
        fs::rename(&tmp, self.dir.join(file_name)).await?;
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.dir.join(Self::file_name(key))).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
