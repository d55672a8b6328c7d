use crate::{Cache, CacheError, CacheLookup};
use async_trait::async_trait;

/// No-op cache, which does nothing.
///
/// Every lookup misses, so certificates are issued again after each restart.
/// ```rust
/// # use rustls_autocert::caches::NoCache;
/// let no_cache = NoCache::default();
/// ```
#[derive(Copy, Clone, Debug, Default)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get(&self, key: &str) -> Result<CacheLookup, CacheError> {
        log::debug!("no cache configured, could not load {}", key);
        Ok(CacheLookup::Miss)
    }
    async fn put(&self, key: &str, _data: &[u8]) -> Result<(), CacheError> {
        log::info!("no cache configured, could not store {}", key);
        Ok(())
    }
    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}
