//! rustls-autocert serves TLS with either a fixed certificate loaded from disk or certificates
//! issued and renewed through ACME, selected per connection from the client's SNI.
//!
//! The source of certificates is decided once, when the [Manager] is built:
//!
//! 1. a certificate and key file that both exist are loaded and used for every connection,
//! 2. without any candidate domain the manager has no certificate source at all,
//! 3. otherwise certificates are obtained from an [Issuer] for exactly the configured domains
//!    and persisted in a [Cache].
//!
//! ```rust,ignore
//! use rustls_autocert::{caches::SqlCache, ManagerConfig};
//! use futures::StreamExt;
//!
//! let cache = SqlCache::new(pool, "acme_certs").await?;
//! let manager = ManagerConfig::new(["mail.example.com"])
//!     .cache(cache)
//!     .issuer(my_acme_issuer)
//!     .accept_terms_of_service(true)
//!     .build()
//!     .await?;
//!
//! let listener = manager.listener("0.0.0.0:443").await?;
//! let mut incoming = listener.incoming();
//! while let Some(tls) = incoming.next().await {
//!     let tls = tls?;
//!     async_std::task::spawn(handle(tls));
//! }
//! ```
//!
//! ## Clients without SNI
//!
//! Some SMTP clients upgrading with STARTTLS do not send a server name. For those the first
//! configured domain is used, so the list order of [ManagerConfig::new] matters.
//!
//! ## Caching
//!
//! Issued certificates are stored as PEM blobs (private key followed by the certificate chain)
//! under the domain name. [caches::SqlCache] keeps them in a table of a SQLite database,
//! [caches::DirCache] in a directory and [caches::NoCache] not at all, in which case every restart
//! issues fresh certificates.

mod automated;
pub mod caches;
mod certificate;
mod config;
mod error;
mod incoming;
mod issuer;
mod manager;
mod resolver;
mod tls;

pub use caches::CacheError;
pub use certificate::*;
pub use config::*;
pub use error::*;
pub use incoming::*;
pub use issuer::*;
pub use manager::*;
pub use resolver::*;
pub use tls::*;

use async_trait::async_trait;
use std::sync::Arc;

pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_PRODUCTION_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Outcome of a successful cache read.
///
/// A missing key is an expected state ("not issued yet") and is reported as [CacheLookup::Miss],
/// never as a [CacheError].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(Vec<u8>),
    Miss,
}

impl CacheLookup {
    pub fn into_option(self) -> Option<Vec<u8>> {
        match self {
            CacheLookup::Hit(data) => Some(data),
            CacheLookup::Miss => None,
        }
    }
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookup::Miss)
    }
}

/// Persistent key to blob store for certificates and account material.
///
/// Implementations must tolerate concurrent calls for the same and for different keys. Data is
/// opaque to the cache.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<CacheLookup, CacheError>;
    /// Inserts or overwrites `key`.
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError>;
    /// Removes `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Arc<C> {
    async fn get(&self, key: &str) -> Result<CacheLookup, CacheError> {
        (**self).get(key).await
    }
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        (**self).put(key, data).await
    }
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        (**self).delete(key).await
    }
}
