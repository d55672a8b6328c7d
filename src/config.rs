use crate::{Cache, Error, Issuer, Manager, LETS_ENCRYPT_PRODUCTION_DIRECTORY, LETS_ENCRYPT_STAGING_DIRECTORY};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the [Manager] is built from.
///
/// ```rust
/// # use rustls_autocert::ManagerConfig;
/// let config = ManagerConfig::new(["mail.example.com", "example.com"])
///     .cert_files("/etc/tls/cert.pem", "/etc/tls/key.pem")
///     .cache_dir("/var/cache/autocert")
///     .contact_push("mailto:postmaster@example.com")
///     .accept_terms_of_service(true);
/// ```
pub struct ManagerConfig {
    pub(crate) domains: Vec<String>,
    pub(crate) cert_file: Option<PathBuf>,
    pub(crate) key_file: Option<PathBuf>,
    pub(crate) cache: Option<Arc<dyn Cache>>,
    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) issuer: Option<Arc<dyn Issuer>>,
    pub(crate) directory_url: String,
    pub(crate) contact: Vec<String>,
    pub(crate) accept_tos: bool,
    pub(crate) handshake_timeout: Duration,
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("domains", &self.domains)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("cache", &self.cache.is_some())
            .field("cache_dir", &self.cache_dir)
            .field("issuer", &self.issuer.is_some())
            .field("directory_url", &self.directory_url)
            .field("contact", &self.contact)
            .field("accept_tos", &self.accept_tos)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl ManagerConfig {
    /// Candidate domains for automatic certificates. Without SNI the first one is served.
    pub fn new(domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ManagerConfig {
            domains: domains.into_iter().map(Into::into).collect(),
            cert_file: None,
            key_file: None,
            cache: None,
            cache_dir: None,
            issuer: None,
            directory_url: LETS_ENCRYPT_STAGING_DIRECTORY.to_string(),
            contact: vec![],
            accept_tos: false,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
    pub fn domains(mut self, domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }
    pub fn domains_push(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    /// Use a fixed certificate if both files exist.
    ///
    /// Missing files fall back to automatic certificates, files that exist but do not parse make
    /// [ManagerConfig::build] fail.
    pub fn cert_files(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self
    }
    pub fn cert_file(mut self, cert_file: Option<impl Into<PathBuf>>) -> Self {
        self.cert_file = cert_file.map(Into::into);
        self
    }
    pub fn key_file(mut self, key_file: Option<impl Into<PathBuf>>) -> Self {
        self.key_file = key_file.map(Into::into);
        self
    }

    /// Persist automatic certificates in `cache`. Takes precedence over [ManagerConfig::cache_dir].
    pub fn cache<C: 'static + Cache>(mut self, cache: C) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }
    pub fn cache_arc(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }
    pub fn cache_option<C: 'static + Cache>(self, cache: Option<C>) -> Self {
        match cache {
            Some(cache) => self.cache(cache),
            None => self,
        }
    }
    /// Persist automatic certificates as files in `dir`, see [crate::caches::DirCache].
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn issuer<I: 'static + Issuer>(mut self, issuer: I) -> Self {
        self.issuer = Some(Arc::new(issuer));
        self
    }
    pub fn issuer_arc(mut self, issuer: Arc<dyn Issuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn directory(mut self, directory_url: impl ToString) -> Self {
        self.directory_url = directory_url.to_string();
        self
    }
    pub fn directory_lets_encrypt(mut self, production: bool) -> Self {
        self.directory_url = match production {
            true => LETS_ENCRYPT_PRODUCTION_DIRECTORY,
            false => LETS_ENCRYPT_STAGING_DIRECTORY,
        }
        .to_string();
        self
    }

    /// Provide a list of contacts for the account.
    ///
    /// Note that email addresses must include a `mailto:` prefix.
    pub fn contact(mut self, contact: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.contact = contact.into_iter().map(Into::into).collect();
        self
    }

    /// Provide a contact for the account.
    ///
    /// Note that an email address must include a `mailto:` prefix.
    pub fn contact_push(mut self, contact: impl Into<String>) -> Self {
        self.contact.push(contact.into());
        self
    }

    /// Agree to the ACME directory's terms of service. Without it no certificate is issued.
    pub fn accept_terms_of_service(mut self, accept: bool) -> Self {
        self.accept_tos = accept;
        self
    }

    /// Upper bound for selecting a certificate during a handshake, issuance included.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub async fn build(self) -> Result<Arc<Manager>, Error> {
        Manager::new(self).await
    }
}
