use crate::automated::{AccountSettings, AutomatedSource};
use crate::caches::{DirCache, NoCache};
use crate::incoming::{Listener, ListenerAcceptor};
use crate::tls::{server_config, ALPN_H2};
use crate::{normalize_domain, Cache, CacheLookup, Certificate, ClientHelloInfo, Error, ManagerConfig, StaticResolver, TlsConfig, TlsVersion};
use async_std::net::{TcpListener, ToSocketAddrs};
use rustls::CipherSuite;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

enum Source {
    Fixed(Certificate),
    Automated(AutomatedSource),
    None,
}

/// Decides once where certificates come from and answers certificate requests of TLS handshakes.
pub struct Manager {
    source: Source,
    domains: Vec<String>,
    handshake_timeout: Duration,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Fixed(_) => "fixed",
            Source::Automated(_) => "automated",
            Source::None => "none",
        };
        f.debug_struct("Manager")
            .field("source", &source)
            .field("domains", &self.domains)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl Manager {
    /// Builds the manager, see the crate documentation for the order in which sources are tried.
    ///
    /// Fails if configured certificate files exist but cannot be used, if the cache directory is
    /// unusable or if automatic certificates are needed but no issuer is configured.
    pub async fn new(config: ManagerConfig) -> Result<Arc<Self>, Error> {
        let ManagerConfig {
            domains,
            cert_file,
            key_file,
            cache,
            cache_dir,
            issuer,
            directory_url,
            contact,
            accept_tos,
            handshake_timeout,
        } = config;

        if let Some(cert) = load_fixed(cert_file, key_file).await? {
            let domains = cert.domains().to_vec();
            log::info!("using fixed certificate for {:?}, valid until {}", domains, cert.not_after());
            return Ok(Arc::new(Self {
                source: Source::Fixed(cert),
                domains,
                handshake_timeout,
            }));
        }

        let mut normalized: Vec<String> = Vec::with_capacity(domains.len());
        for domain in domains.iter().map(|d| normalize_domain(d)) {
            if !domain.is_empty() && !normalized.contains(&domain) {
                normalized.push(domain);
            }
        }
        let domains = normalized;
        if domains.is_empty() {
            log::warn!("no fixed certificate and no domains configured, TLS is unavailable");
            return Ok(Arc::new(Self {
                source: Source::None,
                domains,
                handshake_timeout,
            }));
        }

        let issuer = issuer.ok_or_else(|| Error::MissingIssuer(domains.clone()))?;
        let cache: Arc<dyn Cache> = match (cache, cache_dir) {
            (Some(cache), _) => cache,
            (None, Some(dir)) => Arc::new(DirCache::open(dir).await?),
            (None, None) => {
                log::warn!("no certificate cache configured, certificates are ordered again after every restart");
                Arc::new(NoCache)
            }
        };
        log::info!("automatic certificates for {:?} from {}", domains, directory_url);
        let account = AccountSettings {
            directory_url,
            contact,
            accept_tos,
        };
        let automated = AutomatedSource::new(domains.clone(), issuer, cache, account, handshake_timeout);
        Ok(Arc::new(Self {
            source: Source::Automated(automated),
            domains,
            handshake_timeout,
        }))
    }

    pub fn uses_fixed_certificate(&self) -> bool {
        matches!(self.source, Source::Fixed(_))
    }
    pub fn uses_automatic_certificates(&self) -> bool {
        matches!(self.source, Source::Automated(_))
    }
    /// Candidate domains; the fixed certificate's DNS names when one is loaded.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Looks up the certificate stored under `key` without ordering anything.
    ///
    /// The fixed certificate is returned for every key. `None` means there is no certificate
    /// source or nothing has been issued for `key` yet.
    pub async fn certificate(&self, key: &str) -> Result<Option<Certificate>, Error> {
        let automated = match &self.source {
            Source::Fixed(cert) => return Ok(Some(cert.clone())),
            Source::None => return Ok(None),
            Source::Automated(automated) => automated,
        };
        match automated.cache().get(key).await? {
            CacheLookup::Miss => Ok(None),
            CacheLookup::Hit(pem) => Certificate::from_pem(&pem).map(Some).map_err(|source| Error::CachedCertificate {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Selects the certificate for a handshake.
    ///
    /// A client without SNI is treated as if it asked for the first candidate domain. Automatic
    /// certificates are only handed out for candidate domains, and the lookup, including a
    /// possible ACME order, is bounded by the handshake timeout.
    pub async fn get_certificate(&self, client_hello: &ClientHelloInfo) -> Result<Option<Certificate>, Error> {
        let server_name = match client_hello.server_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => name,
            None => match self.domains.first() {
                Some(first) => {
                    log::debug!("client sent no server name, assuming {}", first);
                    first.as_str()
                }
                None => "",
            },
        };
        let automated = match &self.source {
            Source::Fixed(cert) => return Ok(Some(cert.clone())),
            Source::None => return Ok(None),
            Source::Automated(automated) => automated,
        };
        match async_std::future::timeout(self.handshake_timeout, automated.get(server_name)).await {
            Ok(result) => result.map(Some),
            Err(_) => Err(Error::Timeout {
                domain: server_name.to_string(),
                timeout: self.handshake_timeout,
            }),
        }
    }

    /// TLS setup selecting certificates through [Manager::get_certificate].
    ///
    /// `min_version` defaults to TLS 1.2, an empty `cipher_suites` keeps the defaults.
    pub fn tls_config(self: &Arc<Self>, min_version: Option<TlsVersion>, cipher_suites: &[CipherSuite]) -> Result<TlsConfig, Error> {
        TlsConfig::new(self.clone(), min_version, cipher_suites)
    }

    /// Binds a TLS listener.
    ///
    /// A fixed certificate is served from a static configuration. Otherwise certificates are
    /// selected per handshake and `h2` is not offered through ALPN.
    pub async fn listener<A: ToSocketAddrs>(self: &Arc<Self>, addr: A) -> Result<Listener, Error> {
        let acceptor = match &self.source {
            Source::Fixed(cert) => {
                let config = server_config(None, &[], Arc::new(StaticResolver::new(cert.certified_key())))?;
                ListenerAcceptor::Static(futures_rustls::TlsAcceptor::from(Arc::new(config)))
            }
            Source::Automated(_) => ListenerAcceptor::Selecting(self.tls_config(None, &[])?.without_protocol(ALPN_H2)),
            Source::None => {
                log::warn!("listener without certificate source, every handshake will fail");
                ListenerAcceptor::Selecting(self.tls_config(None, &[])?.without_protocol(ALPN_H2))
            }
        };
        let tcp = TcpListener::bind(addr).await?;
        log::info!("listening for tls on {:?}", tcp.local_addr());
        Ok(Listener::new(tcp, acceptor))
    }
}

async fn load_fixed(cert_file: Option<PathBuf>, key_file: Option<PathBuf>) -> Result<Option<Certificate>, Error> {
    let (cert_file, key_file) = match (cert_file, key_file) {
        (Some(cert_file), Some(key_file)) => (cert_file, key_file),
        (None, None) => return Ok(None),
        (cert_file, key_file) => {
            log::warn!("need both certificate and key file, got {:?} and {:?}", cert_file, key_file);
            return Ok(None);
        }
    };
    for file in [&cert_file, &key_file] {
        if !async_std::path::Path::new(file.as_os_str()).exists().await {
            log::warn!("{:?} does not exist, not using a fixed certificate", file);
            return Ok(None);
        }
    }
    let read = |path: PathBuf| async move {
        async_std::fs::read(&path).await.map_err(|source| Error::ReadFile { path, source })
    };
    let cert_pem = read(cert_file).await?;
    let key_pem = read(key_file).await?;
    Certificate::from_pem_pair(cert_pem, key_pem)
        .map(Some)
        .map_err(Error::FixedCertificate)
}
