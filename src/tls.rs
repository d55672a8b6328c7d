use crate::{ClientHelloInfo, Error, Manager, StaticResolver};
use futures::{AsyncRead, AsyncWrite};
use futures_rustls::server::TlsStream;
use futures_rustls::LazyConfigAcceptor;
use rustls::server::{Acceptor, ResolvesServerCert};
use rustls::version::{TLS12, TLS13};
use rustls::{CipherSuite, ServerConfig};
use std::fmt;
use std::sync::Arc;

pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_HTTP1: &[u8] = b"http/1.1";

/// Lowest protocol version a [TlsConfig] accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    #[default]
    Tls12,
    Tls13,
}

/// Reusable TLS server setup that picks the certificate per handshake through
/// [Manager::get_certificate].
///
/// The ClientHello is read first, the certificate is selected (which may wait for the cache or an
/// ACME order) and only then the handshake continues.
#[derive(Clone)]
pub struct TlsConfig {
    manager: Arc<Manager>,
    template: Arc<ServerConfig>,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig").field("template", &self.template).finish_non_exhaustive()
    }
}

impl TlsConfig {
    pub(crate) fn new(manager: Arc<Manager>, min_version: Option<TlsVersion>, cipher_suites: &[CipherSuite]) -> Result<Self, Error> {
        let mut template = server_config(min_version, cipher_suites, Arc::new(StaticResolver::default()))?;
        template.alpn_protocols = vec![ALPN_H2.to_vec(), ALPN_HTTP1.to_vec()];
        Ok(Self {
            manager,
            template: Arc::new(template),
        })
    }

    /// Stops advertising `protocol` through ALPN.
    pub fn without_protocol(mut self, protocol: &[u8]) -> Self {
        Arc::make_mut(&mut self.template).alpn_protocols.retain(|p| p != protocol);
        self
    }
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.template.alpn_protocols
    }
    /// The rustls configuration every handshake starts from; its resolver has no certificate.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.template.clone()
    }

    pub async fn accept<IO: AsyncRead + AsyncWrite + Unpin>(&self, io: IO) -> Result<TlsStream<IO>, Error> {
        let start = LazyConfigAcceptor::new(Acceptor::default(), io).await?;
        let client_hello = ClientHelloInfo::from(&start.client_hello());
        let cert = self.manager.get_certificate(&client_hello).await?.ok_or(Error::NoCertificate)?;
        let mut config = (*self.template).clone();
        config.cert_resolver = Arc::new(StaticResolver::new(cert.certified_key()));
        Ok(start.into_stream(Arc::new(config)).await?)
    }
}

/// Builds a rustls server configuration on the ring provider.
///
/// `cipher_suites` narrows the TLS 1.2 suites, TLS 1.3 suites always stay enabled. An empty list
/// keeps the provider defaults.
pub(crate) fn server_config(
    min_version: Option<TlsVersion>,
    cipher_suites: &[CipherSuite],
    resolver: Arc<dyn ResolvesServerCert>,
) -> Result<ServerConfig, Error> {
    let mut provider = rustls::crypto::ring::default_provider();
    if !cipher_suites.is_empty() {
        provider
            .cipher_suites
            .retain(|suite| suite.version() == &TLS13 || cipher_suites.contains(&suite.suite()));
        if !provider.cipher_suites.iter().any(|suite| suite.version() == &TLS12) {
            log::warn!("none of the configured cipher suites {:?} is supported for TLS 1.2", cipher_suites);
        }
    }
    let versions = match min_version.unwrap_or_default() {
        TlsVersion::Tls12 => vec![&TLS12, &TLS13],
        TlsVersion::Tls13 => vec![&TLS13],
    };
    let config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&versions)?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    Ok(config)
}
