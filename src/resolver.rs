use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::sync::Arc;

/// The parts of a TLS ClientHello that certificate selection looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    /// SNI as sent by the client, `None` when absent or empty.
    pub server_name: Option<String>,
    pub alpn: Vec<Vec<u8>>,
}

impl ClientHelloInfo {
    pub fn new(server_name: Option<impl Into<String>>) -> Self {
        Self {
            server_name: server_name.map(Into::into).filter(|name: &String| !name.is_empty()),
            alpn: vec![],
        }
    }
}

impl From<&ClientHello<'_>> for ClientHelloInfo {
    fn from(client_hello: &ClientHello<'_>) -> Self {
        Self {
            server_name: client_hello.server_name().filter(|name| !name.is_empty()).map(String::from),
            alpn: client_hello
                .alpn()
                .into_iter()
                .flatten()
                .map(|protocol| protocol.to_vec())
                .collect(),
        }
    }
}

/// Hands the same certificate to every handshake.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    cert: Option<Arc<CertifiedKey>>,
}

impl StaticResolver {
    pub fn new(cert: Arc<CertifiedKey>) -> Self {
        Self { cert: Some(cert) }
    }
}

impl ResolvesServerCert for StaticResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        if self.cert.is_none() {
            log::debug!("no certificate for server name {:?}", client_hello.server_name());
        }
        self.cert.clone()
    }
}
