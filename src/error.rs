use crate::{CacheError, CertParseError, IssueError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not read {path:?}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fixed certificate: {0}")]
    FixedCertificate(#[source] CertParseError),
    #[error("automatic certificates for {0:?} need an issuer")]
    MissingIssuer(Vec<String>),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("cached certificate for {key}: {source}")]
    CachedCertificate {
        key: String,
        #[source]
        source: CertParseError,
    },
    #[error("{0} is not configured for automatic certificates")]
    DomainNotAllowed(String),
    #[error("terms of service of the ACME directory were not accepted")]
    TermsNotAccepted,
    #[error("certificate issuance for {domain} failed: {source}")]
    Issue {
        domain: String,
        #[source]
        source: IssueError,
    },
    #[error("issued certificate for {domain} is unusable: {reason}")]
    InvalidIssuedCertificate { domain: String, reason: String },
    #[error("certificate selection for {domain} timed out after {timeout:?}")]
    Timeout { domain: String, timeout: Duration },
    #[error("no certificate available for this connection")]
    NoCertificate,
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
