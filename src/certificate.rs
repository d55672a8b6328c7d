use chrono::{DateTime, Utc};
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer};
use rustls::sign::CertifiedKey;
use rustls::InconsistentKeys;
use std::sync::Arc;
use thiserror::Error;
use x509_parser::certificate::Validity;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

#[derive(Error, Debug)]
pub enum CertParseError {
    #[error("X509 parsing error: {0}")]
    X509(#[from] x509_parser::nom::Err<x509_parser::error::X509Error>),
    #[error("pem error: {0}")]
    Pem(#[from] pem::PemError),
    #[error("no certificate found")]
    NoCertificate,
    #[error("no private key found")]
    NoPrivateKey,
    #[error("more than one private key found")]
    MultiplePrivateKeys,
    #[error("unsupported private key type")]
    InvalidPrivateKey,
    #[error("private key does not match the certificate")]
    KeyMismatch,
    #[error("certificate validity is out of range")]
    InvalidValidity,
}

/// Whether a certificate can keep being served.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum CertificateShouldUpdate {
    Keep,
    /// Past two thirds of the validity window but still usable.
    Renew,
    Expired,
}

/// A certificate chain with its private key, ready to be handed to rustls.
#[derive(Clone, Debug)]
pub struct Certificate {
    certified_key: Arc<CertifiedKey>,
    domains: Vec<String>,
    validity: [DateTime<Utc>; 2],
}

impl Certificate {
    /// Parses a blob holding both the private key and the certificate chain, in any order.
    ///
    /// This is the layout issuers return and caches store.
    pub fn from_pem(pem: impl AsRef<[u8]>) -> Result<Self, CertParseError> {
        let pems = pem::parse_many(pem)?;
        Self::from_pems(pems)
    }

    /// Parses a certificate chain and its private key kept in separate files.
    pub fn from_pem_pair(cert_pem: impl AsRef<[u8]>, key_pem: impl AsRef<[u8]>) -> Result<Self, CertParseError> {
        let mut pems = pem::parse_many(key_pem)?;
        if pems.iter().any(|p| p.tag() == "CERTIFICATE") {
            log::warn!("ignoring certificates found in the key file");
            pems.retain(|p| p.tag() != "CERTIFICATE");
        }
        pems.extend(pem::parse_many(cert_pem)?.into_iter().filter(|p| p.tag() == "CERTIFICATE"));
        Self::from_pems(pems)
    }

    fn from_pems(pems: Vec<pem::Pem>) -> Result<Self, CertParseError> {
        let mut private_key: Option<PrivateKeyDer<'static>> = None;
        let mut cert_chain: Vec<CertificateDer<'static>> = Vec::new();
        for p in pems {
            let key = match p.tag() {
                "CERTIFICATE" => {
                    cert_chain.push(CertificateDer::from(p.into_contents()));
                    continue;
                }
                "PRIVATE KEY" => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(p.into_contents())),
                "RSA PRIVATE KEY" => PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(p.into_contents())),
                "EC PRIVATE KEY" => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(p.into_contents())),
                other => {
                    log::debug!("skipping pem block {}", other);
                    continue;
                }
            };
            if private_key.replace(key).is_some() {
                return Err(CertParseError::MultiplePrivateKeys);
            }
        }
        let private_key = private_key.ok_or(CertParseError::NoPrivateKey)?;
        let leaf = cert_chain.first().ok_or(CertParseError::NoCertificate)?;

        let (_, x509) = parse_x509_certificate(leaf).map_err(CertParseError::X509)?;
        let Validity { not_before, not_after } = x509.validity();
        let not_before = DateTime::from_timestamp(not_before.timestamp(), 0).ok_or(CertParseError::InvalidValidity)?;
        let not_after = DateTime::from_timestamp(not_after.timestamp(), 0).ok_or(CertParseError::InvalidValidity)?;
        let mut domains: Vec<String> = Vec::new();
        for name in x509
            .subject_alternative_name()
            .ok()
            .flatten()
            .iter()
            .flat_map(|it| it.value.general_names.iter())
        {
            if let GeneralName::DNSName(dns) = name {
                let dns = normalize_domain(dns);
                if !domains.contains(&dns) {
                    domains.push(dns);
                }
            }
        }
        drop(x509);

        let pk = any_supported_type(&private_key).map_err(|_| CertParseError::InvalidPrivateKey)?;
        let certified_key = CertifiedKey::new(cert_chain, pk);
        match certified_key.keys_match() {
            Ok(()) | Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {}
            Err(_) => return Err(CertParseError::KeyMismatch),
        }
        Ok(Self {
            certified_key: Arc::new(certified_key),
            domains,
            validity: [not_before, not_after],
        })
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified_key.clone()
    }
    pub fn leaf(&self) -> &CertificateDer<'static> {
        // non-empty, checked while parsing
        &self.certified_key.cert[0]
    }
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.certified_key.cert
    }
    /// DNS names of the leaf certificate's subject alternative name extension.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }
    pub fn not_before(&self) -> DateTime<Utc> {
        self.validity[0]
    }
    pub fn not_after(&self) -> DateTime<Utc> {
        self.validity[1]
    }

    /// Returns `true` if the leaf is valid for `domain`, including single label wildcards.
    pub fn covers(&self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        self.domains.iter().any(|name| match name.strip_prefix("*.") {
            Some(suffix) => domain
                .split_once('.')
                .map_or(false, |(label, rest)| !label.is_empty() && rest == suffix),
            None => *name == domain,
        })
    }

    pub fn should_update(&self, now: DateTime<Utc>) -> CertificateShouldUpdate {
        let [not_before, not_after] = self.validity;
        if not_after <= now {
            return CertificateShouldUpdate::Expired;
        }
        let renew_after = not_after - (not_after - not_before) / 3;
        if renew_after <= now {
            CertificateShouldUpdate::Renew
        } else {
            CertificateShouldUpdate::Keep
        }
    }
}

/// Lower-cases a host name and strips a trailing root dot.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}
