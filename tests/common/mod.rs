#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use rcgen::{date_time_ymd, BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::CertificateDer;
use rustls_autocert::{IssueError, Issuer, Order};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

/// Signs leaf certificates, in place of an ACME directory.
pub struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "Test CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// Returns `(certificate pem, key pem)`.
    pub fn leaf(&self, names: &[&str], validity: Option<(DateTime<Utc>, DateTime<Utc>)>) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
        params.distinguished_name.push(DnType::CommonName, names.first().copied().unwrap_or("leaf"));
        if let Some((not_before, not_after)) = validity {
            params.not_before = date_time_ymd(not_before.year(), not_before.month() as u8, not_before.day() as u8);
            params.not_after = date_time_ymd(not_after.year(), not_after.month() as u8, not_after.day() as u8);
        }
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    /// Private key followed by the chain, the layout issuers return.
    pub fn combined(&self, names: &[&str], validity: Option<(DateTime<Utc>, DateTime<Utc>)>) -> Vec<u8> {
        let (cert, key) = self.leaf(names, validity);
        format!("{}\n{}", key, cert).into_bytes()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    Issue,
    Fail,
    Hang,
    /// Issues a certificate that is valid for another name.
    WrongName,
}

/// Issuer recording every order it receives.
pub struct SpyIssuer {
    ca: TestCa,
    calls: AtomicUsize,
    domains: Mutex<Vec<String>>,
    behavior: Mutex<Behavior>,
    validity: Mutex<Option<(DateTime<Utc>, DateTime<Utc>)>>,
    delay: Duration,
}

impl SpyIssuer {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            ca: TestCa::new(),
            calls: AtomicUsize::new(0),
            domains: Mutex::new(vec![]),
            behavior: Mutex::new(Behavior::Issue),
            validity: Mutex::new(None),
            delay,
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_validity(&self, validity: Option<(DateTime<Utc>, DateTime<Utc>)>) {
        *self.validity.lock().unwrap() = validity;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn domains(&self) -> Vec<String> {
        self.domains.lock().unwrap().clone()
    }

    pub fn ca(&self) -> &TestCa {
        &self.ca
    }
}

#[async_trait]
impl Issuer for SpyIssuer {
    async fn acquire(&self, order: &Order<'_>) -> Result<Vec<u8>, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.domains.lock().unwrap().push(order.domain.to_string());
        if !self.delay.is_zero() {
            async_std::task::sleep(self.delay).await;
        }
        let behavior = *self.behavior.lock().unwrap();
        let validity = *self.validity.lock().unwrap();
        match behavior {
            Behavior::Issue => Ok(self.ca.combined(&[order.domain], validity)),
            Behavior::WrongName => Ok(self.ca.combined(&["elsewhere.example"], validity)),
            Behavior::Fail => Err("acme directory unreachable".into()),
            Behavior::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
