use crate::{normalize_domain, Cache, CacheLookup, Certificate, CertificateShouldUpdate, Error, Issuer, Order};
use async_std::sync::Mutex as AsyncMutex;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Slot = Arc<AsyncMutex<Option<Certificate>>>;

const MAX_BACKOFF_DOUBLINGS: u32 = 16;

/// Failed background renewals of one domain.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    retry_after: Instant,
}

/// Certificates obtained from an [Issuer] for a fixed set of domains.
///
/// Each domain has its own slot, so concurrent handshakes for one domain wait for a single
/// cache lookup or order instead of starting their own.
#[derive(Clone)]
pub(crate) struct AutomatedSource {
    shared: Arc<Shared>,
}

pub(crate) struct AccountSettings {
    pub directory_url: String,
    pub contact: Vec<String>,
    pub accept_tos: bool,
}

struct Shared {
    domains: Vec<String>,
    issuer: Arc<dyn Issuer>,
    cache: Arc<dyn Cache>,
    account: AccountSettings,
    renew_timeout: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    renewing: Mutex<HashSet<String>>,
    backoff: Mutex<HashMap<String, Backoff>>,
}

impl AutomatedSource {
    pub(crate) fn new(
        domains: Vec<String>,
        issuer: Arc<dyn Issuer>,
        cache: Arc<dyn Cache>,
        account: AccountSettings,
        renew_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                domains,
                issuer,
                cache,
                account,
                renew_timeout,
                slots: Mutex::new(HashMap::new()),
                renewing: Mutex::new(HashSet::new()),
                backoff: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn cache(&self) -> &dyn Cache {
        &*self.shared.cache
    }

    /// Returns a usable certificate for `domain`, from memory, the cache or a new order.
    pub(crate) async fn get(&self, domain: &str) -> Result<Certificate, Error> {
        let domain = normalize_domain(domain);
        if !self.shared.domains.contains(&domain) {
            log::warn!("refusing certificate for {}, not a configured domain", domain);
            return Err(Error::DomainNotAllowed(domain));
        }
        let slot = self.shared.slot(&domain);
        let mut current = slot.lock().await;
        if current.is_none() {
            *current = self.shared.load_cached(&domain).await?;
        }
        if let Some(cert) = current.as_ref() {
            match cert.should_update(Utc::now()) {
                CertificateShouldUpdate::Keep => return Ok(cert.clone()),
                CertificateShouldUpdate::Renew => {
                    self.renew_in_background(&domain);
                    return Ok(cert.clone());
                }
                CertificateShouldUpdate::Expired => log::info!("certificate for {} expired", domain),
            }
        }
        let cert = self.shared.issue(&domain).await?;
        *current = Some(cert.clone());
        Ok(cert)
    }

    fn renew_in_background(&self, domain: &str) {
        if let Some(backoff) = self.shared.backoff.lock().unwrap().get(domain) {
            if Instant::now() < backoff.retry_after {
                log::debug!("renewal for {} backing off after {} failures", domain, backoff.failures);
                return;
            }
        }
        if !self.shared.renewing.lock().unwrap().insert(domain.to_string()) {
            return;
        }
        let shared = self.shared.clone();
        let domain = domain.to_string();
        async_std::task::spawn(async move {
            match async_std::future::timeout(shared.renew_timeout, shared.issue(&domain)).await {
                Ok(Ok(cert)) => {
                    shared.backoff.lock().unwrap().remove(&domain);
                    *shared.slot(&domain).lock().await = Some(cert);
                }
                Ok(Err(err)) => {
                    let wait = shared.renewal_failed(&domain);
                    log::error!("renewal for {} failed, retrying in {:?}: {}", domain, wait, err);
                }
                Err(_) => {
                    let wait = shared.renewal_failed(&domain);
                    log::error!("renewal for {} timed out, retrying in {:?}", domain, wait);
                }
            }
            shared.renewing.lock().unwrap().remove(&domain);
        });
    }
}

impl Shared {
    /// Records a failed renewal and returns how long the next attempt waits.
    fn renewal_failed(&self, domain: &str) -> Duration {
        let mut backoff = self.backoff.lock().unwrap();
        let failures = backoff.get(domain).map_or(0, |b| b.failures);
        let wait = Duration::from_secs(1 << failures);
        backoff.insert(
            domain.to_string(),
            Backoff {
                failures: (failures + 1).min(MAX_BACKOFF_DOUBLINGS),
                retry_after: Instant::now() + wait,
            },
        );
        wait
    }

    fn slot(&self, domain: &str) -> Slot {
        self.slots.lock().unwrap().entry(domain.to_string()).or_default().clone()
    }

    async fn load_cached(&self, domain: &str) -> Result<Option<Certificate>, Error> {
        let pem = match self.cache.get(domain).await? {
            CacheLookup::Hit(pem) => pem,
            CacheLookup::Miss => {
                log::debug!("no cached certificate for {}", domain);
                return Ok(None);
            }
        };
        match Certificate::from_pem(&pem) {
            Ok(cert) if cert.covers(domain) => {
                log::info!("loaded cached certificate for {}", domain);
                Ok(Some(cert))
            }
            Ok(_) => {
                log::warn!("cached certificate does not cover {}, ignoring it", domain);
                Ok(None)
            }
            Err(err) => {
                log::warn!("cached certificate for {} does not parse, ignoring it: {}", domain, err);
                Ok(None)
            }
        }
    }

    async fn issue(&self, domain: &str) -> Result<Certificate, Error> {
        if !self.account.accept_tos {
            return Err(Error::TermsNotAccepted);
        }
        log::info!("ordering certificate for {}", domain);
        let order = Order {
            domain,
            directory_url: &self.account.directory_url,
            contact: &self.account.contact,
            cache: &*self.cache,
        };
        let pem = self.issuer.acquire(&order).await.map_err(|source| Error::Issue {
            domain: domain.to_string(),
            source,
        })?;
        let invalid = |reason: String| Error::InvalidIssuedCertificate {
            domain: domain.to_string(),
            reason,
        };
        let cert = Certificate::from_pem(&pem).map_err(|err| invalid(err.to_string()))?;
        if !cert.covers(domain) {
            return Err(invalid(format!("certificate is for {:?}", cert.domains())));
        }
        if cert.should_update(Utc::now()) == CertificateShouldUpdate::Expired {
            return Err(invalid("certificate is already expired".to_string()));
        }
        if let Err(err) = self.cache.put(domain, &pem).await {
            log::error!("could not cache certificate for {}: {}", domain, err);
        }
        log::info!("deployed new certificate for {}, valid until {}", domain, cert.not_after());
        Ok(cert)
    }
}
