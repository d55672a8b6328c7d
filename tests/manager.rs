mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{memory_pool, Behavior, SpyIssuer, TestCa};
use futures::future::join_all;
use rustls_autocert::caches::SqlCache;
use rustls_autocert::{Cache, CacheError, ClientHelloInfo, Error, ManagerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn sni(name: &str) -> ClientHelloInfo {
    ClientHelloInfo::new(Some(name))
}

fn no_sni() -> ClientHelloInfo {
    ClientHelloInfo::new(None::<String>)
}

fn write_files(dir: &TempDir, cert: &[u8], key: &[u8]) -> (PathBuf, PathBuf) {
    let cert_file = dir.path().join("cert.pem");
    let key_file = dir.path().join("key.pem");
    std::fs::write(&cert_file, cert).unwrap();
    std::fs::write(&key_file, key).unwrap();
    (cert_file, key_file)
}

async fn sql_cache() -> Arc<SqlCache> {
    Arc::new(SqlCache::new(memory_pool().await, "certs").await.unwrap())
}

fn automated(domains: &[&str], issuer: &Arc<SpyIssuer>, cache: &Arc<SqlCache>) -> ManagerConfig {
    ManagerConfig::new(domains.iter().copied())
        .issuer_arc(issuer.clone())
        .cache_arc(cache.clone())
        .accept_terms_of_service(true)
}

#[async_std::test]
async fn fixed_certificate_is_returned_for_any_key() {
    let ca = TestCa::new();
    let (cert_pem, key_pem) = ca.leaf(&["fixed.example"], None);
    let dir = TempDir::new().unwrap();
    let (cert_file, key_file) = write_files(&dir, cert_pem.as_bytes(), key_pem.as_bytes());
    let issuer = SpyIssuer::new();
    let manager = ManagerConfig::new(["other.example"])
        .cert_files(cert_file, key_file)
        .issuer_arc(issuer.clone())
        .accept_terms_of_service(true)
        .build()
        .await
        .unwrap();

    assert!(manager.uses_fixed_certificate());
    assert_eq!(manager.domains(), ["fixed.example".to_string()]);
    let leaf = pem::parse(&cert_pem).unwrap().into_contents();
    for key in ["fixed.example", "other.example", "anything", ""] {
        let cert = manager.certificate(key).await.unwrap().unwrap();
        assert_eq!(cert.leaf().as_ref(), leaf.as_slice());
    }
    for hello in [sni("unrelated.example"), no_sni()] {
        let cert = manager.get_certificate(&hello).await.unwrap().unwrap();
        assert_eq!(cert.leaf().as_ref(), leaf.as_slice());
    }
    assert_eq!(issuer.calls(), 0);
}

#[async_std::test]
async fn missing_sni_falls_back_to_first_domain() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let manager = automated(&["a.example", "b.example"], &issuer, &cache).build().await.unwrap();

    let first = manager.get_certificate(&no_sni()).await.unwrap().unwrap();
    assert_eq!(first.domains(), ["a.example".to_string()]);
    let second = manager.get_certificate(&sni("b.example")).await.unwrap().unwrap();
    assert_eq!(second.domains(), ["b.example".to_string()]);
    assert_eq!(issuer.domains(), vec!["a.example".to_string(), "b.example".to_string()]);
}

#[async_std::test]
async fn server_name_is_normalized() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let manager = automated(&["A.Example."], &issuer, &cache).build().await.unwrap();
    assert_eq!(manager.domains(), ["a.example".to_string()]);
    let cert = manager.get_certificate(&sni("A.EXAMPLE")).await.unwrap().unwrap();
    assert!(cert.covers("a.example"));
    assert_eq!(issuer.domains(), vec!["a.example".to_string()]);
}

#[async_std::test]
async fn unlisted_domain_is_rejected() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();
    let err = manager.get_certificate(&sni("evil.example")).await.unwrap_err();
    assert!(matches!(&err, Error::DomainNotAllowed(domain) if domain == "evil.example"), "{:?}", err);
    assert_eq!(issuer.calls(), 0);
    assert!(cache.get("evil.example").await.unwrap().is_miss());
}

#[async_std::test]
async fn no_source_yields_no_certificate() {
    let manager = ManagerConfig::new(Vec::<String>::new()).build().await.unwrap();
    assert!(!manager.uses_fixed_certificate());
    assert!(!manager.uses_automatic_certificates());
    assert!(manager.certificate("a.example").await.unwrap().is_none());
    assert!(manager.get_certificate(&no_sni()).await.unwrap().is_none());
    assert!(manager.get_certificate(&sni("a.example")).await.unwrap().is_none());
}

#[async_std::test]
async fn automatic_certificates_need_an_issuer() {
    let err = ManagerConfig::new(["a.example"]).build().await.unwrap_err();
    assert!(matches!(&err, Error::MissingIssuer(domains) if domains == &["a.example".to_string()]), "{:?}", err);
}

#[async_std::test]
async fn terms_of_service_must_be_accepted() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let manager = automated(&["a.example"], &issuer, &cache)
        .accept_terms_of_service(false)
        .build()
        .await
        .unwrap();
    let err = manager.get_certificate(&sni("a.example")).await.unwrap_err();
    assert!(matches!(err, Error::TermsNotAccepted), "{:?}", err);
    assert_eq!(issuer.calls(), 0);
}

#[async_std::test]
async fn cached_certificate_is_served_without_terms() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    cache.put("a.example", &issuer.ca().combined(&["a.example"], None)).await.unwrap();
    let manager = automated(&["a.example"], &issuer, &cache)
        .accept_terms_of_service(false)
        .build()
        .await
        .unwrap();
    assert!(manager.get_certificate(&sni("a.example")).await.unwrap().is_some());
    assert_eq!(issuer.calls(), 0);
}

#[async_std::test]
async fn cache_hit_avoids_issuance() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let stored = issuer.ca().combined(&["a.example"], None);
    cache.put("a.example", &stored).await.unwrap();
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();

    let from_lookup = manager.certificate("a.example").await.unwrap().unwrap();
    let from_handshake = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
    assert_eq!(from_lookup.leaf(), from_handshake.leaf());
    assert_eq!(issuer.calls(), 0);
}

#[async_std::test]
async fn cache_miss_issues_and_stores() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();

    assert!(manager.certificate("a.example").await.unwrap().is_none());
    let issued = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
    assert_eq!(issuer.calls(), 1);
    assert!(!cache.get("a.example").await.unwrap().is_miss());
    let stored = manager.certificate("a.example").await.unwrap().unwrap();
    assert_eq!(stored.leaf(), issued.leaf());

    let again = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
    assert_eq!(again.leaf(), issued.leaf());
    assert_eq!(issuer.calls(), 1);
}

#[async_std::test]
async fn unparsable_cache_entry_is_reissued() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    cache.put("a.example", b"not a certificate").await.unwrap();
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();

    let err = manager.certificate("a.example").await.unwrap_err();
    assert!(matches!(err, Error::CachedCertificate { .. }), "{:?}", err);
    assert!(manager.get_certificate(&sni("a.example")).await.unwrap().is_some());
    assert_eq!(issuer.calls(), 1);
    assert!(manager.certificate("a.example").await.unwrap().is_some());
}

#[async_std::test]
async fn concurrent_handshakes_share_one_order() {
    let issuer = SpyIssuer::with_delay(Duration::from_millis(100));
    let cache = sql_cache().await;
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();

    let hello = sni("a.example");
    let results = join_all((0..8).map(|_| manager.get_certificate(&hello))).await;
    let leaves: Vec<_> = results.into_iter().map(|r| r.unwrap().unwrap().leaf().clone()).collect();
    assert!(leaves.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(issuer.calls(), 1);
}

#[async_std::test]
async fn slow_issuance_times_out() {
    let issuer = SpyIssuer::new();
    issuer.set_behavior(Behavior::Hang);
    let cache = sql_cache().await;
    let manager = automated(&["a.example"], &issuer, &cache)
        .handshake_timeout(Duration::from_millis(50))
        .build()
        .await
        .unwrap();
    let err = manager.get_certificate(&sni("a.example")).await.unwrap_err();
    assert!(
        matches!(&err, Error::Timeout { domain, timeout } if domain == "a.example" && *timeout == Duration::from_millis(50)),
        "{:?}",
        err
    );
}

#[async_std::test]
async fn issuer_failures_propagate() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();

    issuer.set_behavior(Behavior::Fail);
    let err = manager.get_certificate(&sni("a.example")).await.unwrap_err();
    assert!(matches!(&err, Error::Issue { domain, .. } if domain == "a.example"), "{:?}", err);

    issuer.set_behavior(Behavior::WrongName);
    let err = manager.get_certificate(&sni("a.example")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidIssuedCertificate { .. }), "{:?}", err);
    assert!(cache.get("a.example").await.unwrap().is_miss());

    issuer.set_behavior(Behavior::Issue);
    assert!(manager.get_certificate(&sni("a.example")).await.unwrap().is_some());
    assert_eq!(issuer.calls(), 3);
}

#[async_std::test]
async fn expired_cached_certificate_is_replaced() {
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let now = Utc::now();
    let expired = issuer
        .ca()
        .combined(&["a.example"], Some((now - ChronoDuration::days(100), now - ChronoDuration::days(10))));
    cache.put("a.example", &expired).await.unwrap();
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();

    let cert = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
    assert!(cert.not_after() > now);
    assert_eq!(issuer.calls(), 1);
    let stored = manager.certificate("a.example").await.unwrap().unwrap();
    assert_eq!(stored.leaf(), cert.leaf());
}

#[async_std::test]
async fn certificate_due_for_renewal_is_served_while_renewing() {
    let issuer = SpyIssuer::with_delay(Duration::from_millis(50));
    let cache = sql_cache().await;
    let now = Utc::now();
    let due = issuer
        .ca()
        .combined(&["a.example"], Some((now - ChronoDuration::days(80), now + ChronoDuration::days(10))));
    cache.put("a.example", &due).await.unwrap();
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();

    let old = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
    assert!(old.not_after() < now + ChronoDuration::days(11));

    let mut renewed = None;
    for _ in 0..200 {
        let cert = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
        if cert.leaf() != old.leaf() {
            renewed = Some(cert);
            break;
        }
        async_std::task::sleep(Duration::from_millis(10)).await;
    }
    let renewed = renewed.expect("certificate was not renewed in the background");
    assert!(renewed.not_after() > now + ChronoDuration::days(365));
    assert_eq!(issuer.calls(), 1);
    let stored = manager.certificate("a.example").await.unwrap().unwrap();
    assert_eq!(stored.leaf(), renewed.leaf());
}

#[async_std::test]
async fn failed_renewal_backs_off() {
    let issuer = SpyIssuer::new();
    issuer.set_behavior(Behavior::Fail);
    let cache = sql_cache().await;
    let now = Utc::now();
    let due = issuer
        .ca()
        .combined(&["a.example"], Some((now - ChronoDuration::days(80), now + ChronoDuration::days(10))));
    cache.put("a.example", &due).await.unwrap();
    let manager = automated(&["a.example"], &issuer, &cache).build().await.unwrap();

    let old = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
    for _ in 0..20 {
        let cert = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
        assert_eq!(cert.leaf(), old.leaf());
        async_std::task::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(issuer.calls(), 1);

    issuer.set_behavior(Behavior::Issue);
    async_std::task::sleep(Duration::from_millis(1100)).await;
    let mut renewed = false;
    for _ in 0..200 {
        let cert = manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
        if cert.leaf() != old.leaf() {
            renewed = true;
            break;
        }
        async_std::task::sleep(Duration::from_millis(10)).await;
    }
    assert!(renewed, "certificate was not renewed after the backoff");
    assert_eq!(issuer.calls(), 2);
}

#[async_std::test]
async fn malformed_fixed_files_are_fatal() {
    let dir = TempDir::new().unwrap();
    let (cert_file, key_file) = write_files(&dir, b"garbage", b"more garbage");
    let err = ManagerConfig::new(["a.example"])
        .cert_files(cert_file, key_file)
        .issuer_arc(SpyIssuer::new())
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FixedCertificate(_)), "{:?}", err);
}

#[async_std::test]
async fn mismatched_fixed_key_is_fatal() {
    let ca = TestCa::new();
    let (cert_pem, _) = ca.leaf(&["fixed.example"], None);
    let (_, other_key) = ca.leaf(&["fixed.example"], None);
    let dir = TempDir::new().unwrap();
    let (cert_file, key_file) = write_files(&dir, cert_pem.as_bytes(), other_key.as_bytes());
    let err = ManagerConfig::new(Vec::<String>::new())
        .cert_files(cert_file, key_file)
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FixedCertificate(_)), "{:?}", err);
}

#[async_std::test]
async fn missing_fixed_files_fall_back_to_automatic() {
    let dir = TempDir::new().unwrap();
    let issuer = SpyIssuer::new();
    let cache = sql_cache().await;
    let manager = automated(&["a.example"], &issuer, &cache)
        .cert_files(dir.path().join("cert.pem"), dir.path().join("key.pem"))
        .build()
        .await
        .unwrap();
    assert!(manager.uses_automatic_certificates());
    assert!(manager.get_certificate(&sni("a.example")).await.unwrap().is_some());
}

#[async_std::test]
async fn cache_directory_is_used_when_no_cache_is_given() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("certs");
    let issuer = SpyIssuer::new();
    let manager = ManagerConfig::new(["a.example"])
        .issuer_arc(issuer.clone())
        .cache_dir(&dir)
        .accept_terms_of_service(true)
        .build()
        .await
        .unwrap();
    manager.get_certificate(&sni("a.example")).await.unwrap().unwrap();
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
    assert!(manager.certificate("a.example").await.unwrap().is_some());
}

#[async_std::test]
async fn unusable_cache_directory_is_fatal() {
    let dir = TempDir::new().unwrap();
    let (cert_file, _) = write_files(&dir, b"x", b"y");
    let err = ManagerConfig::new(["a.example"])
        .issuer_arc(SpyIssuer::new())
        .cache_dir(cert_file)
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cache(CacheError::Directory { .. })), "{:?}", err);
}
