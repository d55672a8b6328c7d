use async_trait::async_trait;
use clap::Parser;
use futures::AsyncWriteExt;
use futures::StreamExt;
use rustls_autocert::caches::SqlCache;
use rustls_autocert::{IssueError, Issuer, ManagerConfig, Order};
use std::net::Ipv6Addr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    /// Domains
    #[clap(short)]
    domains: Vec<String>,

    /// Fixed certificate chain, used together with --key
    #[clap(long)]
    cert: Option<PathBuf>,

    /// Private key of the fixed certificate
    #[clap(long)]
    key: Option<PathBuf>,

    /// Cache directory
    #[clap(short)]
    cache: Option<PathBuf>,

    /// SQLite database to cache certificates in, preferred over --cache
    #[clap(long)]
    db: Option<String>,

    #[clap(short, long, default_value = "8443")]
    port: u16,
}

/// Signs every order itself instead of talking to an ACME directory.
struct SelfSigned;

#[async_trait]
impl Issuer for SelfSigned {
    async fn acquire(&self, order: &Order<'_>) -> Result<Vec<u8>, IssueError> {
        log::info!("self signing {} instead of ordering from {}", order.domain, order.directory_url);
        let key = rcgen::KeyPair::generate()?;
        let cert = rcgen::CertificateParams::new(vec![order.domain.to_string()])?.self_signed(&key)?;
        Ok(format!("{}\n{}", key.serialize_pem(), cert.pem()).into_bytes())
    }
}

#[async_std::main]
async fn main() {
    simple_logger::init_with_level(log::Level::Info).unwrap();
    let args = Args::parse();

    let mut config = ManagerConfig::new(args.domains)
        .cert_file(args.cert)
        .key_file(args.key)
        .issuer(SelfSigned)
        .accept_terms_of_service(true);
    config = match (args.db, args.cache) {
        (Some(db), _) => {
            let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", db)).await.unwrap();
            config.cache(SqlCache::new(pool, "certs").await.unwrap())
        }
        (None, Some(dir)) => config.cache_dir(dir),
        (None, None) => config,
    };
    let manager = config.build().await.unwrap();

    let listener = manager.listener((Ipv6Addr::UNSPECIFIED, args.port)).await.unwrap();
    let mut incoming = listener.incoming();
    while let Some(tls) = incoming.next().await {
        let mut tls = tls.unwrap();
        async_std::task::spawn(async move {
            tls.write_all(HELLO).await.unwrap();
            tls.close().await.unwrap();
        });
    }
    unreachable!()
}

const HELLO: &[u8] = br#"HTTP/1.1 200 OK
Content-Length: 10
Content-Type: text/plain; charset=utf-8

Hello Tls!"#;
