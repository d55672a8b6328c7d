use crate::Cache;
use async_trait::async_trait;
use std::fmt;

pub type IssueError = Box<dyn std::error::Error + Send + Sync>;

/// A certificate order handed to an [Issuer].
pub struct Order<'a> {
    pub domain: &'a str,
    pub directory_url: &'a str,
    /// Account contacts, email addresses carry a `mailto:` prefix.
    pub contact: &'a [String],
    /// Storage for account keys and other material the issuer wants to keep across restarts.
    pub cache: &'a dyn Cache,
}

impl fmt::Debug for Order<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Order")
            .field("domain", &self.domain)
            .field("directory_url", &self.directory_url)
            .field("contact", &self.contact)
            .finish_non_exhaustive()
    }
}

/// The ACME side of automatic certificates.
///
/// An issuer runs the whole ACME exchange for one domain (account, order, challenge, finalize)
/// and returns the private key followed by the certificate chain as PEM. It may take network
/// round trips and may fail; callers bound it with a timeout.
#[async_trait]
pub trait Issuer: Send + Sync {
    async fn acquire(&self, order: &Order<'_>) -> Result<Vec<u8>, IssueError>;
}
