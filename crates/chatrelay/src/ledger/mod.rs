//! Certificate notarization facade
//!
//! The HTTP layer talks to a [`Ledger`]; the relay never does. The only
//! implementation is [`MockLedger`], which keeps records in memory.

pub mod mock;
pub mod types;

use async_trait::async_trait;

pub use mock::{MockLedger, SEED_CERTIFICATE_ID, hash_content};
pub use types::{
    Certificate, CertificateStatistics, CertificateStatus, LedgerError, NetworkStatus,
    network_name,
};

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn network_status(&self) -> Result<NetworkStatus, LedgerError>;

    /// Anchor `content` under `id`; ids are unique
    async fn create_record(&self, id: &str, content: &str) -> Result<Certificate, LedgerError>;

    /// Look up a record and check its hash against its content
    async fn verify_record(&self, id: &str) -> Result<(Certificate, bool), LedgerError>;

    /// All records, optionally only those with `status`, ordered by id
    async fn list_records(
        &self,
        status: Option<CertificateStatus>,
    ) -> Result<Vec<Certificate>, LedgerError>;
}
