//! Certificate records and ledger network status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors returned by a [`super::Ledger`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("certificate not found: {0}")]
    NotFound(String),

    #[error("certificate already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid certificate request: {0}")]
    Invalid(String),
}

/// Lifecycle of a notarized record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Pending,
    Confirmed,
    Failed,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Pending => "pending",
            CertificateStatus::Confirmed => "confirmed",
            CertificateStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificateStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CertificateStatus::Pending),
            "confirmed" => Ok(CertificateStatus::Confirmed),
            "failed" => Ok(CertificateStatus::Failed),
            other => Err(LedgerError::Invalid(format!("unknown status '{other}'"))),
        }
    }
}

/// A content hash anchored on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    /// `0x`-prefixed hex SHA-256 of `content`
    pub hash: String,
    pub status: CertificateStatus,
    pub content: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Per-status counts over a list of certificates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStatistics {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub failed: usize,
}

impl CertificateStatistics {
    pub fn from_records(records: &[Certificate]) -> Self {
        records.iter().fold(
            Self {
                total: records.len(),
                ..Self::default()
            },
            |mut stats, cert| {
                match cert.status {
                    CertificateStatus::Pending => stats.pending += 1,
                    CertificateStatus::Confirmed => stats.confirmed += 1,
                    CertificateStatus::Failed => stats.failed += 1,
                }
                stats
            },
        )
    }
}

/// Reachability snapshot of the ledger network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub network: String,
    /// Round trip of the status probe in milliseconds
    pub latency: u64,
    pub block_height: u64,
    pub is_connected: bool,
}

/// Human-readable network name for an EVM chain id
pub fn network_name(chain_id: u64) -> String {
    match chain_id {
        1 => "Ethereum Mainnet".to_string(),
        5 => "Goerli Testnet".to_string(),
        11155111 => "Sepolia Testnet".to_string(),
        other => format!("Unknown Network (Chain ID: {other})"),
    }
}
