//! In-process ledger that simulates anchoring content hashes
//!
//! Every created record is confirmed immediately in a new block. Nothing is
//! sent to a real network.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;

use super::Ledger;
use super::types::{Certificate, CertificateStatus, LedgerError, NetworkStatus, network_name};

/// Record present in every fresh [`MockLedger`]
pub const SEED_CERTIFICATE_ID: &str = "cert_001";

const SEED_CONTENT: &str = "Headache symptom consultation and AI reply";
const SEED_BLOCK: u64 = 18_450_024;

/// `0x`-prefixed hex SHA-256 of `content`
pub fn hash_content(content: &str) -> String {
    format!("0x{}", hex::encode(Sha256::digest(content.as_bytes())))
}

struct LedgerState {
    records: BTreeMap<String, Certificate>,
    block_height: u64,
}

pub struct MockLedger {
    chain_id: u64,
    state: TokioMutex<LedgerState>,
}

impl MockLedger {
    pub fn new(chain_id: u64) -> Self {
        let seed = seed_certificate(chain_id);
        let mut records = BTreeMap::new();
        records.insert(seed.id.clone(), seed);

        info!(
            "MockLedger initialized on {} with {} record(s)",
            network_name(chain_id),
            records.len()
        );

        Self {
            chain_id,
            state: TokioMutex::new(LedgerState {
                records,
                block_height: SEED_BLOCK,
            }),
        }
    }
}

/// Deterministic stand-in for a transaction hash
fn tx_hash(chain_id: u64, block: u64, id: &str, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chain_id.to_be_bytes());
    hasher.update(block.to_be_bytes());
    hasher.update(id.as_bytes());
    hasher.update(content_hash.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

fn seed_certificate(chain_id: u64) -> Certificate {
    let hash = hash_content(SEED_CONTENT);
    let tx_hash = tx_hash(chain_id, SEED_BLOCK, SEED_CERTIFICATE_ID, &hash);
    let created_at = Utc
        .with_ymd_and_hms(2025, 8, 9, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);

    Certificate {
        id: SEED_CERTIFICATE_ID.to_string(),
        hash,
        status: CertificateStatus::Confirmed,
        content: SEED_CONTENT.to_string(),
        tx_hash,
        block_number: SEED_BLOCK,
        created_at,
        confirmed_at: Some(created_at),
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn network_status(&self) -> Result<NetworkStatus, LedgerError> {
        let start = Instant::now();
        let block_height = self.state.lock().await.block_height;

        Ok(NetworkStatus {
            network: network_name(self.chain_id),
            latency: start.elapsed().as_millis() as u64,
            block_height,
            is_connected: true,
        })
    }

    async fn create_record(&self, id: &str, content: &str) -> Result<Certificate, LedgerError> {
        if id.trim().is_empty() {
            return Err(LedgerError::Invalid("id is required".to_string()));
        }
        if content.is_empty() {
            return Err(LedgerError::Invalid("content is required".to_string()));
        }

        let mut state = self.state.lock().await;
        if state.records.contains_key(id) {
            return Err(LedgerError::AlreadyExists(id.to_string()));
        }

        state.block_height += 1;
        let block_number = state.block_height;
        let hash = hash_content(content);
        let now = Utc::now();
        let certificate = Certificate {
            id: id.to_string(),
            tx_hash: tx_hash(self.chain_id, block_number, id, &hash),
            hash,
            status: CertificateStatus::Confirmed,
            content: content.to_string(),
            block_number,
            created_at: now,
            confirmed_at: Some(now),
        };
        state
            .records
            .insert(certificate.id.clone(), certificate.clone());

        info!(
            cert_id = %certificate.id,
            tx_hash = %certificate.tx_hash,
            content_hash = %certificate.hash,
            "Certificate created"
        );
        Ok(certificate)
    }

    async fn verify_record(&self, id: &str) -> Result<(Certificate, bool), LedgerError> {
        let state = self.state.lock().await;
        let certificate = state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        let valid = certificate.hash == hash_content(&certificate.content);
        Ok((certificate, valid))
    }

    async fn list_records(
        &self,
        status: Option<CertificateStatus>,
    ) -> Result<Vec<Certificate>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|cert| status.is_none_or(|s| cert.status == s))
            .cloned()
            .collect())
    }
}
