use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::crypto;

/// A content-addressed artifact registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CidRecord {
    pub cid: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    pub source_file: String,
    pub sku: String,
    pub size: u64,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub record_hash: String,
}

impl CidRecord {
    pub fn compute_record_hash(&self) -> String {
        crypto::sha256_hex(&format!(
            "{}|{}|{}|{}|{}|{}",
            self.cid,
            self.sha256,
            self.merkle_root.as_deref().unwrap_or(""),
            self.sku,
            self.size,
            self.registered_at.to_rfc3339()
        ))
    }
}

/// One entry in the single global audit chain covering all documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    pub action: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub previous_chain_hash: String,
    pub chain_hash: String,
    pub sequence: u64,
}

impl EventLogEntry {
    /// chainHash = SHA-256 of action + actor + timestamp + details +
    /// fingerprint + cid + previousChainHash + sequence.
    pub fn compute_chain_hash(&self) -> String {
        let details = serde_json::to_string(&self.details).unwrap_or_default();
        crypto::sha256_hex(&format!(
            "{}{}{}{}{}{}{}{}",
            self.action,
            self.actor,
            self.timestamp.to_rfc3339(),
            details,
            self.fingerprint.as_deref().unwrap_or(""),
            self.cid.as_deref().unwrap_or(""),
            self.previous_chain_hash,
            self.sequence
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_record_hash_covers_sha256() {
        let mut r = CidRecord {
            cid: "bafytest".into(),
            sha256: "a".repeat(64),
            merkle_root: None,
            source_file: "f.md".into(),
            sku: "SKU-1".into(),
            size: 42,
            registered_at: Utc::now(),
            metadata: None,
            record_hash: String::new(),
        };
        let before = r.compute_record_hash();
        r.sha256 = "b".repeat(64);
        assert_ne!(before, r.compute_record_hash());
    }

    #[test]
    fn event_chain_hash_covers_previous() {
        let mut e = EventLogEntry {
            action: "document-registered".into(),
            actor: "system".into(),
            timestamp: Utc::now(),
            details: serde_json::json!({"sku": "SKU-1"}),
            fingerprint: None,
            cid: None,
            previous_chain_hash: crypto::GENESIS_MARKER.into(),
            chain_hash: String::new(),
            sequence: 1,
        };
        let before = e.compute_chain_hash();
        e.previous_chain_hash = "x".repeat(64);
        assert_ne!(before, e.compute_chain_hash());
    }
}
