use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::crypto;

pub const ANCHOR_ENGINE_ID: &str = "doc-intelligence-engine";
pub const ANCHOR_PROTOCOL: &str = "sovereign-anchor-v1";

/// Deterministic memo embedded in every anchor transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorMemo {
    pub engine: String,
    pub protocol: String,
    pub sha256: String,
    pub merkle_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub anchored_at: DateTime<Utc>,
    pub memo_hash: String,
}

impl AnchorMemo {
    /// Canonical byte sequence: sorted-key pipe-joined `k:v` serialization of
    /// the memo body (everything except `memo_hash`).
    pub fn canonical_string(&self) -> String {
        let mut fields: BTreeMap<&str, String> = BTreeMap::new();
        fields.insert("anchoredAt", self.anchored_at.to_rfc3339());
        if let Some(ch) = &self.canonical_hash {
            fields.insert("canonicalHash", ch.clone());
        }
        fields.insert("engine", self.engine.clone());
        fields.insert("merkleRoot", self.merkle_root.clone());
        fields.insert("protocol", self.protocol.clone());
        fields.insert("sha256", self.sha256.clone());
        if let Some(sku) = &self.sku {
            fields.insert("sku", sku.clone());
        }
        fields
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn compute_memo_hash(&self) -> String {
        crypto::sha256_hex(&self.canonical_string())
    }
}

/// A secondary anchor sharing the primary anchor's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedundantAnchor {
    pub chain: String,
    pub tx_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub anchored_at: DateTime<Utc>,
}

/// One entry in the global anchor chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    pub anchor_id: String,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub chain: String,
    pub tx_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub memo: AnchorMemo,
    /// SHA-256 of the anchored document content.
    pub document_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_cid: Option<String>,
    pub previous_anchor_hash: String,
    pub sequence: u64,
    pub record_hash: String,
    pub anchored_at: DateTime<Utc>,
    #[serde(default)]
    pub redundant_anchors: Vec<RedundantAnchor>,
}

impl AnchorRecord {
    /// recordHash over fixed fields in fixed order.
    pub fn compute_record_hash(&self) -> String {
        crypto::sha256_hex(&format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.anchor_id,
            self.document_id,
            self.chain,
            self.tx_hash,
            self.memo.memo_hash,
            self.document_fingerprint,
            self.previous_anchor_hash,
            self.sequence
        ))
    }
}

/// Per-field validity report for one anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorVerification {
    pub anchor_id: String,
    pub sequence: u64,
    pub valid: bool,
    pub record_hash_valid: bool,
    pub memo_hash_valid: bool,
    pub chain_link_valid: bool,
    pub issues: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memo() -> AnchorMemo {
        AnchorMemo {
            engine: ANCHOR_ENGINE_ID.into(),
            protocol: ANCHOR_PROTOCOL.into(),
            sha256: "a".repeat(64),
            merkle_root: "b".repeat(64),
            canonical_hash: None,
            sku: Some("SKU-1".into()),
            anchored_at: Utc::now(),
            memo_hash: String::new(),
        }
    }

    #[test]
    fn memo_keys_are_sorted() {
        let m = memo();
        let s = m.canonical_string();
        let keys: Vec<&str> = s.split('|').map(|kv| kv.split(':').next().unwrap()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(s.starts_with("anchoredAt:"));
    }

    #[test]
    fn memo_hash_deterministic() {
        let mut m = memo();
        m.memo_hash = m.compute_memo_hash();
        assert_eq!(m.memo_hash, m.compute_memo_hash());
        m.sha256 = "c".repeat(64);
        assert_ne!(m.memo_hash, m.compute_memo_hash());
    }

    #[test]
    fn record_hash_covers_chain_link() {
        let mut m = memo();
        m.memo_hash = m.compute_memo_hash();
        let mut r = AnchorRecord {
            anchor_id: "anc_1".into(),
            document_id: "doc_1".into(),
            sku: None,
            chain: "xrpl".into(),
            tx_hash: "t".repeat(64),
            cid: None,
            memo: m,
            document_fingerprint: "a".repeat(64),
            signature_hash: None,
            encrypted_cid: None,
            previous_anchor_hash: crypto::GENESIS_MARKER.into(),
            sequence: 1,
            record_hash: String::new(),
            anchored_at: Utc::now(),
            redundant_anchors: vec![],
        };
        let before = r.compute_record_hash();
        r.previous_anchor_hash = "x".repeat(64);
        assert_ne!(before, r.compute_record_hash());
    }
}
