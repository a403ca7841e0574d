use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::{SignatureType, SigningOrder};
use crate::utils::crypto;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    Draft,
    Pending,
    Partial,
    ThresholdMet,
    Finalized,
    Expired,
    Rejected,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finalized | Self::Expired | Self::Rejected | Self::Cancelled
        )
    }
}

/// One invited party on a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterparty {
    pub name: String,
    pub email: String,
    pub role: String,
    pub signature_type: SignatureType,
    pub required: bool,
    pub invited_at: DateTime<Utc>,
    pub signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    pub rejected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

/// A collected signature. `signature_hash` follows the canonical payload
/// construction; `combined_hash` chains each signature onto the previous
/// combined hash (the evolving document hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    pub signature_id: String,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_role: String,
    pub signature_type: SignatureType,
    pub signed_at: DateTime<Utc>,
    /// Document hash at the moment of signing.
    pub document_hash: String,
    /// Stored so verification can re-derive the full payload.
    pub merkle_root: String,
    pub signature_hash: String,
    pub combined_hash: String,
    pub previous_signature_hash: String,
    pub sequence: u32,
    pub status: String,
    pub device_fingerprint: String,
    pub platform: String,
}

impl SignatureRecord {
    /// Recompute the signature hash from the stored fields.
    pub fn recompute_hash(&self) -> String {
        crypto::signature_hash(&crypto::SignatureInput {
            signature_id: &self.signature_id,
            name: &self.signer_name,
            email: &self.signer_email,
            role: &self.signer_role,
            signature_type: self.signature_type.as_str(),
            document_hash: &self.document_hash,
            merkle_root: &self.merkle_root,
            signed_at: &self.signed_at.to_rfc3339(),
            device_fingerprint: &self.device_fingerprint,
        })
    }
}

/// Threshold signature collection around a document, independent of the
/// per-signer URL UX.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigWorkflow {
    pub workflow_id: String,
    pub document_id: String,
    pub document_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub initiated_by: String,
    pub threshold: u32,
    pub ordering: SigningOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub counterparties: Vec<Counterparty>,
    /// Signatures keyed by signer email. BTreeMap keeps serialization
    /// deterministic.
    pub signatures: BTreeMap<String, SignatureRecord>,
    pub signature_count: u32,
    pub status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub record_hash: String,
}

impl MultisigWorkflow {
    pub fn threshold_met(&self) -> bool {
        self.signature_count >= self.threshold
    }

    pub fn all_required_signed(&self) -> bool {
        self.counterparties
            .iter()
            .filter(|c| c.required)
            .all(|c| c.signed)
    }

    /// Signatures ordered by signing time (then sequence for stability).
    pub fn signatures_by_signed_at(&self) -> Vec<&SignatureRecord> {
        let mut sigs: Vec<&SignatureRecord> = self.signatures.values().collect();
        sigs.sort_by(|a, b| {
            a.signed_at
                .cmp(&b.signed_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        sigs
    }

    /// The evolving document hash: last combined hash, or the original
    /// document hash before any signature.
    pub fn current_document_hash(&self) -> String {
        self.signatures
            .values()
            .max_by_key(|s| s.sequence)
            .map(|s| s.combined_hash.clone())
            .unwrap_or_else(|| self.document_hash.clone())
    }

    /// The most recent signature hash, or the genesis hash before any.
    pub fn last_signature_hash(&self) -> String {
        self.signatures
            .values()
            .max_by_key(|s| s.sequence)
            .map(|s| s.signature_hash.clone())
            .unwrap_or_else(crypto::genesis_signature_hash)
    }

    /// Deterministic self-hash over identity, threshold, count, the sorted
    /// (email:sigHash:signedAt) list and status.
    pub fn compute_record_hash(&self) -> String {
        let mut parts = vec![
            self.workflow_id.clone(),
            self.document_id.clone(),
            self.document_hash.clone(),
            self.threshold.to_string(),
            self.signature_count.to_string(),
        ];
        for s in self.signatures_by_signed_at() {
            parts.push(format!(
                "{}:{}:{}",
                s.signer_email,
                s.signature_hash,
                s.signed_at.to_rfc3339()
            ));
        }
        parts.push(serde_json::to_string(&self.status).unwrap_or_default());
        crypto::sha256_hex(&parts.join("|"))
    }

    pub fn rehash(&mut self) {
        self.record_hash = self.compute_record_hash();
    }
}

/// Exported proof that a workflow reached threshold and was finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureCertificate {
    pub certificate_id: String,
    pub workflow_id: String,
    pub document_id: String,
    pub document_hash: String,
    pub threshold: u32,
    pub signers: Vec<CertificateSigner>,
    pub finalized_at: DateTime<Utc>,
    pub certificate_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSigner {
    pub name: String,
    pub email: String,
    pub role: String,
    pub signature_hash: String,
    pub signed_at: DateTime<Utc>,
}

impl SignatureCertificate {
    /// certificateHash = SHA-256 over (documentId, documentHash,
    /// [signers sorted by signedAt]::(email:sigHash:signedAt), threshold,
    /// finalizedAt).
    pub fn compute_hash(
        document_id: &str,
        document_hash: &str,
        signers: &[CertificateSigner],
        threshold: u32,
        finalized_at: &DateTime<Utc>,
    ) -> String {
        let mut parts = vec![document_id.to_string(), document_hash.to_string()];
        for s in signers {
            parts.push(format!(
                "{}:{}:{}",
                s.email,
                s.signature_hash,
                s.signed_at.to_rfc3339()
            ));
        }
        parts.push(threshold.to_string());
        parts.push(finalized_at.to_rfc3339());
        crypto::sha256_hex(&parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_status_terminal() {
        assert!(WorkflowStatus::Finalized.is_terminal());
        assert!(WorkflowStatus::Rejected.is_terminal());
        assert!(!WorkflowStatus::Partial.is_terminal());
    }

    #[test]
    fn certificate_hash_deterministic() {
        let finalized = Utc::now();
        let signers = vec![CertificateSigner {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            role: "ceo".into(),
            signature_hash: "s".repeat(64),
            signed_at: finalized,
        }];
        let a = SignatureCertificate::compute_hash("d1", "h1", &signers, 1, &finalized);
        let b = SignatureCertificate::compute_hash("d1", "h1", &signers, 1, &finalized);
        assert_eq!(a, b);
        let c = SignatureCertificate::compute_hash("d1", "h2", &signers, 1, &finalized);
        assert_ne!(a, c);
    }
}
