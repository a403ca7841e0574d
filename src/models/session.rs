use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::crypto;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Created,
    Distributed,
    Pending,
    Partial,
    ThresholdMet,
    Completed,
    Expired,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled)
    }
}

/// Per-signer status. Moves only forward along
/// pending → viewed → initialed → signed | rejected | expired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SignerStatus {
    Pending,
    Viewed,
    Initialed,
    Signed,
    Rejected,
    Expired,
}

impl SignerStatus {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Viewed => 1,
            Self::Initialed => 2,
            Self::Signed | Self::Rejected | Self::Expired => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Signed | Self::Rejected | Self::Expired)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureType {
    Author,
    Approver,
    Witness,
    Notary,
    Counterparty,
    Reviewer,
    Certifier,
}

impl SignatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Approver => "approver",
            Self::Witness => "witness",
            Self::Notary => "notary",
            Self::Counterparty => "counterparty",
            Self::Reviewer => "reviewer",
            Self::Certifier => "certifier",
        }
    }
}

impl Default for SignatureType {
    fn default() -> Self {
        Self::Counterparty
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SigningOrder {
    Strict,
    Any,
}

impl Default for SigningOrder {
    fn default() -> Self {
        Self::Any
    }
}

/// Session-level configuration fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub threshold: u32,
    pub require_all: bool,
    pub ordering: SigningOrder,
    pub expires_at: DateTime<Utc>,
    pub require_intent: bool,
    pub require_otp: bool,
    pub base_url: String,
    pub required_initials: Vec<String>,
    pub auto_anchor: bool,
    pub auto_finalize: bool,
    pub auto_notify: bool,
}

/// One delivery attempt on a contact channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRecord {
    pub channel: String,
    pub target: String,
    pub sent_at: DateTime<Utc>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One party within a signing session. Email is the primary identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSigner {
    pub signer_id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub role: String,
    pub signature_type: SignatureType,
    pub required: bool,
    pub contact_channels: Vec<String>,
    pub access_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub status: SignerStatus,
    pub required_initials: Vec<String>,
    pub completed_initials: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub distribution_log: Vec<DistributionRecord>,
    pub view_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_viewed_at: Option<DateTime<Utc>>,
}

/// Artifact references set once a session completes. Immutable afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionArtifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_pdf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merkle_proof: Option<String>,
}

/// A distribution of one document to a fixed set of signers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningSession {
    pub session_id: String,
    pub document_id: String,
    pub document_title: String,
    pub document_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub created_by: String,
    pub signers: Vec<SessionSigner>,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub signature_count: u32,
    pub threshold_met: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<SessionArtifacts>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub record_hash: String,
}

impl SigningSession {
    /// Effective threshold: all required signers when `requireAll`, else the
    /// configured threshold.
    pub fn effective_threshold(&self) -> u32 {
        if self.config.require_all {
            self.signers.iter().filter(|s| s.required).count() as u32
        } else {
            self.config.threshold
        }
    }

    /// Count of required signers who have signed.
    pub fn signed_required_count(&self) -> u32 {
        self.signers
            .iter()
            .filter(|s| s.required && s.status == SignerStatus::Signed)
            .count() as u32
    }

    /// Deterministic self-hash over identity, status, signature count and the
    /// per-signer (email:status:signatureHash|none) tuples.
    pub fn compute_record_hash(&self) -> String {
        let mut parts = vec![
            self.session_id.clone(),
            self.document_id.clone(),
            self.document_hash.clone(),
            serde_json::to_string(&self.status).unwrap_or_default(),
            self.signature_count.to_string(),
        ];
        for s in &self.signers {
            parts.push(format!(
                "{}:{}:{}",
                s.email,
                serde_json::to_string(&s.status).unwrap_or_default(),
                s.signature_hash.as_deref().unwrap_or("none")
            ));
        }
        crypto::sha256_hex(&parts.join("|"))
    }

    pub fn rehash(&mut self) {
        self.record_hash = self.compute_record_hash();
    }

    /// Signing URL for one signer: `{baseUrl}/{accessToken}`.
    pub fn signing_url(&self, signer: &SessionSigner) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), signer.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_status_forward_only_ranks() {
        assert!(SignerStatus::Pending.rank() < SignerStatus::Viewed.rank());
        assert!(SignerStatus::Viewed.rank() < SignerStatus::Initialed.rank());
        assert!(SignerStatus::Initialed.rank() < SignerStatus::Signed.rank());
        assert!(SignerStatus::Signed.is_terminal());
        assert!(SignerStatus::Rejected.is_terminal());
        assert!(!SignerStatus::Viewed.is_terminal());
    }

    #[test]
    fn session_status_serializes_kebab_case() {
        let s = serde_json::to_string(&SessionStatus::ThresholdMet).unwrap();
        assert_eq!(s, "\"threshold-met\"");
    }
}
