use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::crypto;

/// Forensic actions recorded against a (session, signer) chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IntentAction {
    SessionViewed,
    DocumentViewed,
    SectionInitialed,
    SignatureSubmitted,
    ConsentGiven,
    ConsentRevoked,
    OtpRequested,
    OtpVerified,
    OtpFailed,
    RejectionSubmitted,
    LinkAccessed,
    PageScrolled,
    DownloadRequested,
}

impl IntentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionViewed => "session-viewed",
            Self::DocumentViewed => "document-viewed",
            Self::SectionInitialed => "section-initialed",
            Self::SignatureSubmitted => "signature-submitted",
            Self::ConsentGiven => "consent-given",
            Self::ConsentRevoked => "consent-revoked",
            Self::OtpRequested => "otp-requested",
            Self::OtpVerified => "otp-verified",
            Self::OtpFailed => "otp-failed",
            Self::RejectionSubmitted => "rejection-submitted",
            Self::LinkAccessed => "link-accessed",
            Self::PageScrolled => "page-scrolled",
            Self::DownloadRequested => "download-requested",
        }
    }
}

/// Client environment captured with every action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// The text shown to a signer plus the manner and moment they accepted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentEvidence {
    pub text: String,
    pub method: String,
    pub scope: String,
    pub timestamp: DateTime<Utc>,
}

/// One forensic action log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRecord {
    pub record_id: String,
    pub session_id: String,
    pub document_id: String,
    pub signer_id: String,
    pub signer_email: String,
    pub signer_name: String,
    pub action: IntentAction,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub device: DeviceEvidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent: Option<ConsentEvidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub record_hash: String,
    pub previous_record_hash: String,
    pub sequence: u32,
}

/// Canonical serialization input for the record hash. Field order is fixed;
/// serde_json preserves struct declaration order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IntentHashInput<'a> {
    record_id: &'a str,
    session_id: &'a str,
    signer_id: &'a str,
    action: &'a str,
    timestamp: String,
    ip_address: &'a str,
    device_fingerprint: &'a str,
    previous_record_hash: &'a str,
    sequence: u32,
}

impl IntentRecord {
    /// Recompute the record hash from the stored fields.
    pub fn compute_record_hash(&self) -> String {
        let input = IntentHashInput {
            record_id: &self.record_id,
            session_id: &self.session_id,
            signer_id: &self.signer_id,
            action: self.action.as_str(),
            timestamp: self.timestamp.to_rfc3339(),
            ip_address: self.ip_address.as_deref().unwrap_or(""),
            device_fingerprint: self.device.device_fingerprint.as_deref().unwrap_or(""),
            previous_record_hash: &self.previous_record_hash,
            sequence: self.sequence,
        };
        let canonical = serde_json::to_string(&input).unwrap_or_default();
        crypto::sha256_hex(&canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> IntentRecord {
        IntentRecord {
            record_id: "rec_1".into(),
            session_id: "sess_1".into(),
            document_id: "doc_1".into(),
            signer_id: "sgn_1".into(),
            signer_email: "a@example.com".into(),
            signer_name: "A".into(),
            action: IntentAction::DocumentViewed,
            timestamp: Utc::now(),
            ip_address: Some("127.0.0.1".into()),
            device: DeviceEvidence {
                device_fingerprint: Some("dev".into()),
                ..Default::default()
            },
            consent: None,
            section_id: None,
            context: Default::default(),
            record_hash: String::new(),
            previous_record_hash: crypto::GENESIS_MARKER.into(),
            sequence: 1,
        }
    }

    #[test]
    fn record_hash_deterministic() {
        let r = record();
        assert_eq!(r.compute_record_hash(), r.compute_record_hash());
    }

    #[test]
    fn record_hash_covers_previous_hash() {
        let mut r = record();
        let before = r.compute_record_hash();
        r.previous_record_hash = "x".repeat(64);
        assert_ne!(before, r.compute_record_hash());
    }

    #[test]
    fn action_serializes_kebab_case() {
        let s = serde_json::to_string(&IntentAction::OtpRequested).unwrap();
        assert_eq!(s, "\"otp-requested\"");
        assert_eq!(IntentAction::OtpRequested.as_str(), "otp-requested");
    }
}
