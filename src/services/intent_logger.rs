use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::models::intent::{ConsentEvidence, DeviceEvidence, IntentAction, IntentRecord};
use crate::store::JsonStore;
use crate::utils::crypto;

const STORE_FILE: &str = "intent-log.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentFile {
    engine: String,
    version: String,
    records: Vec<IntentRecord>,
}

impl Default for IntentFile {
    fn default() -> Self {
        Self {
            engine: "intent-logger".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            records: Vec::new(),
        }
    }
}

pub struct LogIntentParams {
    pub session_id: String,
    pub document_id: String,
    pub signer_id: String,
    pub signer_email: String,
    pub signer_name: String,
    pub action: IntentAction,
    pub ip_address: Option<String>,
    pub device: DeviceEvidence,
    pub consent: Option<ConsentEvidence>,
    pub section_id: Option<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Verification outcome for one signer's subchain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerChainReport {
    pub signer_id: String,
    pub record_count: usize,
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub session_id: String,
    pub valid: bool,
    pub signer_chains: Vec<SignerChainReport>,
}

/// Per-(session, signer) hash chain of forensic actions.
pub struct IntentLogger {
    store: JsonStore,
    inner: RwLock<IntentFile>,
}

impl IntentLogger {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<IntentFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    /// Append one action to the (session, signer) subchain.
    pub async fn log(&self, params: LogIntentParams) -> AppResult<IntentRecord> {
        let mut inner = self.inner.write().await;

        let (previous_record_hash, sequence) = {
            let last = inner
                .records
                .iter()
                .filter(|r| r.session_id == params.session_id && r.signer_id == params.signer_id)
                .last();
            match last {
                Some(prev) => (prev.record_hash.clone(), prev.sequence + 1),
                None => (crypto::GENESIS_MARKER.to_string(), 1),
            }
        };

        let mut record = IntentRecord {
            record_id: crypto::generate_secure_id("int_"),
            session_id: params.session_id,
            document_id: params.document_id,
            signer_id: params.signer_id,
            signer_email: params.signer_email,
            signer_name: params.signer_name,
            action: params.action,
            timestamp: Utc::now(),
            ip_address: params.ip_address,
            device: params.device,
            consent: params.consent,
            section_id: params.section_id,
            context: params.context,
            record_hash: String::new(),
            previous_record_hash,
            sequence,
        };
        record.record_hash = record.compute_record_hash();

        inner.records.push(record.clone());
        self.store.save(&*inner)?;

        tracing::debug!(
            session_id = %record.session_id,
            signer_id = %record.signer_id,
            action = record.action.as_str(),
            sequence = record.sequence,
            "intent recorded"
        );
        metrics::counter!("intent_records_total").increment(1);

        Ok(record)
    }

    /// Walk every signer subchain of a session, verifying linkage and
    /// recomputed hashes.
    pub async fn verify_chain(&self, session_id: &str) -> ChainVerification {
        let inner = self.inner.read().await;

        let mut by_signer: BTreeMap<String, Vec<&IntentRecord>> = BTreeMap::new();
        for record in inner.records.iter().filter(|r| r.session_id == session_id) {
            by_signer
                .entry(record.signer_id.clone())
                .or_default()
                .push(record);
        }

        let mut signer_chains = Vec::new();
        for (signer_id, records) in by_signer {
            let mut issues = Vec::new();
            let mut expected_prev = crypto::GENESIS_MARKER.to_string();
            for (i, record) in records.iter().enumerate() {
                let expected_seq = (i + 1) as u32;
                if record.sequence != expected_seq {
                    issues.push(format!(
                        "Record {} has sequence {} (expected {expected_seq})",
                        record.record_id, record.sequence
                    ));
                }
                if record.previous_record_hash != expected_prev {
                    issues.push(format!(
                        "Record {} breaks the chain: previousRecordHash mismatch",
                        record.record_id
                    ));
                }
                if record.record_hash != record.compute_record_hash() {
                    issues.push(format!(
                        "Record {} hash does not match recomputation",
                        record.record_id
                    ));
                }
                expected_prev = record.record_hash.clone();
            }
            signer_chains.push(SignerChainReport {
                signer_id,
                record_count: records.len(),
                valid: issues.is_empty(),
                issues,
            });
        }

        ChainVerification {
            session_id: session_id.to_string(),
            valid: signer_chains.iter().all(|c| c.valid),
            signer_chains,
        }
    }

    /// All records of a session in insertion order, plus chain validity.
    pub async fn session_log(&self, session_id: &str) -> (Vec<IntentRecord>, bool) {
        let records: Vec<IntentRecord> = self
            .inner
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        let valid = self.verify_chain(session_id).await.valid;
        (records, valid)
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Deterministic, human-readable forensic report for a session.
    pub async fn evidence_report(&self, session_id: &str) -> String {
        let (records, _) = self.session_log(session_id).await;
        let verification = self.verify_chain(session_id).await;

        let mut out = String::new();
        out.push_str("SIGNING EVIDENCE REPORT\n");
        out.push_str("=======================\n");
        out.push_str(&format!("Session: {session_id}\n"));
        out.push_str(&format!("Recorded actions: {}\n\n", records.len()));

        for record in &records {
            out.push_str(&format!(
                "[{}] {} by {} <{}>",
                record.timestamp.to_rfc3339(),
                record.action.as_str(),
                record.signer_name,
                record.signer_email
            ));
            if let Some(ip) = &record.ip_address {
                out.push_str(&format!(" from {ip}"));
            }
            if let Some(section) = &record.section_id {
                out.push_str(&format!(" section={section}"));
            }
            out.push('\n');
            if let Some(consent) = &record.consent {
                out.push_str(&format!(
                    "    consent: \"{}\" via {} at {}\n",
                    consent.text,
                    consent.method,
                    consent.timestamp.to_rfc3339()
                ));
            }
        }

        out.push_str("\nCHAIN VERIFICATION\n");
        out.push_str("------------------\n");
        for chain in &verification.signer_chains {
            out.push_str(&format!(
                "Signer {}: {} records, {}\n",
                chain.signer_id,
                chain.record_count,
                if chain.valid { "chain intact" } else { "CHAIN BROKEN" }
            ));
            for issue in &chain.issues {
                out.push_str(&format!("  ! {issue}\n"));
            }
        }
        out.push_str(&format!(
            "Overall: {}\n",
            if verification.valid { "VERIFIED" } else { "FAILED" }
        ));
        out
    }

    /// Test-only tamper hook.
    #[cfg(test)]
    pub async fn tamper_record(&self, index: usize, ip: &str) {
        let mut inner = self.inner.write().await;
        inner.records[index].ip_address = Some(ip.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(session: &str, signer: &str, action: IntentAction) -> LogIntentParams {
        LogIntentParams {
            session_id: session.into(),
            document_id: "doc_1".into(),
            signer_id: signer.into(),
            signer_email: format!("{signer}@example.com"),
            signer_name: signer.to_uppercase(),
            action,
            ip_address: Some("10.0.0.1".into()),
            device: DeviceEvidence {
                device_fingerprint: Some("dev-1".into()),
                ..Default::default()
            },
            consent: None,
            section_id: None,
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn subchains_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let logger = IntentLogger::open(dir.path()).unwrap();

        let a1 = logger
            .log(params("s1", "alice", IntentAction::DocumentViewed))
            .await
            .unwrap();
        let b1 = logger
            .log(params("s1", "bob", IntentAction::DocumentViewed))
            .await
            .unwrap();
        let a2 = logger
            .log(params("s1", "alice", IntentAction::SignatureSubmitted))
            .await
            .unwrap();

        assert_eq!(a1.sequence, 1);
        assert_eq!(b1.sequence, 1);
        assert_eq!(a2.sequence, 2);
        assert_eq!(a1.previous_record_hash, crypto::GENESIS_MARKER);
        assert_eq!(b1.previous_record_hash, crypto::GENESIS_MARKER);
        assert_eq!(a2.previous_record_hash, a1.record_hash);
    }

    #[tokio::test]
    async fn verify_detects_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let logger = IntentLogger::open(dir.path()).unwrap();

        logger
            .log(params("s1", "alice", IntentAction::DocumentViewed))
            .await
            .unwrap();
        logger
            .log(params("s1", "alice", IntentAction::SignatureSubmitted))
            .await
            .unwrap();

        assert!(logger.verify_chain("s1").await.valid);

        logger.tamper_record(0, "evil").await;
        let report = logger.verify_chain("s1").await;
        assert!(!report.valid);
        assert!(!report.signer_chains[0].issues.is_empty());
    }

    #[tokio::test]
    async fn evidence_report_lists_actions() {
        let dir = tempfile::tempdir().unwrap();
        let logger = IntentLogger::open(dir.path()).unwrap();

        logger
            .log(params("s1", "alice", IntentAction::DocumentViewed))
            .await
            .unwrap();
        logger
            .log(params("s1", "alice", IntentAction::SignatureSubmitted))
            .await
            .unwrap();

        let report = logger.evidence_report("s1").await;
        assert!(report.contains("document-viewed"));
        assert!(report.contains("signature-submitted"));
        assert!(report.contains("VERIFIED"));
    }
}
