use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::lifecycle::{IntegrityReport, LifecycleRecord, LifecycleStage, StageTransition};
use crate::store::JsonStore;

const STORE_FILE: &str = "lifecycle-registry.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile {
    engine: String,
    version: String,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    records: Vec<LifecycleRecord>,
}

impl Default for RegistryFile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            engine: "lifecycle-registry".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            created_at: now,
            last_updated: now,
            records: Vec::new(),
        }
    }
}

pub struct CreateLifecycleParams {
    pub document_id: String,
    pub sku: String,
    pub source_file: String,
    pub title: String,
    pub draft_hash: String,
    pub canonical_hash: Option<String>,
    pub merkle_root: Option<String>,
    pub actor: String,
    pub previous_version_id: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct AdvancePayload {
    pub content_hash: String,
    pub cid: Option<String>,
    pub ledger_tx: Option<String>,
    pub chain: Option<String>,
    pub block_height: Option<u64>,
    pub actor: String,
    pub evidence: Option<serde_json::Value>,
}

/// Authoritative per-document state machine with deep integrity checks.
pub struct LifecycleRegistry {
    store: JsonStore,
    inner: RwLock<RegistryFile>,
}

impl LifecycleRegistry {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<RegistryFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    /// Create a lifecycle record at stage *ingested*. Idempotent on document
    /// id: an existing record is returned unchanged.
    pub async fn create_lifecycle(
        &self,
        params: CreateLifecycleParams,
    ) -> AppResult<LifecycleRecord> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .records
            .iter()
            .find(|r| r.document_id == params.document_id)
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let previous_version_hash = params.previous_version_id.as_ref().and_then(|prev| {
            inner
                .records
                .iter()
                .find(|r| &r.document_id == prev)
                .map(|r| r.record_hash.clone())
        });
        let version = params
            .previous_version_id
            .as_ref()
            .and_then(|prev| {
                inner
                    .records
                    .iter()
                    .find(|r| &r.document_id == prev)
                    .map(|r| r.version + 1)
            })
            .unwrap_or(1);

        let mut record = LifecycleRecord {
            document_id: params.document_id.clone(),
            sku: params.sku,
            title: params.title,
            source_file: params.source_file,
            current_stage: LifecycleStage::Ingested,
            version,
            draft_hash: params.draft_hash.clone(),
            compliance_hash: None,
            signed_hash: None,
            canonical_hash: params.canonical_hash,
            merkle_root: params.merkle_root,
            plain_cid: None,
            encrypted_cid: None,
            ledger_tx: None,
            ledger_chain: None,
            block_height: None,
            certificate_hash: None,
            previous_version_id: params.previous_version_id,
            previous_version_hash,
            transitions: vec![StageTransition {
                stage: LifecycleStage::Ingested,
                content_hash: params.draft_hash,
                cid: None,
                ledger_tx: None,
                chain: None,
                block_height: None,
                actor: params.actor,
                evidence: None,
                timestamp: now,
            }],
            created_at: now,
            last_transition_at: now,
            record_hash: String::new(),
        };
        record.rehash();

        inner.records.push(record.clone());
        inner.last_updated = now;
        self.store.save(&*inner)?;

        tracing::info!(document_id = %record.document_id, sku = %record.sku, "lifecycle created");
        metrics::counter!("lifecycle_created_total").increment(1);

        Ok(record)
    }

    /// Append a stage transition and update the stage-specific top-level
    /// fields. Rejects unknown documents and stage regressions.
    pub async fn advance_stage(
        &self,
        document_id: &str,
        target: LifecycleStage,
        payload: AdvancePayload,
    ) -> AppResult<LifecycleRecord> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let record = inner
            .records
            .iter_mut()
            .find(|r| r.document_id == document_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("No lifecycle record for document {document_id}"))
            })?;

        if target.index() < record.current_stage.index() {
            return Err(AppError::StateMachine {
                message: format!(
                    "Cannot regress from {} to {}",
                    record.current_stage.as_str(),
                    target.as_str()
                ),
                allowed: stage_names_from(record.current_stage),
            });
        }

        if target == LifecycleStage::Encrypted {
            if let (Some(cid), Some(plain)) = (payload.cid.as_ref(), record.plain_cid.as_ref()) {
                if cid == plain {
                    return Err(AppError::Conflict(
                        "Encrypted CID must differ from plain CID".into(),
                    ));
                }
            }
        }

        record.transitions.push(StageTransition {
            stage: target,
            content_hash: payload.content_hash.clone(),
            cid: payload.cid.clone(),
            ledger_tx: payload.ledger_tx.clone(),
            chain: payload.chain.clone(),
            block_height: payload.block_height,
            actor: payload.actor,
            evidence: payload.evidence,
            timestamp: now,
        });

        match target {
            LifecycleStage::Ingested => record.draft_hash = payload.content_hash,
            LifecycleStage::Canonicalized => record.canonical_hash = Some(payload.content_hash),
            LifecycleStage::ComplianceInjected => {
                record.compliance_hash = Some(payload.content_hash)
            }
            LifecycleStage::Signed => record.signed_hash = Some(payload.content_hash),
            LifecycleStage::Encrypted => record.encrypted_cid = payload.cid.clone(),
            LifecycleStage::Registered => record.plain_cid = payload.cid.clone(),
            LifecycleStage::Anchored => {
                record.ledger_tx = payload.ledger_tx.clone();
                record.ledger_chain = payload.chain.clone();
                record.block_height = payload.block_height;
            }
            LifecycleStage::Parsed
            | LifecycleStage::Archived
            | LifecycleStage::Superseded => {}
        }

        record.current_stage = target;
        record.last_transition_at = now;
        record.rehash();
        let snapshot = record.clone();

        inner.last_updated = now;
        self.store.save(&*inner)?;

        tracing::info!(
            document_id = %document_id,
            stage = target.as_str(),
            "lifecycle advanced"
        );
        metrics::counter!("lifecycle_transitions_total").increment(1);

        Ok(snapshot)
    }

    /// Record the certificate hash produced by a finalized workflow.
    pub async fn set_certificate_hash(
        &self,
        document_id: &str,
        certificate_hash: &str,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.document_id == document_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("No lifecycle record for document {document_id}"))
            })?;
        record.certificate_hash = Some(certificate_hash.to_string());
        record.rehash();
        inner.last_updated = Utc::now();
        self.store.save(&*inner)?;
        Ok(())
    }

    pub async fn get(&self, document_id: &str) -> Option<LifecycleRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .find(|r| r.document_id == document_id)
            .cloned()
    }

    pub async fn get_by_sku(&self, sku: &str) -> Option<LifecycleRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .find(|r| r.sku == sku)
            .cloned()
    }

    /// Walk the predecessor chain starting at `document_id`, leaves first.
    pub async fn version_chain(&self, document_id: &str) -> Vec<LifecycleRecord> {
        let inner = self.inner.read().await;
        let mut chain = Vec::new();
        let mut cursor = Some(document_id.to_string());
        while let Some(id) = cursor {
            match inner.records.iter().find(|r| r.document_id == id) {
                Some(record) => {
                    cursor = record.previous_version_id.clone();
                    chain.push(record.clone());
                }
                None => break,
            }
            if chain.len() > inner.records.len() {
                break; // cycle guard
            }
        }
        chain
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Five-way deep integrity verification. Failures are reported, never
    /// raised.
    pub async fn verify_integrity(&self, document_id: &str) -> AppResult<IntegrityReport> {
        let inner = self.inner.read().await;
        let record = inner
            .records
            .iter()
            .find(|r| r.document_id == document_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("No lifecycle record for document {document_id}"))
            })?;

        let mut issues = Vec::new();

        // (a) record hash matches recomputation
        let record_hash_valid = record.record_hash == record.compute_record_hash();
        if !record_hash_valid {
            issues.push(format!(
                "Record hash mismatch for {}: stored value does not match recomputation",
                record.document_id
            ));
        }

        // (b) stage chain order and timestamp monotonicity
        let mut stage_chain_valid = true;
        for pair in record.transitions.windows(2) {
            if pair[1].stage.index() < pair[0].stage.index() {
                stage_chain_valid = false;
                issues.push(format!(
                    "Stage regression: {} after {}",
                    pair[1].stage.as_str(),
                    pair[0].stage.as_str()
                ));
            }
            if pair[1].timestamp < pair[0].timestamp {
                stage_chain_valid = false;
                issues.push(format!(
                    "Timestamp regression at stage {}",
                    pair[1].stage.as_str()
                ));
            }
        }
        if let Some(last) = record.transitions.last() {
            if last.stage != record.current_stage {
                stage_chain_valid = false;
                issues.push("currentStage does not equal last transition's stage".into());
            }
        } else {
            stage_chain_valid = false;
            issues.push("Record has no transitions".into());
        }

        // (c) hash continuity
        let mut hash_continuity_valid = true;
        if let Some(first) = record.transitions.first() {
            if first.content_hash != record.draft_hash {
                hash_continuity_valid = false;
                issues.push("First transition's content hash does not equal draft hash".into());
            }
        }
        for t in &record.transitions {
            if t.content_hash.is_empty() {
                hash_continuity_valid = false;
                issues.push(format!("Transition {} has no content hash", t.stage.as_str()));
            }
        }
        if record.signed_hash.is_some()
            && !record
                .transitions
                .iter()
                .any(|t| t.stage == LifecycleStage::Signed)
        {
            hash_continuity_valid = false;
            issues.push("signedHash is set but no signed transition exists".into());
        }

        // (d) CID consistency
        let mut cid_consistency_valid = true;
        if let Some(plain) = &record.plain_cid {
            if !record
                .transitions
                .iter()
                .any(|t| t.cid.as_deref() == Some(plain))
            {
                cid_consistency_valid = false;
                issues.push("plainCID is not referenced by any transition".into());
            }
            if record.encrypted_cid.as_deref() == Some(plain.as_str()) {
                cid_consistency_valid = false;
                issues.push("encryptedCID equals plainCID".into());
            }
        }
        if record.ledger_tx.is_some()
            && !record
                .transitions
                .iter()
                .any(|t| t.stage == LifecycleStage::Anchored)
        {
            cid_consistency_valid = false;
            issues.push("ledgerTx is set but no anchored transition exists".into());
        }

        // (e) signature-certificate binding
        let signature_binding_valid =
            !(record.certificate_hash.is_some() && record.signed_hash.is_none());
        if !signature_binding_valid {
            issues.push("certificateHash is set without a signedHash".into());
        }

        let valid = record_hash_valid
            && stage_chain_valid
            && hash_continuity_valid
            && cid_consistency_valid
            && signature_binding_valid;

        Ok(IntegrityReport {
            valid,
            record_hash_valid,
            stage_chain_valid,
            hash_continuity_valid,
            cid_consistency_valid,
            signature_binding_valid,
            issues,
        })
    }

    /// Test-only access used to simulate external tampering.
    #[cfg(test)]
    pub async fn tamper_first_transition(&self, document_id: &str, content_hash: &str) {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.document_id == document_id)
            .unwrap();
        record.transitions[0].content_hash = content_hash.to_string();
    }
}

fn stage_names_from(current: LifecycleStage) -> Vec<String> {
    [
        LifecycleStage::Ingested,
        LifecycleStage::Parsed,
        LifecycleStage::Canonicalized,
        LifecycleStage::ComplianceInjected,
        LifecycleStage::Signed,
        LifecycleStage::Encrypted,
        LifecycleStage::Anchored,
        LifecycleStage::Registered,
        LifecycleStage::Archived,
        LifecycleStage::Superseded,
    ]
    .iter()
    .filter(|s| s.index() >= current.index())
    .map(|s| s.as_str().to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(doc: &str) -> CreateLifecycleParams {
        CreateLifecycleParams {
            document_id: doc.into(),
            sku: format!("SKU-{doc}"),
            source_file: "contract.md".into(),
            title: "Contract".into(),
            draft_hash: "d".repeat(64),
            canonical_hash: None,
            merkle_root: Some("m".repeat(64)),
            actor: "tester".into(),
            previous_version_id: None,
        }
    }

    async fn registry() -> (tempfile::TempDir, LifecycleRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = LifecycleRegistry::open(dir.path()).unwrap();
        (dir, registry)
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let (_dir, registry) = registry().await;
        let a = registry.create_lifecycle(params("doc_1")).await.unwrap();
        let b = registry.create_lifecycle(params("doc_1")).await.unwrap();
        assert_eq!(a.record_hash, b.record_hash);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn advance_appends_transition_and_rehashes() {
        let (_dir, registry) = registry().await;
        registry.create_lifecycle(params("doc_1")).await.unwrap();

        let record = registry
            .advance_stage(
                "doc_1",
                LifecycleStage::Signed,
                AdvancePayload {
                    content_hash: "s".repeat(64),
                    actor: "tester".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(record.current_stage, LifecycleStage::Signed);
        assert_eq!(record.signed_hash.as_deref(), Some("s".repeat(64).as_str()));
        assert_eq!(record.transitions.len(), 2);
        assert_eq!(record.record_hash, record.compute_record_hash());
    }

    #[tokio::test]
    async fn advance_rejects_unknown_document() {
        let (_dir, registry) = registry().await;
        let err = registry
            .advance_stage(
                "missing",
                LifecycleStage::Signed,
                AdvancePayload {
                    content_hash: "s".repeat(64),
                    actor: "tester".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn advance_rejects_regression() {
        let (_dir, registry) = registry().await;
        registry.create_lifecycle(params("doc_1")).await.unwrap();
        registry
            .advance_stage(
                "doc_1",
                LifecycleStage::Signed,
                AdvancePayload {
                    content_hash: "s".repeat(64),
                    actor: "tester".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = registry
            .advance_stage(
                "doc_1",
                LifecycleStage::Parsed,
                AdvancePayload {
                    content_hash: "p".repeat(64),
                    actor: "tester".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateMachine { .. }));
    }

    #[tokio::test]
    async fn integrity_detects_tamper() {
        let (_dir, registry) = registry().await;
        registry.create_lifecycle(params("doc_1")).await.unwrap();
        registry
            .advance_stage(
                "doc_1",
                LifecycleStage::Signed,
                AdvancePayload {
                    content_hash: "s".repeat(64),
                    actor: "tester".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let clean = registry.verify_integrity("doc_1").await.unwrap();
        assert!(clean.valid);

        registry
            .tamper_first_transition("doc_1", &"e".repeat(64))
            .await;

        let report = registry.verify_integrity("doc_1").await.unwrap();
        assert!(!report.valid);
        assert!(!report.record_hash_valid);
        assert!(report.issues.iter().any(|i| i.contains("doc_1")));
    }

    #[tokio::test]
    async fn version_chain_walks_predecessors() {
        let (_dir, registry) = registry().await;
        registry.create_lifecycle(params("doc_1")).await.unwrap();
        let mut p2 = params("doc_2");
        p2.previous_version_id = Some("doc_1".into());
        let v2 = registry.create_lifecycle(p2).await.unwrap();
        assert_eq!(v2.version, 2);
        assert!(v2.previous_version_hash.is_some());

        let chain = registry.version_chain("doc_2").await;
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].document_id, "doc_2");
        assert_eq!(chain[1].document_id, "doc_1");
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = LifecycleRegistry::open(dir.path()).unwrap();
            registry.create_lifecycle(params("doc_1")).await.unwrap();
        }
        let registry = LifecycleRegistry::open(dir.path()).unwrap();
        assert!(registry.get("doc_1").await.is_some());
    }
}
