use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::session::{SignatureType, SigningOrder};
use crate::models::workflow::{
    CertificateSigner, Counterparty, MultisigWorkflow, SignatureCertificate, SignatureRecord,
    WorkflowStatus,
};
use crate::store::JsonStore;
use crate::utils::crypto;

const STORE_FILE: &str = "multisig-workflows.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowFile {
    engine: String,
    version: String,
    workflows: Vec<MultisigWorkflow>,
}

impl Default for WorkflowFile {
    fn default() -> Self {
        Self {
            engine: "multisig-workflows".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            workflows: Vec::new(),
        }
    }
}

pub struct CounterpartySpec {
    pub name: String,
    pub email: String,
    pub role: String,
    pub signature_type: SignatureType,
    pub required: bool,
}

pub struct CreateWorkflowParams {
    pub document_id: String,
    pub document_hash: String,
    pub sku: Option<String>,
    pub initiated_by: String,
    pub required_signatures: u32,
    pub counterparties: Vec<CounterpartySpec>,
    pub ordering: SigningOrder,
    pub deadline: Option<DateTime<Utc>>,
}

/// Inputs for one signature submission. Hash construction is delegated to
/// the canonical signature algorithm.
pub struct SignatureSubmission {
    pub signer_name: String,
    pub signer_email: String,
    pub signer_role: String,
    pub signature_type: SignatureType,
    pub signed_at: DateTime<Utc>,
    pub merkle_root: String,
    pub device_fingerprint: String,
    pub platform: String,
}

/// Threshold signature collection with ordering, timestamp monotonicity and
/// certificate export.
pub struct MultisigEngine {
    store: JsonStore,
    inner: RwLock<WorkflowFile>,
}

impl MultisigEngine {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<WorkflowFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    pub async fn create_workflow(
        &self,
        params: CreateWorkflowParams,
    ) -> AppResult<MultisigWorkflow> {
        if params.required_signatures < 1 {
            return Err(AppError::BadRequest("Threshold must be at least 1".into()));
        }
        if params.required_signatures as usize > params.counterparties.len() {
            return Err(AppError::BadRequest(format!(
                "Threshold {} exceeds the {} possible signer(s)",
                params.required_signatures,
                params.counterparties.len()
            )));
        }

        let now = Utc::now();
        let counterparties: Vec<Counterparty> = params
            .counterparties
            .into_iter()
            .map(|spec| Counterparty {
                name: spec.name,
                email: spec.email,
                role: spec.role,
                signature_type: spec.signature_type,
                required: spec.required,
                invited_at: now,
                signed: false,
                signed_at: None,
                rejected: false,
                rejected_at: None,
                rejection_reason: None,
            })
            .collect();

        let mut workflow = MultisigWorkflow {
            workflow_id: crypto::generate_id128(),
            document_id: params.document_id,
            document_hash: params.document_hash,
            sku: params.sku,
            initiated_by: params.initiated_by,
            threshold: params.required_signatures,
            ordering: params.ordering,
            deadline: params.deadline,
            counterparties,
            signatures: Default::default(),
            signature_count: 0,
            status: WorkflowStatus::Pending,
            finalized_at: None,
            created_at: now,
            last_activity_at: now,
            record_hash: String::new(),
        };
        workflow.rehash();

        let mut inner = self.inner.write().await;
        inner.workflows.push(workflow.clone());
        self.store.save(&*inner)?;

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            document_id = %workflow.document_id,
            threshold = workflow.threshold,
            "multisig workflow created"
        );
        metrics::counter!("workflows_created_total").increment(1);

        Ok(workflow)
    }

    /// Collect one signature. The signature hash, combined hash and chain
    /// link are derived here from the canonical construction.
    pub async fn add_signature(
        &self,
        workflow_id: &str,
        submission: SignatureSubmission,
    ) -> AppResult<(MultisigWorkflow, SignatureRecord)> {
        let mut inner = self.inner.write().await;
        let workflow = inner
            .workflows
            .iter_mut()
            .find(|w| w.workflow_id == workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("No workflow {workflow_id}")))?;

        if workflow.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Workflow is {}",
                serde_json::to_string(&workflow.status).unwrap_or_default()
            )));
        }
        if let Some(deadline) = workflow.deadline {
            if submission.signed_at > deadline {
                workflow.status = WorkflowStatus::Expired;
                workflow.rehash();
                self.store.save(&*inner)?;
                return Err(AppError::Conflict("Workflow deadline has passed".into()));
            }
        }
        if workflow.signatures.contains_key(&submission.signer_email) {
            return Err(AppError::Conflict(format!(
                "Signer {} has already signed",
                submission.signer_email
            )));
        }
        if !workflow
            .counterparties
            .iter()
            .any(|c| c.email == submission.signer_email)
        {
            return Err(AppError::NotFound(format!(
                "{} is not a counterparty on this workflow",
                submission.signer_email
            )));
        }

        if workflow.ordering == SigningOrder::Strict {
            let next = workflow
                .counterparties
                .iter()
                .find(|c| c.required && !c.signed);
            if let Some(next) = next {
                if next.email != submission.signer_email {
                    return Err(AppError::Conflict(format!(
                        "Strict ordering: {} must sign first",
                        next.name
                    )));
                }
            }
        }

        if submission.signed_at < workflow.last_activity_at {
            return Err(AppError::Conflict(
                "Signature timestamp precedes the workflow's last activity".into(),
            ));
        }

        let signature_id = crypto::generate_secure_id("sig_");
        let signed_at_str = submission.signed_at.to_rfc3339();
        let current_hash = workflow.current_document_hash();
        let signature_hash = crypto::signature_hash(&crypto::SignatureInput {
            signature_id: &signature_id,
            name: &submission.signer_name,
            email: &submission.signer_email,
            role: &submission.signer_role,
            signature_type: submission.signature_type.as_str(),
            document_hash: &current_hash,
            merkle_root: &submission.merkle_root,
            signed_at: &signed_at_str,
            device_fingerprint: &submission.device_fingerprint,
        });
        let combined = crypto::combined_hash(&current_hash, &signature_hash);
        let previous_signature_hash = workflow.last_signature_hash();
        let sequence = workflow.signature_count + 1;

        let record = SignatureRecord {
            signature_id,
            signer_name: submission.signer_name,
            signer_email: submission.signer_email.clone(),
            signer_role: submission.signer_role,
            signature_type: submission.signature_type,
            signed_at: submission.signed_at,
            document_hash: current_hash,
            merkle_root: submission.merkle_root,
            signature_hash,
            combined_hash: combined,
            previous_signature_hash,
            sequence,
            status: "signed".into(),
            device_fingerprint: submission.device_fingerprint,
            platform: submission.platform,
        };

        workflow
            .signatures
            .insert(submission.signer_email.clone(), record.clone());
        workflow.signature_count = sequence;
        workflow.last_activity_at = submission.signed_at;

        if let Some(cp) = workflow
            .counterparties
            .iter_mut()
            .find(|c| c.email == submission.signer_email)
        {
            cp.signed = true;
            cp.signed_at = Some(submission.signed_at);
        }

        workflow.status = if workflow.threshold_met() {
            if workflow.all_required_signed() {
                workflow.finalized_at = Some(submission.signed_at);
                WorkflowStatus::Finalized
            } else {
                WorkflowStatus::ThresholdMet
            }
        } else if workflow.signature_count > 0 {
            WorkflowStatus::Partial
        } else {
            WorkflowStatus::Pending
        };

        workflow.rehash();
        let snapshot = workflow.clone();
        self.store.save(&*inner)?;

        tracing::info!(
            workflow_id = %workflow_id,
            signer = %record.signer_email,
            sequence = record.sequence,
            status = ?snapshot.status,
            "signature collected"
        );
        metrics::counter!("workflow_signatures_total").increment(1);

        Ok((snapshot, record))
    }

    /// Record a rejection. A required counterparty rejecting moves the whole
    /// workflow to *rejected*.
    pub async fn reject_signature(
        &self,
        workflow_id: &str,
        email: &str,
        reason: &str,
    ) -> AppResult<MultisigWorkflow> {
        let mut inner = self.inner.write().await;
        let workflow = inner
            .workflows
            .iter_mut()
            .find(|w| w.workflow_id == workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("No workflow {workflow_id}")))?;

        if workflow.status.is_terminal() {
            return Err(AppError::Conflict("Workflow is already closed".into()));
        }

        let now = Utc::now();
        let cp = workflow
            .counterparties
            .iter_mut()
            .find(|c| c.email == email)
            .ok_or_else(|| {
                AppError::NotFound(format!("{email} is not a counterparty on this workflow"))
            })?;
        cp.rejected = true;
        cp.rejected_at = Some(now);
        cp.rejection_reason = Some(reason.to_string());
        let was_required = cp.required;

        if was_required {
            workflow.status = WorkflowStatus::Rejected;
        }
        workflow.last_activity_at = now;
        workflow.rehash();
        let snapshot = workflow.clone();
        self.store.save(&*inner)?;
        Ok(snapshot)
    }

    /// Finalize a threshold-met workflow. Idempotent.
    pub async fn finalize(&self, workflow_id: &str) -> AppResult<MultisigWorkflow> {
        let mut inner = self.inner.write().await;
        let workflow = inner
            .workflows
            .iter_mut()
            .find(|w| w.workflow_id == workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("No workflow {workflow_id}")))?;

        if workflow.status == WorkflowStatus::Finalized {
            return Ok(workflow.clone());
        }
        if !workflow.threshold_met() {
            return Err(AppError::Conflict(format!(
                "Workflow has {} of {} required signatures",
                workflow.signature_count, workflow.threshold
            )));
        }
        if workflow.status.is_terminal() {
            return Err(AppError::Conflict("Workflow is already closed".into()));
        }

        workflow.status = WorkflowStatus::Finalized;
        workflow.finalized_at = Some(Utc::now());
        workflow.rehash();
        let snapshot = workflow.clone();
        self.store.save(&*inner)?;

        tracing::info!(workflow_id = %workflow_id, "workflow finalized");
        Ok(snapshot)
    }

    /// Export a deterministic certificate for a finalized workflow.
    pub async fn export_certificate(&self, workflow_id: &str) -> AppResult<SignatureCertificate> {
        let inner = self.inner.read().await;
        let workflow = inner
            .workflows
            .iter()
            .find(|w| w.workflow_id == workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("No workflow {workflow_id}")))?;

        if workflow.status != WorkflowStatus::Finalized {
            return Err(AppError::Conflict(
                "Certificate export requires a finalized workflow".into(),
            ));
        }
        let finalized_at = workflow
            .finalized_at
            .ok_or_else(|| AppError::Internal("Finalized workflow missing finalizedAt".into()))?;

        let signers: Vec<CertificateSigner> = workflow
            .signatures_by_signed_at()
            .into_iter()
            .map(|s| CertificateSigner {
                name: s.signer_name.clone(),
                email: s.signer_email.clone(),
                role: s.signer_role.clone(),
                signature_hash: s.signature_hash.clone(),
                signed_at: s.signed_at,
            })
            .collect();

        let certificate_hash = SignatureCertificate::compute_hash(
            &workflow.document_id,
            &workflow.document_hash,
            &signers,
            workflow.threshold,
            &finalized_at,
        );

        Ok(SignatureCertificate {
            certificate_id: format!("cert_{workflow_id}"),
            workflow_id: workflow.workflow_id.clone(),
            document_id: workflow.document_id.clone(),
            document_hash: workflow.document_hash.clone(),
            threshold: workflow.threshold,
            signers,
            finalized_at,
            certificate_hash,
        })
    }

    /// Verify every stored signature by re-deriving its payload hash and
    /// walking the combined-hash chain.
    pub async fn verify_signatures(&self, workflow_id: &str) -> AppResult<Vec<String>> {
        let inner = self.inner.read().await;
        let workflow = inner
            .workflows
            .iter()
            .find(|w| w.workflow_id == workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("No workflow {workflow_id}")))?;

        let mut issues = Vec::new();
        let mut sigs: Vec<&SignatureRecord> = workflow.signatures.values().collect();
        sigs.sort_by_key(|s| s.sequence);

        let mut expected_prev = crypto::genesis_signature_hash();
        let mut expected_doc_hash = workflow.document_hash.clone();
        for sig in sigs {
            if sig.recompute_hash() != sig.signature_hash {
                issues.push(format!(
                    "Signature {} hash does not match recomputation",
                    sig.signature_id
                ));
            }
            if sig.previous_signature_hash != expected_prev {
                issues.push(format!(
                    "Signature {} breaks the chain: previousSignatureHash mismatch",
                    sig.signature_id
                ));
            }
            if sig.document_hash != expected_doc_hash {
                issues.push(format!(
                    "Signature {} was taken over an unexpected document hash",
                    sig.signature_id
                ));
            }
            if sig.combined_hash != crypto::combined_hash(&sig.document_hash, &sig.signature_hash) {
                issues.push(format!(
                    "Signature {} combined hash does not match recomputation",
                    sig.signature_id
                ));
            }
            expected_prev = sig.signature_hash.clone();
            expected_doc_hash = sig.combined_hash.clone();
        }
        Ok(issues)
    }

    pub async fn get(&self, workflow_id: &str) -> Option<MultisigWorkflow> {
        self.inner
            .read()
            .await
            .workflows
            .iter()
            .find(|w| w.workflow_id == workflow_id)
            .cloned()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.workflows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counterparty(name: &str, required: bool) -> CounterpartySpec {
        CounterpartySpec {
            name: name.to_uppercase(),
            email: format!("{name}@example.com"),
            role: "counterparty".into(),
            signature_type: SignatureType::Counterparty,
            required,
        }
    }

    fn submission(name: &str) -> SignatureSubmission {
        SignatureSubmission {
            signer_name: name.to_uppercase(),
            signer_email: format!("{name}@example.com"),
            signer_role: "counterparty".into(),
            signature_type: SignatureType::Counterparty,
            signed_at: Utc::now(),
            merkle_root: "m".repeat(64),
            device_fingerprint: "dev".into(),
            platform: "test".into(),
        }
    }

    fn params(counterparties: Vec<CounterpartySpec>, threshold: u32) -> CreateWorkflowParams {
        CreateWorkflowParams {
            document_id: "doc_1".into(),
            document_hash: "d".repeat(64),
            sku: None,
            initiated_by: "initiator@example.com".into(),
            required_signatures: threshold,
            counterparties,
            ordering: SigningOrder::Any,
            deadline: None,
        }
    }

    async fn engine(dir: &Path) -> MultisigEngine {
        MultisigEngine::open(dir).unwrap()
    }

    #[tokio::test]
    async fn threshold_bounds_validated() {
        let dir = tempfile::tempdir().unwrap();
        let multisig = engine(dir.path()).await;
        assert!(multisig
            .create_workflow(params(vec![counterparty("alice", true)], 2))
            .await
            .is_err());
        assert!(multisig
            .create_workflow(params(vec![counterparty("alice", true)], 0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn signatures_chain_and_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let multisig = engine(dir.path()).await;
        let workflow = multisig
            .create_workflow(params(
                vec![counterparty("alice", true), counterparty("bob", true)],
                2,
            ))
            .await
            .unwrap();

        let (after, sig_a) = multisig
            .add_signature(&workflow.workflow_id, submission("alice"))
            .await
            .unwrap();
        assert_eq!(after.status, WorkflowStatus::Partial);
        assert_eq!(sig_a.sequence, 1);
        assert_eq!(sig_a.previous_signature_hash, crypto::genesis_signature_hash());
        assert_eq!(sig_a.document_hash, workflow.document_hash);

        let (after, sig_b) = multisig
            .add_signature(&workflow.workflow_id, submission("bob"))
            .await
            .unwrap();
        assert_eq!(after.status, WorkflowStatus::Finalized);
        assert_eq!(sig_b.previous_signature_hash, sig_a.signature_hash);
        assert_eq!(sig_b.document_hash, sig_a.combined_hash);

        assert!(multisig
            .verify_signatures(&workflow.workflow_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn duplicate_signer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let multisig = engine(dir.path()).await;
        let workflow = multisig
            .create_workflow(params(
                vec![counterparty("alice", true), counterparty("bob", true)],
                2,
            ))
            .await
            .unwrap();

        multisig
            .add_signature(&workflow.workflow_id, submission("alice"))
            .await
            .unwrap();
        let err = multisig
            .add_signature(&workflow.workflow_id, submission("alice"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already"));
    }

    #[tokio::test]
    async fn strict_ordering_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let multisig = engine(dir.path()).await;
        let mut p = params(
            vec![counterparty("alice", true), counterparty("bob", true)],
            2,
        );
        p.ordering = SigningOrder::Strict;
        let workflow = multisig.create_workflow(p).await.unwrap();

        let err = multisig
            .add_signature(&workflow.workflow_id, submission("bob"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ALICE must sign first"));
    }

    #[tokio::test]
    async fn deadline_expires_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let multisig = engine(dir.path()).await;
        let mut p = params(vec![counterparty("alice", true)], 1);
        p.deadline = Some(Utc::now() - chrono::Duration::hours(1));
        let workflow = multisig.create_workflow(p).await.unwrap();

        let err = multisig
            .add_signature(&workflow.workflow_id, submission("alice"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("deadline"));
        let after = multisig.get(&workflow.workflow_id).await.unwrap();
        assert_eq!(after.status, WorkflowStatus::Expired);
    }

    #[tokio::test]
    async fn required_rejection_closes_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let multisig = engine(dir.path()).await;
        let workflow = multisig
            .create_workflow(params(
                vec![counterparty("alice", true), counterparty("bob", false)],
                1,
            ))
            .await
            .unwrap();

        let after = multisig
            .reject_signature(&workflow.workflow_id, "alice@example.com", "no")
            .await
            .unwrap();
        assert_eq!(after.status, WorkflowStatus::Rejected);
    }

    #[tokio::test]
    async fn certificate_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let multisig = engine(dir.path()).await;
        let workflow = multisig
            .create_workflow(params(
                vec![counterparty("alice", true), counterparty("bob", true)],
                2,
            ))
            .await
            .unwrap();

        // Below threshold the export is refused.
        assert!(multisig
            .export_certificate(&workflow.workflow_id)
            .await
            .is_err());

        multisig
            .add_signature(&workflow.workflow_id, submission("alice"))
            .await
            .unwrap();
        multisig
            .add_signature(&workflow.workflow_id, submission("bob"))
            .await
            .unwrap();

        let a = multisig.export_certificate(&workflow.workflow_id).await.unwrap();
        let b = multisig.export_certificate(&workflow.workflow_id).await.unwrap();
        assert_eq!(a.certificate_hash, b.certificate_hash);
        assert_eq!(a.signers.len(), 2);
        // Sorted by signing time: alice signed first.
        assert_eq!(a.signers[0].email, "alice@example.com");
    }

    #[tokio::test]
    async fn finalize_is_idempotent_and_gated() {
        let dir = tempfile::tempdir().unwrap();
        let multisig = engine(dir.path()).await;
        let workflow = multisig
            .create_workflow(params(
                vec![counterparty("alice", true), counterparty("bob", false)],
                1,
            ))
            .await
            .unwrap();

        assert!(multisig.finalize(&workflow.workflow_id).await.is_err());

        multisig
            .add_signature(&workflow.workflow_id, submission("alice"))
            .await
            .unwrap();
        let a = multisig.finalize(&workflow.workflow_id).await.unwrap();
        let b = multisig.finalize(&workflow.workflow_id).await.unwrap();
        assert_eq!(a.status, WorkflowStatus::Finalized);
        assert_eq!(a.finalized_at, b.finalized_at);
    }
}
