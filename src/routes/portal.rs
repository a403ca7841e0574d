use std::collections::HashMap;
use std::sync::RwLock;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::ledger::ChainTarget;
use crate::models::session::{SignatureType, SigningOrder};
use crate::models::workflow::WorkflowStatus;
use crate::routes::ok;
use crate::services::multisig_engine::{
    CounterpartySpec, CreateWorkflowParams, SignatureSubmission,
};
use crate::utils::{crypto, validation};
use crate::AppState;

// ---------------------------------------------------------------------------
// Ephemeral token store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenPurpose {
    Sign,
    Verify,
    Admin,
}

#[derive(Debug, Clone)]
pub struct PortalToken {
    pub email: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
}

/// In-memory capability tokens. Revocation is implicit through TTL expiry;
/// expired tokens are pruned on every operation.
pub struct PortalTokenStore {
    tokens: RwLock<HashMap<String, PortalToken>>,
    ttl: Duration,
    cap: usize,
}

impl PortalTokenStore {
    pub fn new(ttl_secs: i64, cap: usize) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
            cap,
        }
    }

    pub fn issue(&self, email: &str, purpose: TokenPurpose) -> AppResult<(String, DateTime<Utc>)> {
        let mut tokens = self.tokens.write().expect("token store poisoned");
        let now = Utc::now();
        tokens.retain(|_, t| t.expires_at > now);

        if tokens.len() >= self.cap {
            return Err(AppError::RateLimited {
                retry_after_secs: self.ttl.num_seconds(),
            });
        }

        let token = crypto::generate_access_token();
        let expires_at = now + self.ttl;
        tokens.insert(
            token.clone(),
            PortalToken {
                email: email.to_string(),
                purpose,
                expires_at,
            },
        );
        Ok((token, expires_at))
    }

    /// Validate: token exists, not expired, purpose matches or is admin.
    pub fn validate(&self, token: &str, required: TokenPurpose) -> AppResult<PortalToken> {
        let mut tokens = self.tokens.write().expect("token store poisoned");
        let now = Utc::now();
        tokens.retain(|_, t| t.expires_at > now);

        let found = tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;

        if found.purpose != required && found.purpose != TokenPurpose::Admin {
            return Err(AppError::Forbidden("Token purpose mismatch".into()));
        }
        Ok(found)
    }

    pub fn live_count(&self) -> usize {
        let now = Utc::now();
        self.tokens
            .read()
            .expect("token store poisoned")
            .values()
            .filter(|t| t.expires_at > now)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Request schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub email: String,
    pub purpose: TokenPurpose,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalSignRequest {
    pub workflow_id: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCounterpartyRequest {
    pub name: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub signature_type: SignatureType,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_role() -> String {
    "counterparty".into()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCreateRequest {
    pub document_id: String,
    pub document_hash: String,
    pub sku: Option<String>,
    pub initiator: String,
    pub required_signatures: u32,
    pub counterparties: Vec<WorkflowCounterpartyRequest>,
    #[serde(default)]
    pub ordering: SigningOrder,
    pub deadline: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/token", post(issue_token))
        .route("/verify/:document_id", get(verify_document))
        .route("/verify/cid/:cid", get(verify_cid))
        .route("/sign/:document_id", post(portal_sign))
        .route("/status/:workflow_id", get(workflow_status))
        .route("/workflow", post(create_workflow))
        .route("/anchor/:document_id", post(anchor_document))
        .route("/encrypt/:document_id", post(encrypt_document))
        .route("/fingerprint", post(fingerprint_document))
        .route("/identify-leak", post(identify_leak))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn dashboard(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<!doctype html>
<html><head><title>Sovereign Portal</title></head>
<body>
<h1>Sovereign Verification Portal</h1>
<ul>
<li>Documents under custody: {}</li>
<li>Multi-sig workflows: {}</li>
<li>Registered CIDs: {}</li>
<li>Live tokens: {}</li>
</ul>
</body></html>"#,
        state.registry.count().await,
        state.workflows.count().await,
        state.cids.count().await,
        state.portal_tokens.live_count(),
    ))
}

async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    if !validation::is_valid_email(&req.email) {
        return Err(AppError::BadRequest(format!("Invalid email: {}", req.email)));
    }

    let (token, expires_at) = state.portal_tokens.issue(&req.email, req.purpose)?;
    metrics::counter!("portal_tokens_issued_total").increment(1);

    Ok((
        StatusCode::CREATED,
        ok(json!({
            "token": token,
            "expiresAt": expires_at,
            "purpose": req.purpose,
        })),
    ))
}

async fn verify_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let record = state
        .registry
        .get(&document_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No document {document_id}")))?;
    let integrity = state.registry.verify_integrity(&document_id).await?;
    metrics::counter!("verifications_total").increment(1);

    Ok(ok(json!({
        "documentId": record.document_id,
        "sku": record.sku,
        "currentStage": record.current_stage,
        "version": record.version,
        "transitions": record.transitions,
        "integrity": integrity,
        "hashes": {
            "draft": record.draft_hash,
            "compliance": record.compliance_hash,
            "signed": record.signed_hash,
            "canonical": record.canonical_hash,
            "merkleRoot": record.merkle_root,
        },
        "cids": {
            "plain": record.plain_cid,
            "encrypted": record.encrypted_cid,
        },
        "ledgerTx": record.ledger_tx,
    })))
}

async fn verify_cid(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let record = state
        .cids
        .lookup_by_cid(&cid)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No record for CID {cid}")))?;

    Ok(ok(json!({
        "cid": record.cid,
        "sha256": record.sha256,
        "merkleRoot": record.merkle_root,
        "sku": record.sku,
        "sourceFile": record.source_file,
        "registeredAt": record.registered_at,
    })))
}

/// Sign through the portal with a Bearer token of purpose *sign* (or admin).
/// Forwards to the multi-sig engine and auto-finalizes on threshold.
async fn portal_sign(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<PortalSignRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let token = state
        .portal_tokens
        .validate(auth.token(), TokenPurpose::Sign)?;

    let workflow = state
        .workflows
        .get(&req.workflow_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No workflow {}", req.workflow_id)))?;
    if workflow.document_id != document_id {
        return Err(AppError::BadRequest(
            "Workflow does not belong to this document".into(),
        ));
    }

    let merkle_root = state
        .registry
        .get(&document_id)
        .await
        .and_then(|r| r.merkle_root)
        .unwrap_or_default();

    let (mut updated, signature) = state
        .workflows
        .add_signature(
            &req.workflow_id,
            SignatureSubmission {
                signer_name: req.name.unwrap_or_else(|| token.email.clone()),
                signer_email: token.email.clone(),
                signer_role: req.role.unwrap_or_else(|| "counterparty".into()),
                signature_type: SignatureType::Counterparty,
                signed_at: Utc::now(),
                merkle_root,
                device_fingerprint: req.device_fingerprint.unwrap_or_default(),
                platform: "portal".into(),
            },
        )
        .await?;

    if updated.status == WorkflowStatus::ThresholdMet {
        updated = state.workflows.finalize(&req.workflow_id).await?;
    }
    if updated.status == WorkflowStatus::Finalized {
        // Threshold reached: emit the certificate and advance custody to
        // *signed*. A workflow without a custody record skips the advance.
        if let Ok(certificate) = state.workflows.export_certificate(&req.workflow_id).await {
            let _ = state
                .registry
                .advance_stage(
                    &updated.document_id,
                    crate::models::lifecycle::LifecycleStage::Signed,
                    crate::services::lifecycle_registry::AdvancePayload {
                        content_hash: updated.current_document_hash(),
                        actor: token.email.clone(),
                        ..Default::default()
                    },
                )
                .await;
            let _ = state
                .registry
                .set_certificate_hash(&updated.document_id, &certificate.certificate_hash)
                .await;
        }
        // Open the post-signing agreement so obligations and deadlines have
        // a home.
        if let Ok(agreement) = state
            .agreements
            .create_agreement(crate::services::agreement_engine::CreateAgreementParams {
                document_id: updated.document_id.clone(),
                workflow_id: Some(updated.workflow_id.clone()),
                title: format!("Agreement {}", updated.document_id),
                parties: updated
                    .counterparties
                    .iter()
                    .map(|c| c.email.clone())
                    .collect(),
            })
            .await
        {
            use crate::models::agreement::AgreementStatus;
            for (status, reason) in [
                (AgreementStatus::PendingSignature, "collecting signatures"),
                (AgreementStatus::Signed, "all required signatures collected"),
            ] {
                let _ = state
                    .agreements
                    .transition_status(&agreement.agreement_id, status, &token.email, reason, None)
                    .await;
            }
        }

        let _ = state
            .events
            .append(
                "workflow-finalized",
                &token.email,
                json!({
                    "workflowId": updated.workflow_id.clone(),
                    "documentId": updated.document_id.clone(),
                    "signatureCount": updated.signature_count,
                }),
                None,
                None,
            )
            .await;
    }
    metrics::counter!("portal_signatures_total").increment(1);

    let threshold_met = updated.threshold_met();
    Ok(ok(json!({
        "workflowStatus": updated.status,
        "signatureCount": updated.signature_count,
        "threshold": updated.threshold,
        "thresholdMet": threshold_met,
        "signatureHash": signature.signature_hash,
    })))
}

async fn workflow_status(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let workflow = state
        .workflows
        .get(&workflow_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No workflow {workflow_id}")))?;

    let counterparties: Vec<serde_json::Value> = workflow
        .counterparties
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "email": c.email,
                "role": c.role,
                "required": c.required,
                "signed": c.signed,
                "signedAt": c.signed_at,
                "rejected": c.rejected,
            })
        })
        .collect();

    let threshold_met = workflow.threshold_met();
    Ok(ok(json!({
        "workflowId": workflow.workflow_id,
        "status": workflow.status,
        "threshold": workflow.threshold,
        "signatureCount": workflow.signature_count,
        "thresholdMet": threshold_met,
        "counterparties": counterparties,
    })))
}

/// Create a workflow backing a document. Requires an *admin* token.
async fn create_workflow(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<WorkflowCreateRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    state
        .portal_tokens
        .validate(auth.token(), TokenPurpose::Admin)?;

    if !validation::is_valid_sha256(&req.document_hash) {
        return Err(AppError::BadRequest(
            "documentHash must be a 64-character hex SHA-256".into(),
        ));
    }
    for cp in &req.counterparties {
        if !validation::is_valid_email(&cp.email) {
            return Err(AppError::BadRequest(format!(
                "Invalid counterparty email: {}",
                cp.email
            )));
        }
    }

    let workflow = state
        .workflows
        .create_workflow(CreateWorkflowParams {
            document_id: req.document_id,
            document_hash: req.document_hash,
            sku: req.sku,
            initiated_by: req.initiator,
            required_signatures: req.required_signatures,
            counterparties: req
                .counterparties
                .into_iter()
                .map(|cp| CounterpartySpec {
                    name: cp.name,
                    email: cp.email,
                    role: cp.role,
                    signature_type: cp.signature_type,
                    required: cp.required,
                })
                .collect(),
            ordering: req.ordering,
            deadline: req.deadline,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        ok(json!({
            "workflowId": workflow.workflow_id,
            "status": workflow.status,
            "threshold": workflow.threshold,
        })),
    ))
}

// ---------------------------------------------------------------------------
// Downstream pipeline (admin token): anchor, encrypt, fingerprint
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRequest {
    pub chain: String,
    #[serde(default)]
    pub secondary_chains: Vec<String>,
}

async fn anchor_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<AnchorRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let token = state
        .portal_tokens
        .validate(auth.token(), TokenPurpose::Admin)?;

    if !validation::is_valid_chain(&req.chain) {
        return Err(AppError::BadRequest(format!(
            "Unsupported anchor chain: {}",
            req.chain
        )));
    }
    let chain = ChainTarget::parse(&req.chain).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let record = state
        .registry
        .get(&document_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No document {document_id}")))?;
    let fingerprint = record
        .signed_hash
        .clone()
        .unwrap_or_else(|| record.draft_hash.clone());
    let signature_hash = record
        .transitions
        .iter()
        .rev()
        .find(|t| t.stage == crate::models::lifecycle::LifecycleStage::Signed)
        .map(|t| t.content_hash.clone());

    let params = crate::services::anchor_engine::AnchorParams {
        document_id: document_id.clone(),
        fingerprint,
        merkle_root: record.merkle_root.clone().unwrap_or_default(),
        chain,
        sku: Some(record.sku.clone()),
        canonical_hash: record.canonical_hash.clone(),
        signature_hash,
        encrypted_cid: record.encrypted_cid.clone(),
    };

    let secondaries: Vec<ChainTarget> = req
        .secondary_chains
        .iter()
        .filter_map(|c| ChainTarget::parse(c).ok())
        .collect();

    let anchor = if secondaries.is_empty() {
        state.anchors.anchor(params).await?
    } else {
        state.anchors.anchor_multi_chain(params, &secondaries).await?
    };

    state
        .registry
        .advance_stage(
            &document_id,
            crate::models::lifecycle::LifecycleStage::Anchored,
            crate::services::lifecycle_registry::AdvancePayload {
                content_hash: anchor.document_fingerprint.clone(),
                cid: anchor.cid.clone(),
                ledger_tx: Some(anchor.tx_hash.clone()),
                chain: Some(anchor.chain.clone()),
                block_height: None,
                actor: token.email.clone(),
                evidence: None,
            },
        )
        .await?;

    if let Some(cid) = &anchor.cid {
        let _ = state
            .cids
            .register(crate::services::cid_registry::RegisterCidParams {
                cid: cid.clone(),
                sha256: anchor.document_fingerprint.clone(),
                merkle_root: record.merkle_root.clone(),
                source_file: record.source_file.clone(),
                sku: record.sku.clone(),
                size: 0,
                metadata: Some(json!({ "kind": "anchor-payload", "chain": anchor.chain.clone() })),
            })
            .await;
    }

    let _ = state
        .events
        .append(
            "document-anchored",
            &token.email,
            json!({
                "documentId": document_id,
                "anchorId": anchor.anchor_id.clone(),
                "chain": anchor.chain.clone(),
                "txHash": anchor.tx_hash.clone(),
            }),
            Some(anchor.document_fingerprint.clone()),
            anchor.cid.clone(),
        )
        .await;

    Ok(ok(json!({
        "anchorId": anchor.anchor_id,
        "chain": anchor.chain,
        "txHash": anchor.tx_hash,
        "cid": anchor.cid,
        "memoHash": anchor.memo.memo_hash,
        "sequence": anchor.sequence,
        "redundantAnchors": anchor.redundant_anchors,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptRequest {
    /// Document content, UTF-8.
    pub content: String,
}

/// Encrypt a document with a freshly generated vault key and advance custody
/// to *encrypted*. The ciphertext is returned to the caller; only the
/// encrypted CID is retained.
async fn encrypt_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<EncryptRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let token = state
        .portal_tokens
        .validate(auth.token(), TokenPurpose::Admin)?;

    let record = state
        .registry
        .get(&document_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No document {document_id}")))?;

    let provider = state.keys.active()?;
    let key = provider.generate_key(crate::keys::GenerateKeyRequest {
        derivation: crate::models::keys::KeyDerivation::Random,
        purpose: crate::models::keys::KeyPurpose::Encryption,
        document_id: Some(document_id.clone()),
        sku: Some(record.sku.clone()),
        passphrase: None,
        signer_identity_hash: None,
    })?;
    let payload = provider.encrypt(&key.key_id, req.content.as_bytes())?;

    // Content address of the ciphertext, offline-derived.
    let encrypted_cid = format!(
        "bafk{}",
        &crypto::sha256_hex(&payload.ciphertext)[..52]
    );

    state
        .cids
        .register(crate::services::cid_registry::RegisterCidParams {
            cid: encrypted_cid.clone(),
            sha256: crypto::sha256_hex(&payload.ciphertext),
            merkle_root: record.merkle_root.clone(),
            source_file: record.source_file.clone(),
            sku: record.sku.clone(),
            size: payload.plaintext_size as u64,
            metadata: Some(json!({ "kind": "encrypted-document", "keyId": key.key_id.clone() })),
        })
        .await?;

    state
        .registry
        .advance_stage(
            &document_id,
            crate::models::lifecycle::LifecycleStage::Encrypted,
            crate::services::lifecycle_registry::AdvancePayload {
                content_hash: payload.plaintext_sha256.clone(),
                cid: Some(encrypted_cid.clone()),
                ledger_tx: None,
                chain: None,
                block_height: None,
                actor: token.email.clone(),
                evidence: None,
            },
        )
        .await?;

    let _ = state
        .events
        .append(
            "document-encrypted",
            &token.email,
            json!({
                "documentId": document_id,
                "keyId": key.key_id.clone(),
                "encryptedCid": encrypted_cid.clone(),
            }),
            None,
            Some(encrypted_cid.clone()),
        )
        .await;

    Ok(ok(json!({
        "keyId": key.key_id,
        "encryptedCid": encrypted_cid,
        "payload": payload,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintRequest {
    pub document_id: String,
    pub document_title: String,
    pub text: String,
    pub recipient: crate::models::fingerprint::Recipient,
}

async fn fingerprint_document(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<FingerprintRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let token = state
        .portal_tokens
        .validate(auth.token(), TokenPurpose::Admin)?;

    if !validation::is_valid_email(&req.recipient.email) {
        return Err(AppError::BadRequest(format!(
            "Invalid recipient email: {}",
            req.recipient.email
        )));
    }

    let recipient_email = req.recipient.email.clone();
    let payload = state
        .fingerprints
        .fingerprint(crate::services::fingerprint_engine::FingerprintParams {
            document_id: req.document_id.clone(),
            document_title: req.document_title,
            text: req.text,
            recipient: req.recipient,
        })
        .await?;

    let _ = state
        .events
        .append(
            "document-fingerprinted",
            &token.email,
            json!({
                "documentId": req.document_id,
                "fingerprintId": payload.fingerprint_id.clone(),
                "recipient": recipient_email,
            }),
            Some(payload.fingerprint_hash.clone()),
            None,
        )
        .await;

    Ok(ok(payload))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyLeakRequest {
    pub document_id: String,
    pub leaked_text: String,
}

async fn identify_leak(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<IdentifyLeakRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .portal_tokens
        .validate(auth.token(), TokenPurpose::Admin)?;

    let result = state
        .fingerprints
        .identify_source(&req.document_id, &req.leaked_text)
        .await;
    metrics::counter!("leak_identifications_total").increment(1);

    Ok(ok(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_store_issue_validate_round_trip() {
        let store = PortalTokenStore::new(1800, 100);
        let (token, _) = store.issue("a@example.com", TokenPurpose::Sign).unwrap();

        assert!(store.validate(&token, TokenPurpose::Sign).is_ok());
        // Purpose mismatch is forbidden unless the token is admin.
        assert!(store.validate(&token, TokenPurpose::Admin).is_err());
        assert!(store.validate("bogus", TokenPurpose::Sign).is_err());
    }

    #[test]
    fn admin_token_satisfies_any_purpose() {
        let store = PortalTokenStore::new(1800, 100);
        let (token, _) = store.issue("root@example.com", TokenPurpose::Admin).unwrap();
        assert!(store.validate(&token, TokenPurpose::Sign).is_ok());
        assert!(store.validate(&token, TokenPurpose::Verify).is_ok());
    }

    #[test]
    fn cap_limits_live_tokens() {
        let store = PortalTokenStore::new(1800, 2);
        store.issue("a@example.com", TokenPurpose::Verify).unwrap();
        store.issue("b@example.com", TokenPurpose::Verify).unwrap();
        let err = store.issue("c@example.com", TokenPurpose::Verify).unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }

    #[test]
    fn expired_tokens_are_pruned() {
        let store = PortalTokenStore::new(-1, 100);
        let (token, _) = store.issue("a@example.com", TokenPurpose::Verify).unwrap();
        assert!(store.validate(&token, TokenPurpose::Verify).is_err());
        assert_eq!(store.live_count(), 0);
    }
}
