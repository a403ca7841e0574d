use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::intent::{ConsentEvidence, DeviceEvidence, IntentAction};
use crate::models::session::{SessionSigner, SignatureType, SigningOrder, SigningSession};
use crate::routes::ok;
use crate::services::intent_logger::LogIntentParams;
use crate::services::lifecycle_registry::CreateLifecycleParams;
use crate::services::otp_engine::GenerateOtpParams;
use crate::services::session_engine::{CreateSessionParams, SignerSpec};
use crate::utils::{crypto, validation};
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub telegram: Option<String>,
    pub wallet: Option<String>,
    pub organization: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub signature_type: SignatureType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub contact_channels: Vec<String>,
}

fn default_role() -> String {
    "counterparty".into()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreateRequest {
    pub document_id: String,
    pub document_title: String,
    pub document_hash: String,
    pub sku: Option<String>,
    pub creator: String,
    pub signers: Vec<SignerRequest>,
    pub threshold: Option<u32>,
    #[serde(default)]
    pub require_all: bool,
    #[serde(default)]
    pub ordering: SigningOrder,
    pub expires_in_hours: Option<u64>,
    #[serde(default = "default_true")]
    pub require_intent: bool,
    #[serde(rename = "requireOTP", default)]
    pub require_otp: bool,
    #[serde(default)]
    pub required_initials: Vec<String>,
    #[serde(default)]
    pub auto_anchor: bool,
    #[serde(default)]
    pub auto_finalize: bool,
    #[serde(default)]
    pub auto_notify: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialRequest {
    pub section_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    #[serde(default)]
    pub consent: bool,
    pub consent_text: Option<String>,
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningLink {
    pub name: String,
    pub email: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerSummary {
    pub name: String,
    pub email: String,
    pub role: String,
    pub status: crate::models::session::SignerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    pub view_count: u32,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/sign/:token", get(signing_page).post(submit_signature))
        .route("/sign/:token/initial", post(submit_initial))
        .route("/sign/:token/otp", post(request_otp))
        .route("/sign/:token/verify-otp", post(verify_otp))
        .route("/session", post(create_session))
        .route("/session/:id", get(session_status))
        .route("/session/:id/evidence", get(session_evidence))
}

// ---------------------------------------------------------------------------
// Handlers: pages
// ---------------------------------------------------------------------------

async fn dashboard(State(state): State<AppState>) -> Html<String> {
    let sessions = state.sessions.count().await;
    let lifecycles = state.registry.count().await;
    let intents = state.intents.count().await;
    let anchors = state.anchors.count().await;

    Html(format!(
        r#"<!doctype html>
<html><head><title>Signing Gateway</title></head>
<body>
<h1>Sovereign Document Signing Gateway</h1>
<ul>
<li>Documents under custody: {lifecycles}</li>
<li>Signing sessions: {sessions}</li>
<li>Recorded intents: {intents}</li>
<li>Ledger anchors: {anchors}</li>
</ul>
</body></html>"#
    ))
}

/// The per-signer signing page. Unknown and expired tokens render the same
/// generic error page.
async fn signing_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Html<String>) {
    let Ok(Some((session, signer))) = state.sessions.resolve_token(&token).await else {
        return (StatusCode::NOT_FOUND, error_page());
    };

    let _ = state
        .sessions
        .record_view(&session.session_id, &signer.signer_id)
        .await;
    let _ = state
        .intents
        .log(intent_params(
            &session,
            &signer,
            IntentAction::DocumentViewed,
            &headers,
            None,
            None,
            None,
        ))
        .await;
    metrics::counter!("signing_page_views_total").increment(1);

    let initials_list = if signer.required_initials.is_empty() {
        "<p>No per-section initials are required.</p>".to_string()
    } else {
        let items: String = signer
            .required_initials
            .iter()
            .map(|s| {
                let done = signer.completed_initials.contains(s);
                format!(
                    "<li>{s}: {}</li>",
                    if done { "initialed" } else { "pending" }
                )
            })
            .collect();
        format!("<ol>{items}</ol>")
    };

    let otp_note = if session.config.require_otp {
        "<p>A one-time code will be required before signing.</p>"
    } else {
        ""
    };

    (
        StatusCode::OK,
        Html(format!(
            r#"<!doctype html>
<html><head><title>Sign: {title}</title></head>
<body>
<h1>{title}</h1>
<p>Signer: {name} &lt;{email}&gt; ({role})</p>
<p>Document hash: <code>{hash}</code></p>
<h2>Required initials</h2>
{initials_list}
{otp_note}
<h2>Consent</h2>
<p>{consent}</p>
</body></html>"#,
            title = session.document_title,
            name = signer.name,
            email = signer.email,
            role = signer.role,
            hash = session.document_hash,
            consent = consent_text(&session),
        )),
    )
}

fn error_page() -> Html<String> {
    // Deliberately identical for unknown and expired tokens.
    Html(
        r#"<!doctype html>
<html><head><title>Signing link unavailable</title></head>
<body>
<h1>This signing link is not available</h1>
<p>The link may have expired or never existed. Contact the document sender
for a fresh link.</p>
</body></html>"#
            .to_string(),
    )
}

fn consent_text(session: &SigningSession) -> String {
    format!(
        "By signing you agree to be legally bound by the document \"{}\" \
(hash {}). Your actions on this page are recorded in a tamper-evident log.",
        session.document_title, session.document_hash
    )
}

// ---------------------------------------------------------------------------
// Handlers: signing API
// ---------------------------------------------------------------------------

async fn submit_initial(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(req): Json<InitialRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let (session, signer) = resolve(&state, &token).await?;

    let updated = state
        .sessions
        .record_initial(&session.session_id, &signer.signer_id, &req.section_id)
        .await?;

    let _ = state
        .intents
        .log(intent_params(
            &session,
            &signer,
            IntentAction::SectionInitialed,
            &headers,
            None,
            Some(req.section_id.clone()),
            None,
        ))
        .await;

    let signer_after = updated
        .signers
        .iter()
        .find(|s| s.signer_id == signer.signer_id)
        .cloned()
        .ok_or_else(|| AppError::Internal("Signer vanished".into()))?;

    Ok(ok(json!({
        "sectionId": req.section_id,
        "completedInitials": signer_after.completed_initials,
        "requiredInitials": signer_after.required_initials,
        "signerStatus": signer_after.status,
    })))
}

async fn request_otp(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let (session, signer) = resolve(&state, &token).await?;

    let generated = state
        .otp
        .generate(GenerateOtpParams {
            session_id: session.session_id.clone(),
            signer_id: signer.signer_id.clone(),
            signer_email: signer.email.clone(),
            delivery_channel: signer
                .contact_channels
                .first()
                .cloned()
                .unwrap_or_else(|| "email".into()),
            request_ip: client_ip(&headers),
        })
        .await?;

    let _ = state
        .intents
        .log(intent_params(
            &session,
            &signer,
            IntentAction::OtpRequested,
            &headers,
            None,
            None,
            None,
        ))
        .await;

    // The code itself goes out on the delivery channel, never over HTTP.
    tracing::info!(
        session_id = %session.session_id,
        signer = %signer.email,
        otp_id = %generated.otp_id,
        "OTP issued for delivery"
    );

    Ok(ok(json!({
        "expiresAt": generated.expires_at,
        "isRetry": generated.is_retry,
    })))
}

async fn verify_otp(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(req): Json<VerifyOtpRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let (session, signer) = resolve(&state, &token).await?;

    let outcome = state
        .otp
        .verify(&session.session_id, &signer.signer_id, &req.code)
        .await?;

    let action = if outcome.valid {
        IntentAction::OtpVerified
    } else {
        IntentAction::OtpFailed
    };
    let _ = state
        .intents
        .log(intent_params(&session, &signer, action, &headers, None, None, None))
        .await;

    if !outcome.valid {
        return Err(AppError::BadRequest(format!(
            "{} ({} attempts remaining)",
            outcome.message, outcome.remaining_attempts
        )));
    }

    Ok(ok(json!({
        "verified": true,
        "otpId": outcome.otp_id,
    })))
}

async fn submit_signature(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SignRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let (session, signer) = resolve(&state, &token).await?;

    if session.config.require_intent && !req.consent {
        return Err(AppError::BadRequest(
            "Explicit consent is required before signing".into(),
        ));
    }
    if session.config.require_otp
        && !state
            .otp
            .is_verified(&session.session_id, &signer.signer_id)
            .await
    {
        return Err(AppError::BadRequest(
            "A verified one-time code is required before signing".into(),
        ));
    }

    let now = Utc::now();
    if session.config.require_intent {
        let consent = ConsentEvidence {
            text: req
                .consent_text
                .clone()
                .unwrap_or_else(|| consent_text(&session)),
            method: "checkbox".into(),
            scope: "full-document".into(),
            timestamp: now,
        };
        let _ = state
            .intents
            .log(intent_params(
                &session,
                &signer,
                IntentAction::ConsentGiven,
                &headers,
                Some(consent),
                None,
                req.device_fingerprint.clone(),
            ))
            .await;
    }

    // Canonical signature construction, shared with the multi-sig engine.
    let merkle_root = state
        .registry
        .get(&session.document_id)
        .await
        .and_then(|r| r.merkle_root)
        .unwrap_or_default();
    let signature_id = crypto::generate_secure_id("sig_");
    let device_fingerprint = req.device_fingerprint.clone().unwrap_or_default();
    let signature_hash = crypto::signature_hash(&crypto::SignatureInput {
        signature_id: &signature_id,
        name: &signer.name,
        email: &signer.email,
        role: &signer.role,
        signature_type: signer.signature_type.as_str(),
        document_hash: &session.document_hash,
        merkle_root: &merkle_root,
        signed_at: &now.to_rfc3339(),
        device_fingerprint: &device_fingerprint,
    });

    let updated = state
        .sessions
        .record_signature(&session.session_id, &signer.signer_id, &signature_hash)
        .await?;

    let mut context = serde_json::Map::new();
    context.insert("signatureHash".into(), json!(signature_hash.clone()));
    let _ = state
        .intents
        .log(LogIntentParams {
            context,
            ..intent_params(
                &session,
                &signer,
                IntentAction::SignatureSubmitted,
                &headers,
                None,
                None,
                req.device_fingerprint,
            )
        })
        .await;

    if updated.threshold_met {
        let _ = state
            .events
            .append(
                "session-threshold-met",
                &signer.email,
                json!({
                    "sessionId": updated.session_id.clone(),
                    "documentId": updated.document_id.clone(),
                    "signatureCount": updated.signature_count,
                }),
                None,
                None,
            )
            .await;
    }
    metrics::counter!("signatures_recorded_total").increment(1);

    Ok(ok(json!({
        "signatureHash": signature_hash,
        "sessionStatus": updated.status,
        "thresholdMet": updated.threshold_met,
    })))
}

// ---------------------------------------------------------------------------
// Handlers: session API
// ---------------------------------------------------------------------------

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<SessionCreateRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    validate_create_request(&req)?;
    metrics::counter!("http_requests_total", "endpoint" => "create_session").increment(1);

    // Sessions bind the document hash; make sure the custody record exists.
    state
        .registry
        .create_lifecycle(CreateLifecycleParams {
            document_id: req.document_id.clone(),
            sku: req.sku.clone().unwrap_or_else(|| req.document_id.clone()),
            source_file: String::new(),
            title: req.document_title.clone(),
            draft_hash: req.document_hash.clone(),
            canonical_hash: None,
            merkle_root: None,
            actor: req.creator.clone(),
            previous_version_id: None,
        })
        .await?;

    let session = state
        .sessions
        .create_session(CreateSessionParams {
            document_id: req.document_id.clone(),
            document_title: req.document_title,
            document_hash: req.document_hash,
            sku: req.sku,
            created_by: req.creator.clone(),
            signers: req
                .signers
                .into_iter()
                .map(|s| SignerSpec {
                    name: s.name,
                    email: s.email,
                    phone: s.phone,
                    telegram: s.telegram,
                    wallet: s.wallet,
                    organization: s.organization,
                    role: s.role,
                    signature_type: s.signature_type,
                    required: s.required,
                    contact_channels: if s.contact_channels.is_empty() {
                        vec!["email".into()]
                    } else {
                        s.contact_channels
                    },
                })
                .collect(),
            threshold: req.threshold,
            require_all: req.require_all,
            ordering: req.ordering,
            expires_in_hours: req
                .expires_in_hours
                .unwrap_or(state.config.session_expiry_hours),
            require_intent: req.require_intent,
            require_otp: req.require_otp,
            base_url: state.config.base_url.clone(),
            required_initials: req.required_initials,
            auto_anchor: req.auto_anchor,
            auto_finalize: req.auto_finalize,
            auto_notify: req.auto_notify,
        })
        .await?;

    let _ = state
        .events
        .append(
            "session-created",
            &req.creator,
            json!({
                "sessionId": session.session_id.clone(),
                "documentId": session.document_id.clone(),
                "signers": session.signers.len(),
            }),
            None,
            None,
        )
        .await;

    let links: Vec<SigningLink> = session
        .signers
        .iter()
        .map(|s| SigningLink {
            name: s.name.clone(),
            email: s.email.clone(),
            url: session.signing_url(s),
        })
        .collect();

    Ok((
        StatusCode::CREATED,
        ok(json!({
            "sessionId": session.session_id,
            "signingLinks": links,
            "expiresAt": session.config.expires_at,
        })),
    ))
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No session {id}")))?;

    let signers: Vec<SignerSummary> = session
        .signers
        .iter()
        .map(|s| SignerSummary {
            name: s.name.clone(),
            email: s.email.clone(),
            role: s.role.clone(),
            status: s.status,
            signed_at: s.signed_at,
            view_count: s.view_count,
        })
        .collect();

    Ok(ok(json!({
        "sessionId": session.session_id,
        "status": session.status,
        "signatureCount": session.signature_count,
        "threshold": session.config.threshold,
        "thresholdMet": session.threshold_met,
        "signers": signers,
        "artifacts": session.artifacts,
    })))
}

async fn session_evidence(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<(StatusCode, String)> {
    if state.sessions.get(&id).await.is_none() {
        return Err(AppError::NotFound(format!("No session {id}")));
    }
    Ok((StatusCode::OK, state.intents.evidence_report(&id).await))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve a token for the API endpoints, mapping unknown and expired to the
/// same generic 401.
async fn resolve(state: &AppState, token: &str) -> AppResult<(SigningSession, SessionSigner)> {
    state
        .sessions
        .resolve_token(token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired signing link".into()))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

fn device_evidence(headers: &HeaderMap, fingerprint: Option<String>) -> DeviceEvidence {
    DeviceEvidence {
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        client: None,
        os: None,
        device_fingerprint: fingerprint,
        platform: None,
        language: headers
            .get("accept-language")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    }
}

fn intent_params(
    session: &SigningSession,
    signer: &SessionSigner,
    action: IntentAction,
    headers: &HeaderMap,
    consent: Option<ConsentEvidence>,
    section_id: Option<String>,
    device_fingerprint: Option<String>,
) -> LogIntentParams {
    LogIntentParams {
        session_id: session.session_id.clone(),
        document_id: session.document_id.clone(),
        signer_id: signer.signer_id.clone(),
        signer_email: signer.email.clone(),
        signer_name: signer.name.clone(),
        action,
        ip_address: client_ip(headers),
        device: device_evidence(headers, device_fingerprint),
        consent,
        section_id,
        context: Default::default(),
    }
}

fn validate_create_request(req: &SessionCreateRequest) -> AppResult<()> {
    if req.document_id.trim().is_empty() {
        return Err(AppError::BadRequest("documentId is required".into()));
    }
    if !validation::is_valid_sha256(&req.document_hash) {
        return Err(AppError::BadRequest(
            "documentHash must be a 64-character hex SHA-256".into(),
        ));
    }
    if let Some(sku) = &req.sku {
        if !validation::is_valid_sku(sku) {
            return Err(AppError::BadRequest(format!("Invalid SKU: {sku}")));
        }
    }
    if req.signers.is_empty() {
        return Err(AppError::BadRequest("At least one signer is required".into()));
    }
    for signer in &req.signers {
        if !validation::is_valid_email(&signer.email) {
            return Err(AppError::BadRequest(format!(
                "Invalid signer email: {}",
                signer.email
            )));
        }
    }
    Ok(())
}
