use std::path::Path;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::session::{
    DistributionRecord, SessionArtifacts, SessionConfig, SessionSigner, SessionStatus,
    SignatureType, SignerStatus, SigningOrder, SigningSession,
};
use crate::store::JsonStore;
use crate::utils::crypto;

const STORE_FILE: &str = "signing-sessions.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    engine: String,
    version: String,
    sessions: Vec<SigningSession>,
}

impl Default for SessionFile {
    fn default() -> Self {
        Self {
            engine: "signing-sessions".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            sessions: Vec::new(),
        }
    }
}

pub struct SignerSpec {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub telegram: Option<String>,
    pub wallet: Option<String>,
    pub organization: Option<String>,
    pub role: String,
    pub signature_type: SignatureType,
    pub required: bool,
    pub contact_channels: Vec<String>,
}

pub struct CreateSessionParams {
    pub document_id: String,
    pub document_title: String,
    pub document_hash: String,
    pub sku: Option<String>,
    pub created_by: String,
    pub signers: Vec<SignerSpec>,
    pub threshold: Option<u32>,
    pub require_all: bool,
    pub ordering: SigningOrder,
    pub expires_in_hours: u64,
    pub require_intent: bool,
    pub require_otp: bool,
    pub base_url: String,
    pub required_initials: Vec<String>,
    pub auto_anchor: bool,
    pub auto_finalize: bool,
    pub auto_notify: bool,
}

/// Creates and mutates signing sessions, resolves per-signer capability
/// tokens, enforces ordering and threshold.
pub struct SessionEngine {
    store: JsonStore,
    inner: RwLock<SessionFile>,
}

impl SessionEngine {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<SessionFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    /// Create a session, generating a 128-bit session id and a 256-bit access
    /// token per signer.
    pub async fn create_session(&self, params: CreateSessionParams) -> AppResult<SigningSession> {
        if params.signers.is_empty() {
            return Err(AppError::BadRequest("At least one signer is required".into()));
        }
        let required_count = params.signers.iter().filter(|s| s.required).count() as u32;
        let threshold = params.threshold.unwrap_or(required_count.max(1));
        if threshold < 1 {
            return Err(AppError::BadRequest("Threshold must be at least 1".into()));
        }
        if threshold > required_count {
            return Err(AppError::BadRequest(format!(
                "Threshold {threshold} exceeds the {required_count} required signer(s)"
            )));
        }
        {
            let mut emails: Vec<&str> =
                params.signers.iter().map(|s| s.email.as_str()).collect();
            emails.sort();
            emails.dedup();
            if emails.len() != params.signers.len() {
                return Err(AppError::Conflict("Duplicate signer email".into()));
            }
        }

        let now = Utc::now();
        let expires_at = now + Duration::hours(params.expires_in_hours as i64);

        let signers: Vec<SessionSigner> = params
            .signers
            .into_iter()
            .map(|spec| SessionSigner {
                signer_id: crypto::generate_secure_id("sgn_"),
                name: spec.name,
                email: spec.email,
                phone: spec.phone,
                telegram: spec.telegram,
                wallet: spec.wallet,
                organization: spec.organization,
                role: spec.role,
                signature_type: spec.signature_type,
                required: spec.required,
                contact_channels: spec.contact_channels,
                access_token: crypto::generate_access_token(),
                token_expires_at: expires_at,
                status: SignerStatus::Pending,
                required_initials: params.required_initials.clone(),
                completed_initials: Vec::new(),
                signed_at: None,
                signature_hash: None,
                rejected_at: None,
                rejection_reason: None,
                distribution_log: Vec::new(),
                view_count: 0,
                last_viewed_at: None,
            })
            .collect();

        let mut session = SigningSession {
            session_id: crypto::generate_id128(),
            document_id: params.document_id,
            document_title: params.document_title,
            document_hash: params.document_hash,
            sku: params.sku,
            created_by: params.created_by,
            signers,
            config: SessionConfig {
                threshold,
                require_all: params.require_all,
                ordering: params.ordering,
                expires_at,
                require_intent: params.require_intent,
                require_otp: params.require_otp,
                base_url: params.base_url,
                required_initials: params.required_initials,
                auto_anchor: params.auto_anchor,
                auto_finalize: params.auto_finalize,
                auto_notify: params.auto_notify,
            },
            status: SessionStatus::Created,
            signature_count: 0,
            threshold_met: false,
            artifacts: None,
            created_at: now,
            updated_at: now,
            record_hash: String::new(),
        };
        session.rehash();

        let mut inner = self.inner.write().await;
        inner.sessions.push(session.clone());
        self.store.save(&*inner)?;

        tracing::info!(
            session_id = %session.session_id,
            document_id = %session.document_id,
            signers = session.signers.len(),
            threshold,
            "signing session created"
        );
        metrics::counter!("sessions_created_total").increment(1);

        Ok(session)
    }

    /// Resolve an access token to its session and signer. Expired tokens mark
    /// the signer *expired* and resolve to `None`; callers render the same
    /// error page for unknown and expired tokens.
    pub async fn resolve_token(
        &self,
        token: &str,
    ) -> AppResult<Option<(SigningSession, SessionSigner)>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let mut position = None;
        for (si, session) in inner.sessions.iter().enumerate() {
            if matches!(session.status, SessionStatus::Expired | SessionStatus::Cancelled) {
                continue;
            }
            if let Some(gi) = session.signers.iter().position(|s| s.access_token == token) {
                position = Some((si, gi));
                break;
            }
        }

        let Some((si, gi)) = position else {
            return Ok(None);
        };

        if now >= inner.sessions[si].signers[gi].token_expires_at {
            let session = &mut inner.sessions[si];
            if !session.signers[gi].status.is_terminal() {
                session.signers[gi].status = SignerStatus::Expired;
                session.rehash();
                self.store.save(&*inner)?;
            }
            return Ok(None);
        }

        let session = inner.sessions[si].clone();
        let signer = session.signers[gi].clone();
        Ok(Some((session, signer)))
    }

    /// Record a view: bump the counter and lift pending → viewed.
    pub async fn record_view(&self, session_id: &str, signer_id: &str) -> AppResult<SigningSession> {
        self.mutate(session_id, |session| {
            let signer = find_signer(session, signer_id)?;
            signer.view_count += 1;
            signer.last_viewed_at = Some(Utc::now());
            if signer.status == SignerStatus::Pending {
                signer.status = SignerStatus::Viewed;
            }
            Ok(())
        })
        .await
    }

    /// Record an initial on one section.
    pub async fn record_initial(
        &self,
        session_id: &str,
        signer_id: &str,
        section_id: &str,
    ) -> AppResult<SigningSession> {
        self.mutate(session_id, |session| {
            let signer = find_signer(session, signer_id)?;
            if signer.status.is_terminal() {
                return Err(AppError::Conflict(format!(
                    "Signer {} can no longer act on this session",
                    signer.email
                )));
            }
            if !signer.required_initials.iter().any(|s| s == section_id) {
                return Err(AppError::BadRequest(format!(
                    "Section {section_id} is not in the required initials list"
                )));
            }
            if signer.completed_initials.iter().any(|s| s == section_id) {
                return Err(AppError::Conflict(format!(
                    "Section {section_id} is already initialed"
                )));
            }
            signer.completed_initials.push(section_id.to_string());
            if signer.status.rank() <= SignerStatus::Viewed.rank() {
                signer.status = SignerStatus::Initialed;
            }
            Ok(())
        })
        .await
    }

    /// Record a signature. Enforces initials completion, strict ordering and
    /// threshold accounting.
    pub async fn record_signature(
        &self,
        session_id: &str,
        signer_id: &str,
        signature_hash: &str,
    ) -> AppResult<SigningSession> {
        self.mutate(session_id, |session| {
            let signer_index = index_of_signer(session, signer_id)?;
            if session.signers[signer_index].status == SignerStatus::Signed {
                return Err(AppError::Conflict(format!(
                    "Signer {} has already signed",
                    session.signers[signer_index].email
                )));
            }
            if session.status == SessionStatus::Completed || session.threshold_met {
                return Err(AppError::Conflict("Session complete".into()));
            }
            if session.status.is_terminal() {
                return Err(AppError::Conflict(format!(
                    "Session is {}",
                    serde_json::to_string(&session.status).unwrap_or_default()
                )));
            }

            {
                let signer = &session.signers[signer_index];
                if signer.status.is_terminal() {
                    return Err(AppError::Conflict(format!(
                        "Signer {} can no longer act on this session",
                        signer.email
                    )));
                }
                let missing: Vec<&String> = signer
                    .required_initials
                    .iter()
                    .filter(|s| !signer.completed_initials.contains(s))
                    .collect();
                if !missing.is_empty() {
                    return Err(AppError::BadRequest(format!(
                        "Required initials incomplete: {}",
                        missing
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }
            }

            if session.config.ordering == SigningOrder::Strict {
                let blocker = session.signers[..signer_index]
                    .iter()
                    .find(|s| s.required && s.status != SignerStatus::Signed);
                if let Some(blocker) = blocker {
                    return Err(AppError::Conflict(format!(
                        "Strict ordering: {} must sign first",
                        blocker.name
                    )));
                }
            }

            let now = Utc::now();
            {
                let signer = &mut session.signers[signer_index];
                signer.status = SignerStatus::Signed;
                signer.signed_at = Some(now);
                signer.signature_hash = Some(signature_hash.to_string());
            }
            session.signature_count += 1;

            session.threshold_met =
                session.signed_required_count() >= session.effective_threshold();
            session.status = if session.threshold_met {
                SessionStatus::ThresholdMet
            } else if session.signature_count > 0 {
                SessionStatus::Partial
            } else {
                SessionStatus::Pending
            };
            Ok(())
        })
        .await
    }

    /// Record a rejection. Cancels the session when the threshold becomes
    /// unreachable.
    pub async fn record_rejection(
        &self,
        session_id: &str,
        signer_id: &str,
        reason: &str,
    ) -> AppResult<SigningSession> {
        self.mutate(session_id, |session| {
            let needed = session.effective_threshold();
            let signer = find_signer(session, signer_id)?;
            if signer.status.is_terminal() {
                return Err(AppError::Conflict(format!(
                    "Signer {} can no longer act on this session",
                    signer.email
                )));
            }
            let was_required = signer.required;
            signer.status = SignerStatus::Rejected;
            signer.rejected_at = Some(Utc::now());
            signer.rejection_reason = Some(reason.to_string());

            if was_required {
                let achievable = session
                    .signers
                    .iter()
                    .filter(|s| {
                        s.required
                            && !matches!(s.status, SignerStatus::Rejected | SignerStatus::Expired)
                    })
                    .count() as u32;
                if achievable < needed {
                    session.status = SessionStatus::Cancelled;
                }
            }
            Ok(())
        })
        .await
    }

    /// Mark the session completed and freeze artifact references. Only
    /// allowed once the threshold is met.
    pub async fn complete_session(
        &self,
        session_id: &str,
        artifacts: SessionArtifacts,
    ) -> AppResult<SigningSession> {
        self.mutate(session_id, |session| {
            if !session.threshold_met {
                return Err(AppError::Conflict(
                    "Cannot complete a session below threshold".into(),
                ));
            }
            if session.status == SessionStatus::Completed {
                return Err(AppError::Conflict("Session already completed".into()));
            }
            session.status = SessionStatus::Completed;
            session.artifacts = Some(artifacts);
            Ok(())
        })
        .await
    }

    /// Append a delivery attempt to a signer's distribution log.
    pub async fn record_distribution(
        &self,
        session_id: &str,
        signer_id: &str,
        record: DistributionRecord,
    ) -> AppResult<SigningSession> {
        self.mutate(session_id, |session| {
            let signer = find_signer(session, signer_id)?;
            signer.distribution_log.push(record);
            if session.status == SessionStatus::Created {
                session.status = SessionStatus::Distributed;
            }
            Ok(())
        })
        .await
    }

    /// Expire all past-deadline non-terminal sessions and their signers.
    /// Returns the number of sessions expired.
    pub async fn expire_stale(&self) -> AppResult<usize> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut expired = 0;

        for session in inner.sessions.iter_mut() {
            if session.status.is_terminal() {
                continue;
            }
            if now >= session.config.expires_at {
                session.status = SessionStatus::Expired;
                for signer in session.signers.iter_mut() {
                    if !signer.status.is_terminal() {
                        signer.status = SignerStatus::Expired;
                    }
                }
                session.updated_at = now;
                session.rehash();
                expired += 1;
            }
        }

        if expired > 0 {
            self.store.save(&*inner)?;
            metrics::counter!("sessions_expired_total").increment(expired as u64);
        }
        Ok(expired)
    }

    pub async fn get(&self, session_id: &str) -> Option<SigningSession> {
        self.inner
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Apply a mutation, then refresh timestamps + self-hash and persist.
    async fn mutate<F>(&self, session_id: &str, f: F) -> AppResult<SigningSession>
    where
        F: FnOnce(&mut SigningSession) -> AppResult<()>,
    {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| AppError::NotFound(format!("No session {session_id}")))?;

        f(session)?;

        session.updated_at = Utc::now();
        session.rehash();
        let snapshot = session.clone();
        self.store.save(&*inner)?;
        Ok(snapshot)
    }

    #[cfg(test)]
    pub async fn backdate_expiry(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .unwrap();
        session.config.expires_at = Utc::now() - Duration::seconds(1);
    }
}

fn find_signer<'a>(
    session: &'a mut SigningSession,
    signer_id: &str,
) -> AppResult<&'a mut SessionSigner> {
    session
        .signers
        .iter_mut()
        .find(|s| s.signer_id == signer_id)
        .ok_or_else(|| AppError::NotFound(format!("No signer {signer_id} in session")))
}

fn index_of_signer(session: &SigningSession, signer_id: &str) -> AppResult<usize> {
    session
        .signers
        .iter()
        .position(|s| s.signer_id == signer_id)
        .ok_or_else(|| AppError::NotFound(format!("No signer {signer_id} in session")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(name: &str, required: bool) -> SignerSpec {
        SignerSpec {
            name: name.to_uppercase(),
            email: format!("{name}@example.com"),
            phone: None,
            telegram: None,
            wallet: None,
            organization: None,
            role: "counterparty".into(),
            signature_type: SignatureType::Counterparty,
            required,
            contact_channels: vec!["email".into()],
        }
    }

    fn base_params(signers: Vec<SignerSpec>, threshold: Option<u32>) -> CreateSessionParams {
        CreateSessionParams {
            document_id: "doc_1".into(),
            document_title: "Contract".into(),
            document_hash: "d".repeat(64),
            sku: None,
            created_by: "creator@example.com".into(),
            signers,
            threshold,
            require_all: false,
            ordering: SigningOrder::Any,
            expires_in_hours: 72,
            require_intent: true,
            require_otp: false,
            base_url: "http://localhost:8100/sign".into(),
            required_initials: Vec::new(),
            auto_anchor: false,
            auto_finalize: false,
            auto_notify: false,
        }
    }

    async fn engine(dir: &Path) -> SessionEngine {
        SessionEngine::open(dir).unwrap()
    }

    #[tokio::test]
    async fn create_issues_unique_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let session = sessions
            .create_session(base_params(vec![signer("alice", true), signer("bob", true)], Some(2)))
            .await
            .unwrap();

        assert_eq!(session.session_id.len(), 32);
        assert_eq!(session.signers.len(), 2);
        assert_ne!(session.signers[0].access_token, session.signers[1].access_token);
        assert_eq!(session.signers[0].access_token.len(), 64);
        assert_eq!(session.status, SessionStatus::Created);
    }

    #[tokio::test]
    async fn threshold_cannot_exceed_required() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let err = sessions
            .create_session(base_params(vec![signer("alice", true)], Some(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn resolve_token_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let session = sessions
            .create_session(base_params(vec![signer("alice", true)], Some(1)))
            .await
            .unwrap();
        let token = session.signers[0].access_token.clone();

        let resolved = sessions.resolve_token(&token).await.unwrap();
        assert!(resolved.is_some());
        assert!(sessions.resolve_token(&"0".repeat(64)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn single_signer_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let session = sessions
            .create_session(base_params(vec![signer("alice", true)], Some(1)))
            .await
            .unwrap();
        let signer_id = session.signers[0].signer_id.clone();

        sessions.record_view(&session.session_id, &signer_id).await.unwrap();
        let after = sessions
            .record_signature(&session.session_id, &signer_id, &"s".repeat(64))
            .await
            .unwrap();

        assert!(after.threshold_met);
        assert_eq!(after.status, SessionStatus::ThresholdMet);
        assert_eq!(after.signature_count, 1);

        let err = sessions
            .record_signature(&session.session_id, &signer_id, &"s".repeat(64))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already signed"));
    }

    #[tokio::test]
    async fn strict_ordering_blocks_later_signers() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let mut params = base_params(vec![signer("alice", true), signer("bob", true)], Some(2));
        params.ordering = SigningOrder::Strict;
        let session = sessions.create_session(params).await.unwrap();
        let alice = session.signers[0].signer_id.clone();
        let bob = session.signers[1].signer_id.clone();

        let err = sessions
            .record_signature(&session.session_id, &bob, &"s".repeat(64))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ALICE must sign first"));

        let after = sessions.get(&session.session_id).await.unwrap();
        assert_eq!(after.signers[1].status, SignerStatus::Pending);

        sessions
            .record_signature(&session.session_id, &alice, &"a".repeat(64))
            .await
            .unwrap();
        let after = sessions
            .record_signature(&session.session_id, &bob, &"b".repeat(64))
            .await
            .unwrap();
        assert_eq!(after.status, SessionStatus::ThresholdMet);
    }

    #[tokio::test]
    async fn initials_gate_signature() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let mut params = base_params(vec![signer("alice", true)], Some(1));
        params.required_initials = vec!["sec-1".into(), "sec-2".into()];
        let session = sessions.create_session(params).await.unwrap();
        let alice = session.signers[0].signer_id.clone();

        let err = sessions
            .record_signature(&session.session_id, &alice, &"s".repeat(64))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("initials incomplete"));

        sessions
            .record_initial(&session.session_id, &alice, "sec-1")
            .await
            .unwrap();
        // Duplicate initial is rejected.
        assert!(sessions
            .record_initial(&session.session_id, &alice, "sec-1")
            .await
            .is_err());
        // Unknown section is rejected.
        assert!(sessions
            .record_initial(&session.session_id, &alice, "sec-9")
            .await
            .is_err());
        sessions
            .record_initial(&session.session_id, &alice, "sec-2")
            .await
            .unwrap();

        let after = sessions
            .record_signature(&session.session_id, &alice, &"s".repeat(64))
            .await
            .unwrap();
        assert!(after.threshold_met);
    }

    #[tokio::test]
    async fn required_rejection_cancels_when_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let session = sessions
            .create_session(base_params(vec![signer("alice", true), signer("bob", true)], Some(2)))
            .await
            .unwrap();
        let bob = session.signers[1].signer_id.clone();

        let after = sessions
            .record_rejection(&session.session_id, &bob, "not acceptable")
            .await
            .unwrap();
        assert_eq!(after.status, SessionStatus::Cancelled);
        assert_eq!(after.signers[1].status, SignerStatus::Rejected);
    }

    #[tokio::test]
    async fn complete_requires_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let session = sessions
            .create_session(base_params(vec![signer("alice", true)], Some(1)))
            .await
            .unwrap();

        assert!(sessions
            .complete_session(&session.session_id, SessionArtifacts::default())
            .await
            .is_err());

        let alice = session.signers[0].signer_id.clone();
        sessions
            .record_signature(&session.session_id, &alice, &"s".repeat(64))
            .await
            .unwrap();
        let done = sessions
            .complete_session(&session.session_id, SessionArtifacts::default())
            .await
            .unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn expire_stale_marks_sessions_and_signers() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let session = sessions
            .create_session(base_params(vec![signer("alice", true)], Some(1)))
            .await
            .unwrap();

        sessions.backdate_expiry(&session.session_id).await;
        let count = sessions.expire_stale().await.unwrap();
        assert_eq!(count, 1);

        let after = sessions.get(&session.session_id).await.unwrap();
        assert_eq!(after.status, SessionStatus::Expired);
        assert_eq!(after.signers[0].status, SignerStatus::Expired);
    }

    #[tokio::test]
    async fn session_hash_tracks_state() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine(dir.path()).await;
        let session = sessions
            .create_session(base_params(vec![signer("alice", true)], Some(1)))
            .await
            .unwrap();
        let alice = session.signers[0].signer_id.clone();
        let before = session.record_hash.clone();

        let after = sessions
            .record_signature(&session.session_id, &alice, &"s".repeat(64))
            .await
            .unwrap();
        assert_ne!(before, after.record_hash);
        assert_eq!(after.record_hash, after.compute_record_hash());
    }
}
