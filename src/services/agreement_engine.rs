use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::agreement::{
    Agreement, AgreementStatus, Amendment, Deadline, DeadlineStatus, DeadlineType, Obligation,
    ObligationStatus, PaymentStatus, PaymentTrigger, StatusTransition,
};
use crate::store::JsonStore;
use crate::utils::crypto;

const STORE_FILE: &str = "agreement-states.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgreementFile {
    engine: String,
    version: String,
    agreements: Vec<Agreement>,
}

impl Default for AgreementFile {
    fn default() -> Self {
        Self {
            engine: "agreement-states".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            agreements: Vec::new(),
        }
    }
}

pub struct CreateAgreementParams {
    pub document_id: String,
    pub workflow_id: Option<String>,
    pub title: String,
    pub parties: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueObligation {
    pub agreement_id: String,
    pub obligation: Obligation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineFinding {
    pub agreement_id: String,
    pub deadline: Deadline,
}

/// Post-signature obligation, payment and deadline tracking with a fixed
/// status-transition graph.
pub struct AgreementEngine {
    store: JsonStore,
    inner: RwLock<AgreementFile>,
}

impl AgreementEngine {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<AgreementFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    pub async fn create_agreement(&self, params: CreateAgreementParams) -> AppResult<Agreement> {
        let now = Utc::now();
        let agreement = Agreement {
            agreement_id: crypto::generate_secure_id("agr_"),
            document_id: params.document_id,
            workflow_id: params.workflow_id,
            title: params.title,
            parties: params.parties,
            status: AgreementStatus::Draft,
            obligations: Vec::new(),
            payment_triggers: Vec::new(),
            deadlines: Vec::new(),
            amendments: Vec::new(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.agreements.push(agreement.clone());
        self.store.save(&*inner)?;

        tracing::info!(agreement_id = %agreement.agreement_id, "agreement created");
        Ok(agreement)
    }

    /// The only way `status` changes. Validates the (from, to) pair against
    /// the fixed transition graph.
    pub async fn transition_status(
        &self,
        agreement_id: &str,
        new_status: AgreementStatus,
        actor: &str,
        reason: &str,
        evidence: Option<serde_json::Value>,
    ) -> AppResult<Agreement> {
        self.mutate(agreement_id, |agreement| {
            let from = agreement.status;
            if !from.can_transition_to(&new_status) {
                return Err(AppError::StateMachine {
                    message: format!(
                        "Agreement cannot move from {} to {}",
                        from.as_str(),
                        new_status.as_str()
                    ),
                    allowed: from
                        .valid_transitions()
                        .iter()
                        .map(|s| s.as_str().to_string())
                        .collect(),
                });
            }
            agreement.history.push(StatusTransition {
                from,
                to: new_status,
                actor: actor.to_string(),
                reason: reason.to_string(),
                evidence,
                timestamp: Utc::now(),
            });
            agreement.status = new_status;
            Ok(())
        })
        .await
    }

    pub async fn add_obligation(
        &self,
        agreement_id: &str,
        description: &str,
        assignee: &str,
        due_at: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<Agreement> {
        self.mutate(agreement_id, |agreement| {
            agreement.obligations.push(Obligation {
                obligation_id: crypto::generate_secure_id("obl_"),
                description: description.to_string(),
                assignee: assignee.to_string(),
                due_at,
                status: ObligationStatus::Pending,
            });
            Ok(())
        })
        .await
    }

    pub async fn add_payment_trigger(
        &self,
        agreement_id: &str,
        amount: rust_decimal::Decimal,
        currency: &str,
        condition: &str,
        due_at: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<Agreement> {
        self.mutate(agreement_id, |agreement| {
            agreement.payment_triggers.push(PaymentTrigger {
                trigger_id: crypto::generate_secure_id("pay_"),
                amount,
                currency: currency.to_string(),
                condition: condition.to_string(),
                due_at,
                status: PaymentStatus::Pending,
            });
            Ok(())
        })
        .await
    }

    pub async fn add_deadline(
        &self,
        agreement_id: &str,
        date: chrono::DateTime<Utc>,
        deadline_type: DeadlineType,
    ) -> AppResult<Agreement> {
        self.mutate(agreement_id, |agreement| {
            agreement.deadlines.push(Deadline {
                deadline_id: crypto::generate_secure_id("ddl_"),
                date,
                deadline_type,
                status: DeadlineStatus::Upcoming,
            });
            Ok(())
        })
        .await
    }

    pub async fn add_amendment(
        &self,
        agreement_id: &str,
        version: &str,
        description: &str,
        effective_at: chrono::DateTime<Utc>,
        approvers: Vec<String>,
        content_hash: &str,
    ) -> AppResult<Agreement> {
        self.mutate(agreement_id, |agreement| {
            let previous_version = agreement.amendments.last().map(|a| a.version.clone());
            agreement.amendments.push(Amendment {
                amendment_id: crypto::generate_secure_id("amd_"),
                version: version.to_string(),
                description: description.to_string(),
                effective_at,
                approvers,
                content_hash: content_hash.to_string(),
                previous_version,
            });
            Ok(())
        })
        .await
    }

    /// Flip past-due pending obligations to *overdue* across all non-terminal
    /// agreements and return the findings.
    pub async fn get_overdue_obligations(&self) -> AppResult<Vec<OverdueObligation>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut findings = Vec::new();
        let mut dirty = false;

        for agreement in inner.agreements.iter_mut() {
            if agreement.status.is_terminal() {
                continue;
            }
            for obligation in agreement.obligations.iter_mut() {
                if obligation.status == ObligationStatus::Pending
                    && obligation.due_at.map(|d| d < now).unwrap_or(false)
                {
                    obligation.status = ObligationStatus::Overdue;
                    dirty = true;
                    agreement.updated_at = now;
                }
                if obligation.status == ObligationStatus::Overdue {
                    findings.push(OverdueObligation {
                        agreement_id: agreement.agreement_id.clone(),
                        obligation: obligation.clone(),
                    });
                }
            }
        }

        if dirty {
            self.store.save(&*inner)?;
        }
        Ok(findings)
    }

    /// Mark past-due upcoming deadlines *missed* and return the findings.
    pub async fn check_deadlines(&self) -> AppResult<Vec<DeadlineFinding>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut findings = Vec::new();
        let mut dirty = false;

        for agreement in inner.agreements.iter_mut() {
            if agreement.status.is_terminal() {
                continue;
            }
            for deadline in agreement.deadlines.iter_mut() {
                if deadline.status == DeadlineStatus::Upcoming && deadline.date < now {
                    deadline.status = DeadlineStatus::Missed;
                    dirty = true;
                    agreement.updated_at = now;
                    findings.push(DeadlineFinding {
                        agreement_id: agreement.agreement_id.clone(),
                        deadline: deadline.clone(),
                    });
                }
            }
        }

        if dirty {
            self.store.save(&*inner)?;
        }
        Ok(findings)
    }

    pub async fn get(&self, agreement_id: &str) -> Option<Agreement> {
        self.inner
            .read()
            .await
            .agreements
            .iter()
            .find(|a| a.agreement_id == agreement_id)
            .cloned()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.agreements.len()
    }

    async fn mutate<F>(&self, agreement_id: &str, f: F) -> AppResult<Agreement>
    where
        F: FnOnce(&mut Agreement) -> AppResult<()>,
    {
        let mut inner = self.inner.write().await;
        let agreement = inner
            .agreements
            .iter_mut()
            .find(|a| a.agreement_id == agreement_id)
            .ok_or_else(|| AppError::NotFound(format!("No agreement {agreement_id}")))?;

        f(agreement)?;

        agreement.updated_at = Utc::now();
        let snapshot = agreement.clone();
        self.store.save(&*inner)?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn params() -> CreateAgreementParams {
        CreateAgreementParams {
            document_id: "doc_1".into(),
            workflow_id: None,
            title: "Service agreement".into(),
            parties: vec!["a@example.com".into(), "b@example.com".into()],
        }
    }

    async fn engine(dir: &Path) -> AgreementEngine {
        AgreementEngine::open(dir).unwrap()
    }

    #[tokio::test]
    async fn valid_transitions_append_history() {
        let dir = tempfile::tempdir().unwrap();
        let agreements = engine(dir.path()).await;
        let agreement = agreements.create_agreement(params()).await.unwrap();

        let after = agreements
            .transition_status(
                &agreement.agreement_id,
                AgreementStatus::PendingSignature,
                "ops",
                "ready for signatures",
                None,
            )
            .await
            .unwrap();
        assert_eq!(after.status, AgreementStatus::PendingSignature);
        assert_eq!(after.history.len(), 1);
        assert_eq!(after.history[0].from, AgreementStatus::Draft);
    }

    #[tokio::test]
    async fn invalid_transition_reports_allowed_states() {
        let dir = tempfile::tempdir().unwrap();
        let agreements = engine(dir.path()).await;
        let agreement = agreements.create_agreement(params()).await.unwrap();

        let err = agreements
            .transition_status(
                &agreement.agreement_id,
                AgreementStatus::Active,
                "ops",
                "skip ahead",
                None,
            )
            .await
            .unwrap_err();
        match err {
            AppError::StateMachine { allowed, .. } => {
                assert!(allowed.contains(&"pending-review".to_string()));
                assert!(!allowed.contains(&"active".to_string()));
            }
            other => panic!("expected state-machine error, got {other}"),
        }
    }

    #[tokio::test]
    async fn archived_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let agreements = engine(dir.path()).await;
        let agreement = agreements.create_agreement(params()).await.unwrap();
        agreements
            .transition_status(&agreement.agreement_id, AgreementStatus::Archived, "ops", "shelved", None)
            .await
            .unwrap();

        assert!(agreements
            .transition_status(&agreement.agreement_id, AgreementStatus::Draft, "ops", "revive", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn overdue_sweep_flips_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let agreements = engine(dir.path()).await;
        let agreement = agreements.create_agreement(params()).await.unwrap();
        agreements
            .add_obligation(
                &agreement.agreement_id,
                "deliver report",
                "a@example.com",
                Some(Utc::now() - Duration::days(1)),
            )
            .await
            .unwrap();
        agreements
            .add_obligation(
                &agreement.agreement_id,
                "future work",
                "b@example.com",
                Some(Utc::now() + Duration::days(30)),
            )
            .await
            .unwrap();

        let findings = agreements.get_overdue_obligations().await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].obligation.status, ObligationStatus::Overdue);
    }

    #[tokio::test]
    async fn deadline_sweep_marks_missed() {
        let dir = tempfile::tempdir().unwrap();
        let agreements = engine(dir.path()).await;
        let agreement = agreements.create_agreement(params()).await.unwrap();
        agreements
            .add_deadline(
                &agreement.agreement_id,
                Utc::now() - Duration::hours(2),
                DeadlineType::Hard,
            )
            .await
            .unwrap();

        let findings = agreements.check_deadlines().await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].deadline.status, DeadlineStatus::Missed);

        // A second sweep reports nothing new.
        assert!(agreements.check_deadlines().await.unwrap().is_empty());
    }
}
