use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Post-signing agreement status with a fixed transition graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AgreementStatus {
    Draft,
    PendingReview,
    PendingSignature,
    Signed,
    Active,
    Amended,
    Breached,
    Disputed,
    Terminated,
    Completed,
    Expired,
    Archived,
}

impl AgreementStatus {
    /// Allowed destinations from this status. Any other pair is rejected.
    pub fn valid_transitions(&self) -> &'static [AgreementStatus] {
        use AgreementStatus::*;
        match self {
            Draft => &[PendingReview, PendingSignature, Archived],
            PendingReview => &[Draft, PendingSignature, Archived],
            PendingSignature => &[Signed, Draft, Archived],
            Signed => &[Active, Archived],
            Active => &[Amended, Breached, Disputed, Completed, Terminated, Expired],
            Amended => &[Active, Breached, Disputed, Terminated],
            Breached => &[Disputed, Terminated, Active],
            Disputed => &[Active, Terminated, Breached],
            Terminated => &[Archived],
            Completed => &[Archived],
            Expired => &[Archived, Active],
            Archived => &[],
        }
    }

    pub fn can_transition_to(&self, next: &AgreementStatus) -> bool {
        self.valid_transitions().contains(next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending-review",
            Self::PendingSignature => "pending-signature",
            Self::Signed => "signed",
            Self::Active => "active",
            Self::Amended => "amended",
            Self::Breached => "breached",
            Self::Disputed => "disputed",
            Self::Terminated => "terminated",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ObligationStatus {
    Pending,
    Fulfilled,
    Overdue,
    Waived,
    Breached,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    Pending,
    Triggered,
    Paid,
    Overdue,
    Disputed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeadlineType {
    Hard,
    Soft,
    Recurring,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeadlineStatus {
    Upcoming,
    Met,
    Missed,
    Extended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub obligation_id: String,
    pub description: String,
    pub assignee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub status: ObligationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTrigger {
    pub trigger_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub condition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deadline {
    pub deadline_id: String,
    pub date: DateTime<Utc>,
    pub deadline_type: DeadlineType,
    pub status: DeadlineStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amendment {
    pub amendment_id: String,
    pub version: String,
    pub description: String,
    pub effective_at: DateTime<Utc>,
    pub approvers: Vec<String>,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
}

/// One recorded status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub from: AgreementStatus,
    pub to: AgreementStatus,
    pub actor: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Post-signature artifact tracking obligations, payments and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    pub agreement_id: String,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub title: String,
    pub parties: Vec<String>,
    pub status: AgreementStatus,
    pub obligations: Vec<Obligation>,
    pub payment_triggers: Vec<PaymentTrigger>,
    pub deadlines: Vec<Deadline>,
    pub amendments: Vec<Amendment>,
    pub history: Vec<StatusTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgreementStatus::*;

    #[test]
    fn archived_is_terminal() {
        assert!(Archived.is_terminal());
        assert!(Archived.valid_transitions().is_empty());
    }

    #[test]
    fn transition_table_enforced() {
        assert!(Draft.can_transition_to(&PendingReview));
        assert!(Active.can_transition_to(&Breached));
        assert!(Expired.can_transition_to(&Active));
        assert!(!Draft.can_transition_to(&Active));
        assert!(!Signed.can_transition_to(&Draft));
        assert!(!Completed.can_transition_to(&Active));
    }

    #[test]
    fn status_serializes_kebab_case() {
        let s = serde_json::to_string(&PendingSignature).unwrap();
        assert_eq!(s, "\"pending-signature\"");
    }
}
