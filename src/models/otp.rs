use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A one-time code issued to a (session, signer) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRecord {
    pub otp_id: String,
    pub session_id: String,
    pub signer_id: String,
    pub signer_email: String,
    pub code: String,
    pub delivery_channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_attempts: u32,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl OtpRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Active = unverified, unexpired, attempts remaining.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.verified && !self.is_expired(now) && self.remaining_attempts > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(now: DateTime<Utc>) -> OtpRecord {
        OtpRecord {
            otp_id: "otp_1".into(),
            session_id: "sess_1".into(),
            signer_id: "sgn_1".into(),
            signer_email: "a@example.com".into(),
            code: "123456".into(),
            delivery_channel: "email".into(),
            request_ip: None,
            created_at: now,
            expires_at: now + Duration::minutes(10),
            remaining_attempts: 5,
            verified: false,
            verified_at: None,
        }
    }

    #[test]
    fn active_until_expiry() {
        let now = Utc::now();
        let r = record(now);
        assert!(r.is_active(now));
        assert!(!r.is_active(now + Duration::minutes(11)));
    }

    #[test]
    fn verified_is_not_active() {
        let now = Utc::now();
        let mut r = record(now);
        r.verified = true;
        assert!(!r.is_active(now));
    }
}
