use std::path::Path;

use chrono::{Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::otp::OtpRecord;
use crate::store::JsonStore;
use crate::utils::crypto;

const STORE_FILE: &str = "otp-store.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtpFile {
    engine: String,
    version: String,
    records: Vec<OtpRecord>,
}

impl Default for OtpFile {
    fn default() -> Self {
        Self {
            engine: "otp-engine".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            records: Vec::new(),
        }
    }
}

pub struct GenerateOtpParams {
    pub session_id: String,
    pub signer_id: String,
    pub signer_email: String,
    pub delivery_channel: String,
    pub request_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedOtp {
    pub otp_id: String,
    /// In a deployment the code travels on the delivery channel, never in an
    /// HTTP response. It is surfaced here for the caller to dispatch.
    pub code: String,
    pub expires_at: chrono::DateTime<Utc>,
    pub is_retry: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_id: Option<String>,
    pub message: String,
    pub remaining_attempts: u32,
}

/// Rate-limited, time-bound 6-digit codes per (session, signer) pair.
pub struct OtpEngine {
    store: JsonStore,
    inner: RwLock<OtpFile>,
    ttl: Duration,
    max_attempts: u32,
    min_interval: Duration,
}

impl OtpEngine {
    pub fn open(
        data_dir: &Path,
        ttl_secs: i64,
        max_attempts: u32,
        min_interval_secs: i64,
    ) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<OtpFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
            ttl: Duration::seconds(ttl_secs),
            max_attempts,
            min_interval: Duration::seconds(min_interval_secs),
        })
    }

    /// Issue a new code, superseding any active one for the pair. Enforces
    /// the minimum interval between successive generations.
    pub async fn generate(&self, params: GenerateOtpParams) -> AppResult<GeneratedOtp> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let previous = inner
            .records
            .iter()
            .filter(|r| r.session_id == params.session_id && r.signer_id == params.signer_id)
            .max_by_key(|r| r.created_at)
            .cloned();

        if let Some(prev) = &previous {
            let elapsed = now - prev.created_at;
            if elapsed < self.min_interval {
                let retry_after = (self.min_interval - elapsed).num_seconds().max(1);
                return Err(AppError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
        }

        let is_retry = previous.map(|p| !p.verified).unwrap_or(false);

        // Supersede any still-active code for the pair.
        for record in inner
            .records
            .iter_mut()
            .filter(|r| r.session_id == params.session_id && r.signer_id == params.signer_id)
        {
            if record.is_active(now) {
                record.expires_at = now;
            }
        }

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let record = OtpRecord {
            otp_id: crypto::generate_secure_id("otp_"),
            session_id: params.session_id,
            signer_id: params.signer_id,
            signer_email: params.signer_email,
            code,
            delivery_channel: params.delivery_channel,
            request_ip: params.request_ip,
            created_at: now,
            expires_at: now + self.ttl,
            remaining_attempts: self.max_attempts,
            verified: false,
            verified_at: None,
        };

        let generated = GeneratedOtp {
            otp_id: record.otp_id.clone(),
            code: record.code.clone(),
            expires_at: record.expires_at,
            is_retry,
        };

        inner.records.push(record);
        self.store.save(&*inner)?;

        metrics::counter!("otp_generated_total").increment(1);
        Ok(generated)
    }

    /// Verify a submitted code with a constant-time comparison.
    pub async fn verify(
        &self,
        session_id: &str,
        signer_id: &str,
        code: &str,
    ) -> AppResult<VerifyOutcome> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let record = inner
            .records
            .iter_mut()
            .filter(|r| r.session_id == session_id && r.signer_id == signer_id)
            .filter(|r| r.is_active(now))
            .max_by_key(|r| r.created_at);

        let Some(record) = record else {
            return Ok(VerifyOutcome {
                valid: false,
                otp_id: None,
                message: "No active code for this signer".into(),
                remaining_attempts: 0,
            });
        };

        let matches: bool = record.code.as_bytes().ct_eq(code.as_bytes()).into();
        let outcome = if matches {
            record.verified = true;
            record.verified_at = Some(now);
            VerifyOutcome {
                valid: true,
                otp_id: Some(record.otp_id.clone()),
                message: "Code verified".into(),
                remaining_attempts: record.remaining_attempts,
            }
        } else {
            record.remaining_attempts = record.remaining_attempts.saturating_sub(1);
            VerifyOutcome {
                valid: false,
                otp_id: Some(record.otp_id.clone()),
                message: "Incorrect code".into(),
                remaining_attempts: record.remaining_attempts,
            }
        };

        self.store.save(&*inner)?;
        Ok(outcome)
    }

    /// True iff a verified, unexpired record exists for the pair.
    pub async fn is_verified(&self, session_id: &str, signer_id: &str) -> bool {
        let now = Utc::now();
        self.inner
            .read()
            .await
            .records
            .iter()
            .any(|r| {
                r.session_id == session_id
                    && r.signer_id == signer_id
                    && r.verified
                    && !r.is_expired(now)
            })
    }

    /// Drop records past expiry. Returns the number removed.
    pub async fn prune_expired(&self) -> AppResult<usize> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let before = inner.records.len();
        inner.records.retain(|r| !r.is_expired(now) || r.verified);
        let removed = before - inner.records.len();
        if removed > 0 {
            self.store.save(&*inner)?;
        }
        Ok(removed)
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    #[cfg(test)]
    pub async fn backdate_last(&self, secs: i64) {
        let mut inner = self.inner.write().await;
        if let Some(last) = inner.records.last_mut() {
            last.created_at = last.created_at - Duration::seconds(secs);
        }
    }
}
