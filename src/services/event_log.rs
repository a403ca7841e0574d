use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::models::cid::EventLogEntry;
use crate::store::JsonStore;
use crate::utils::crypto;

const STORE_FILE: &str = "event-log.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventFile {
    engine: String,
    version: String,
    entries: Vec<EventLogEntry>,
}

impl Default for EventFile {
    fn default() -> Self {
        Self {
            engine: "event-log".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventChainReport {
    pub valid: bool,
    pub entry_count: usize,
    pub issues: Vec<String>,
}

/// Single global hash chain of audit events across all documents.
pub struct EventLog {
    store: JsonStore,
    inner: RwLock<EventFile>,
}

impl EventLog {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<EventFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    /// Append a tamper-evident entry to the global chain.
    pub async fn append(
        &self,
        action: &str,
        actor: &str,
        details: serde_json::Value,
        fingerprint: Option<String>,
        cid: Option<String>,
    ) -> AppResult<EventLogEntry> {
        let mut inner = self.inner.write().await;

        let (previous_chain_hash, sequence) = match inner.entries.last() {
            Some(prev) => (prev.chain_hash.clone(), prev.sequence + 1),
            None => (crypto::GENESIS_MARKER.to_string(), 1),
        };

        let mut entry = EventLogEntry {
            action: action.to_string(),
            actor: actor.to_string(),
            timestamp: Utc::now(),
            details,
            fingerprint,
            cid,
            previous_chain_hash,
            chain_hash: String::new(),
            sequence,
        };
        entry.chain_hash = entry.compute_chain_hash();

        inner.entries.push(entry.clone());
        self.store.save(&*inner)?;

        tracing::debug!(action = action, actor = actor, sequence = entry.sequence, "event logged");
        metrics::counter!("event_log_entries_total").increment(1);

        Ok(entry)
    }

    /// Walk the full chain, recomputing every hash.
    pub async fn verify_chain(&self) -> EventChainReport {
        let inner = self.inner.read().await;
        let mut issues = Vec::new();
        let mut expected_prev = crypto::GENESIS_MARKER.to_string();

        for (i, entry) in inner.entries.iter().enumerate() {
            let expected_seq = (i + 1) as u64;
            if entry.sequence != expected_seq {
                issues.push(format!(
                    "Entry {} has sequence {} (expected {expected_seq})",
                    i, entry.sequence
                ));
            }
            if entry.previous_chain_hash != expected_prev {
                issues.push(format!("Entry {} breaks the chain: previousChainHash mismatch", i));
            }
            if entry.chain_hash != entry.compute_chain_hash() {
                issues.push(format!("Entry {} hash does not match recomputation", i));
            }
            expected_prev = entry.chain_hash.clone();
        }

        EventChainReport {
            valid: issues.is_empty(),
            entry_count: inner.entries.len(),
            issues,
        }
    }

    pub async fn entries(&self) -> Vec<EventLogEntry> {
        self.inner.read().await.entries.clone()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    #[cfg(test)]
    pub async fn tamper_entry(&self, index: usize, action: &str) {
        let mut inner = self.inner.write().await;
        inner.entries[index].action = action.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chain_links_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();

        let e1 = log
            .append("document-ingested", "system", serde_json::json!({"sku": "S1"}), None, None)
            .await
            .unwrap();
        let e2 = log
            .append("document-signed", "system", serde_json::json!({"sku": "S1"}), None, None)
            .await
            .unwrap();

        assert_eq!(e1.previous_chain_hash, crypto::GENESIS_MARKER);
        assert_eq!(e2.previous_chain_hash, e1.chain_hash);
        assert_eq!(e2.sequence, 2);
        assert!(log.verify_chain().await.valid);
    }

    #[tokio::test]
    async fn tamper_breaks_chain() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.append("a", "x", serde_json::json!({}), None, None).await.unwrap();
        log.append("b", "x", serde_json::json!({}), None, None).await.unwrap();

        log.tamper_entry(0, "evil").await;
        let report = log.verify_chain().await;
        assert!(!report.valid);
        assert!(!report.issues.is_empty());
    }
}
