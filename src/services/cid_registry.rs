use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::cid::CidRecord;
use crate::store::JsonStore;

const STORE_FILE: &str = "cid-registry.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CidFile {
    engine: String,
    version: String,
    records: Vec<CidRecord>,
}

impl Default for CidFile {
    fn default() -> Self {
        Self {
            engine: "cid-registry".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            records: Vec::new(),
        }
    }
}

pub struct RegisterCidParams {
    pub cid: String,
    pub sha256: String,
    pub merkle_root: Option<String>,
    pub source_file: String,
    pub sku: String,
    pub size: u64,
    pub metadata: Option<serde_json::Value>,
}

/// Content-address bookkeeping. A CID and its SHA-256 uniquely identify a
/// record; a second registration of the same CID with a different SHA-256 is
/// refused.
pub struct CidRegistry {
    store: JsonStore,
    inner: RwLock<CidFile>,
}

impl CidRegistry {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<CidFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    pub async fn register(&self, params: RegisterCidParams) -> AppResult<CidRecord> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.records.iter().find(|r| r.cid == params.cid) {
            if existing.sha256 != params.sha256 {
                return Err(AppError::Conflict(format!(
                    "CID {} is already registered with a different SHA-256",
                    params.cid
                )));
            }
            return Ok(existing.clone());
        }

        let mut record = CidRecord {
            cid: params.cid,
            sha256: params.sha256,
            merkle_root: params.merkle_root,
            source_file: params.source_file,
            sku: params.sku,
            size: params.size,
            registered_at: Utc::now(),
            metadata: params.metadata,
            record_hash: String::new(),
        };
        record.record_hash = record.compute_record_hash();

        inner.records.push(record.clone());
        self.store.save(&*inner)?;

        tracing::info!(cid = %record.cid, sku = %record.sku, "CID registered");
        metrics::counter!("cids_registered_total").increment(1);

        Ok(record)
    }

    pub async fn lookup_by_cid(&self, cid: &str) -> Option<CidRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .find(|r| r.cid == cid)
            .cloned()
    }

    pub async fn lookup_by_sha256(&self, sha256: &str) -> Option<CidRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .find(|r| r.sha256 == sha256)
            .cloned()
    }

    pub async fn lookup_by_sku(&self, sku: &str) -> Option<CidRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .find(|r| r.sku == sku)
            .cloned()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.records.len()
    }
}
