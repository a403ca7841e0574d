use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aes::Aes256;
use aes_gcm::{AeadInPlace, AesGcm, KeyInit};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use tokio::time;

use crate::store::JsonStore;
use crate::utils::crypto;
use crate::AppState;

const LEDGER_FILE: &str = "backup-ledger.json";
const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

// ---------------------------------------------------------------------------
// Manifest + bundle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFileEntry {
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub engine_version: String,
    pub files: Vec<ManifestFileEntry>,
    pub total_size: u64,
    pub integrity_hash: String,
    pub encrypted: bool,
    pub hostname: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupBundle {
    manifest: BackupManifest,
    payload: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupVerification {
    pub valid: bool,
    pub manifest_valid: bool,
    pub files_valid: bool,
    pub issues: Vec<String>,
}

// ---------------------------------------------------------------------------
// Backup ledger (hash-chained, including failures)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerEntry {
    sequence: u64,
    backup_id: String,
    event: String,
    timestamp: DateTime<Utc>,
    detail: String,
    previous_chain_hash: String,
    chain_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerFile {
    engine: String,
    version: String,
    entries: Vec<LedgerEntry>,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            engine: "backup-ledger".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            entries: Vec::new(),
        }
    }
}

fn append_ledger(data_dir: &Path, backup_id: &str, event: &str, detail: &str) -> Result<()> {
    let store = JsonStore::new(data_dir, LEDGER_FILE)?;
    let mut file = store.load::<LedgerFile>()?.unwrap_or_default();

    let (previous_chain_hash, sequence) = match file.entries.last() {
        Some(prev) => (prev.chain_hash.clone(), prev.sequence + 1),
        None => (crypto::GENESIS_MARKER.to_string(), 1),
    };
    let timestamp = Utc::now();
    let chain_hash = crypto::sha256_hex(&format!(
        "{sequence}{backup_id}{event}{}{previous_chain_hash}",
        timestamp.to_rfc3339()
    ));

    file.entries.push(LedgerEntry {
        sequence,
        backup_id: backup_id.to_string(),
        event: event.to_string(),
        timestamp,
        detail: detail.to_string(),
        previous_chain_hash,
        chain_hash,
    });
    store.save(&file)
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Background task that snapshots the persistent store directory on a fixed
/// interval and applies retention. Every outcome, success or failure, lands
/// in the backup ledger.
pub async fn run(state: AppState) {
    let mut interval = time::interval(Duration::from_secs(state.config.backup_interval_secs));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let data_dir = state.config.data_dir.clone();
        let backup_dir = state.config.backup_dir.clone();
        let passphrase = state.config.backup_passphrase.clone();
        let retention_days = state.config.backup_retention_days;

        // Snapshot + retention are blocking file IO; keep them off the
        // runtime worker threads.
        let outcome = tokio::task::spawn_blocking(move || {
            let result = create_backup(&data_dir, &backup_dir, passphrase.as_deref());
            let pruned = prune_old_backups(&backup_dir, retention_days);
            (data_dir, result, pruned)
        })
        .await;

        match outcome {
            Ok((data_dir, Ok((path, manifest)), pruned)) => {
                tracing::info!(
                    backup_id = %manifest.backup_id,
                    path = %path.display(),
                    files = manifest.files.len(),
                    encrypted = manifest.encrypted,
                    "backup complete"
                );
                metrics::counter!("backups_created_total").increment(1);
                if let Err(e) = append_ledger(
                    &data_dir,
                    &manifest.backup_id,
                    "backup-created",
                    &format!("{} files, {} bytes", manifest.files.len(), manifest.total_size),
                ) {
                    tracing::error!(error = %e, "backup ledger append failed");
                }
                match pruned {
                    Ok(0) => {}
                    Ok(n) => {
                        let _ = append_ledger(
                            &data_dir,
                            &manifest.backup_id,
                            "retention-pruned",
                            &format!("{n} expired backup file(s) removed"),
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "backup retention sweep failed"),
                }
            }
            Ok((data_dir, Err(e), _)) => {
                tracing::error!(error = %e, "backup cycle failed");
                metrics::counter!("backups_failed_total").increment(1);
                let _ = append_ledger(&data_dir, "none", "backup-failed", &format!("{e:#}"));
            }
            Err(e) => tracing::error!(error = %e, "backup task panicked"),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Snapshot every `.json` / `.txt` file under `data_dir` into a single
/// bundle, optionally encrypted, and write it under `backup_dir`.
pub fn create_backup(
    data_dir: &Path,
    backup_dir: &Path,
    passphrase: Option<&str>,
) -> Result<(PathBuf, BackupManifest)> {
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create {}", backup_dir.display()))?;

    let mut payload: BTreeMap<String, String> = BTreeMap::new();
    let mut files = Vec::new();
    let mut total_size = 0u64;

    for path in collect_store_files(data_dir)? {
        let rel = path
            .strip_prefix(data_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let size = content.len() as u64;
        files.push(ManifestFileEntry {
            path: rel.clone(),
            sha256: crypto::sha256_hex(&content),
            size,
        });
        total_size += size;
        payload.insert(rel, content);
    }

    let integrity_hash = crypto::sha256_hex(
        &serde_json::to_string_pretty(&payload).context("Failed to serialize bundle")?,
    );

    let backup_id = format!(
        "BKP-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    );
    let manifest = BackupManifest {
        backup_id: backup_id.clone(),
        timestamp: Utc::now(),
        engine_version: env!("CARGO_PKG_VERSION").into(),
        files,
        total_size,
        integrity_hash,
        encrypted: passphrase.is_some(),
        hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into()),
    };

    let bundle = BackupBundle {
        manifest: manifest.clone(),
        payload,
    };
    let serialized = serde_json::to_vec(&bundle).context("Failed to serialize backup")?;

    let path = match passphrase {
        Some(passphrase) => {
            let path = backup_dir.join(format!("{backup_id}.enc"));
            fs::write(&path, encrypt_bundle(&serialized, passphrase)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            path
        }
        None => {
            let path = backup_dir.join(format!("{backup_id}.json"));
            fs::write(&path, &serialized)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            path
        }
    };

    Ok((path, manifest))
}

fn collect_store_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)
            .with_context(|| format!("Failed to list {}", current.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("json") | Some("txt")
            ) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Remove backup files older than the retention cutoff. Returns the count
/// removed.
pub fn prune_old_backups(backup_dir: &Path, retention_days: i64) -> Result<usize> {
    if !backup_dir.exists() {
        return Ok(0);
    }
    let cutoff = std::time::SystemTime::now()
        .checked_sub(Duration::from_secs((retention_days.max(0) as u64) * 86_400))
        .ok_or_else(|| anyhow!("Retention cutoff underflow"))?;

    let mut removed = 0;
    for entry in fs::read_dir(backup_dir)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !name.starts_with("BKP-") {
            continue;
        }
        let modified = path.metadata().and_then(|m| m.modified());
        if let Ok(modified) = modified {
            if modified < cutoff {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Re-open a backup file, decrypting if needed, and check the manifest hash
/// plus every per-file hash against the bundle.
pub fn verify_backup(path: &Path, passphrase: Option<&str>) -> Result<BackupVerification> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let serialized = if path.extension().and_then(|e| e.to_str()) == Some("enc") {
        let passphrase =
            passphrase.ok_or_else(|| anyhow!("Encrypted backup requires a passphrase"))?;
        decrypt_bundle(&raw, passphrase)?
    } else {
        raw
    };

    let bundle: BackupBundle =
        serde_json::from_slice(&serialized).context("Failed to parse backup bundle")?;

    let mut issues = Vec::new();

    let recomputed = crypto::sha256_hex(
        &serde_json::to_string_pretty(&bundle.payload).context("Failed to serialize payload")?,
    );
    let manifest_valid = recomputed == bundle.manifest.integrity_hash;
    if !manifest_valid {
        issues.push("Bundle integrity hash does not match recomputation".into());
    }

    let mut files_valid = true;
    for entry in &bundle.manifest.files {
        match bundle.payload.get(&entry.path) {
            Some(content) => {
                if crypto::sha256_hex(content) != entry.sha256 {
                    files_valid = false;
                    issues.push(format!("File {} hash mismatch", entry.path));
                }
            }
            None => {
                files_valid = false;
                issues.push(format!("File {} missing from payload", entry.path));
            }
        }
    }

    Ok(BackupVerification {
        valid: manifest_valid && files_valid,
        manifest_valid,
        files_valid,
        issues,
    })
}

// ---------------------------------------------------------------------------
// Encryption: salt(32) ‖ IV(16) ‖ authTag(16) ‖ AES-256-GCM(plaintext)
// ---------------------------------------------------------------------------

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha512>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn encrypt_bundle(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm16::new(GenericArray::from_slice(&key));

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| anyhow!("Backup encryption failed"))?;

    let mut out = Vec::with_capacity(SALT_LEN + IV_LEN + TAG_LEN + buffer.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&buffer);
    Ok(out)
}

fn decrypt_bundle(raw: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if raw.len() < SALT_LEN + IV_LEN + TAG_LEN {
        return Err(anyhow!("Encrypted backup is truncated"));
    }
    let (salt, rest) = raw.split_at(SALT_LEN);
    let (iv, rest) = rest.split_at(IV_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let key = derive_key(passphrase, salt);
    let cipher = Aes256Gcm16::new(GenericArray::from_slice(&key));

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            b"",
            &mut buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| anyhow!("Backup authentication failed (wrong passphrase or tampering)"))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_data_dir(dir: &Path) {
        fs::write(dir.join("lifecycle-registry.json"), r#"{"records":[]}"#).unwrap();
        fs::write(dir.join("event-log.json"), r#"{"entries":[]}"#).unwrap();
        fs::write(dir.join("notes.txt"), "operator notes").unwrap();
        fs::write(dir.join("ignored.bin"), [0u8, 1, 2]).unwrap();
    }

    #[test]
    fn plain_backup_round_trip() {
        let data = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        seed_data_dir(data.path());

        let (path, manifest) = create_backup(data.path(), backups.path(), None).unwrap();
        assert!(!manifest.encrypted);
        assert_eq!(manifest.files.len(), 3); // .bin is excluded
        assert!(path.extension().unwrap() == "json");

        let report = verify_backup(&path, None).unwrap();
        assert!(report.valid, "issues: {:?}", report.issues);
    }

    #[test]
    fn encrypted_backup_round_trip() {
        let data = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        seed_data_dir(data.path());

        let (path, manifest) =
            create_backup(data.path(), backups.path(), Some("vault passphrase")).unwrap();
        assert!(manifest.encrypted);
        assert!(path.extension().unwrap() == "enc");

        // Raw layout: salt ‖ IV ‖ tag ‖ ciphertext.
        let raw = fs::read(&path).unwrap();
        assert!(raw.len() > SALT_LEN + IV_LEN + TAG_LEN);

        let report = verify_backup(&path, Some("vault passphrase")).unwrap();
        assert!(report.valid, "issues: {:?}", report.issues);

        assert!(verify_backup(&path, Some("wrong passphrase")).is_err());
        assert!(verify_backup(&path, None).is_err());
    }

    #[test]
    fn tampered_backup_fails_verification() {
        let data = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        seed_data_dir(data.path());

        let (path, _) = create_backup(data.path(), backups.path(), None).unwrap();

        let mut bundle: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        bundle["payload"]["event-log.json"] = serde_json::json!("{\"entries\":[\"forged\"]}");
        fs::write(&path, serde_json::to_vec(&bundle).unwrap()).unwrap();

        let report = verify_backup(&path, None).unwrap();
        assert!(!report.valid);
        assert!(!report.manifest_valid);
        assert!(!report.files_valid);
    }

    #[test]
    fn ledger_chains_outcomes() {
        let data = tempfile::tempdir().unwrap();
        append_ledger(data.path(), "BKP-1", "backup-created", "3 files").unwrap();
        append_ledger(data.path(), "BKP-2", "backup-failed", "disk full").unwrap();

        let store = JsonStore::new(data.path(), LEDGER_FILE).unwrap();
        let file: LedgerFile = store.load().unwrap().unwrap();
        assert_eq!(file.entries.len(), 2);
        assert_eq!(file.entries[0].previous_chain_hash, crypto::GENESIS_MARKER);
        assert_eq!(file.entries[1].previous_chain_hash, file.entries[0].chain_hash);

        let e = &file.entries[1];
        let recomputed = crypto::sha256_hex(&format!(
            "{}{}{}{}{}",
            e.sequence,
            e.backup_id,
            e.event,
            e.timestamp.to_rfc3339(),
            e.previous_chain_hash
        ));
        assert_eq!(recomputed, e.chain_hash);
    }

    #[test]
    fn retention_prunes_old_files() {
        let backups = tempfile::tempdir().unwrap();
        let old = backups.path().join("BKP-20200101T000000Z-aa.json");
        fs::write(&old, "{}").unwrap();
        // Retention of 0 days prunes anything older than now.
        let removed = prune_old_backups(backups.path(), 0).unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
    }
}
