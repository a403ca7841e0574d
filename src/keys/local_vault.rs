use std::path::Path;
use std::sync::RwLock;

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aes::Aes256;
use aes_gcm::{AeadInPlace, AesGcm, KeyInit};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};
use crate::keys::provider::{GenerateKeyRequest, KeyProvider};
use crate::models::keys::{
    EncryptedPayload, KeyDerivation, KeyMetadata, KeyPurpose, ProviderStats,
};
use crate::store::JsonStore;
use crate::utils::crypto;

const STORE_FILE: &str = "sovereign-key-vault.json";
const PROVIDER_NAME: &str = "local-vault";
const PBKDF2_ITERATIONS: u32 = 100_000;
const ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultEntry {
    key_id: String,
    key_hex: String,
    metadata: KeyMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destroyed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultFile {
    engine: String,
    version: String,
    warning: String,
    entries: Vec<VaultEntry>,
}

impl Default for VaultFile {
    fn default() -> Self {
        Self {
            engine: "sovereign-key-vault".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            warning: "This file contains raw key material. Restrict access and never commit it."
                .into(),
            entries: Vec::new(),
        }
    }
}

/// Single-file persistent key store with extractable keys.
pub struct LocalVaultProvider {
    store: JsonStore,
    inner: RwLock<VaultFile>,
}

impl LocalVaultProvider {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<VaultFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    fn derive_material(request: &GenerateKeyRequest) -> AppResult<([u8; 32], Option<String>)> {
        match request.derivation {
            KeyDerivation::Random => {
                let mut key = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                Ok((key, None))
            }
            KeyDerivation::Passphrase => {
                let passphrase = request.passphrase.as_deref().ok_or_else(|| {
                    AppError::BadRequest("Passphrase derivation requires a passphrase".into())
                })?;
                let mut salt = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut salt);
                let mut key = [0u8; 32];
                pbkdf2_hmac::<Sha512>(passphrase.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);
                Ok((key, Some(hex::encode(salt))))
            }
            KeyDerivation::SignerKey => {
                let identity = request.signer_identity_hash.as_deref().ok_or_else(|| {
                    AppError::BadRequest(
                        "Signer-key derivation requires the signer's identity hash".into(),
                    )
                })?;
                let digest = Sha512::digest(identity.as_bytes());
                let mut key = [0u8; 32];
                key.copy_from_slice(&digest[..32]);
                Ok((key, None))
            }
            KeyDerivation::HsmManaged | KeyDerivation::MpcShared | KeyDerivation::External => {
                Err(AppError::BadRequest(format!(
                    "The local vault cannot derive {:?} keys",
                    request.derivation
                )))
            }
        }
    }

    fn usable_key(&self, key_id: &str) -> AppResult<[u8; 32]> {
        let inner = self.inner.read().expect("vault lock poisoned");
        let entry = inner
            .entries
            .iter()
            .find(|e| e.key_id == key_id)
            .ok_or_else(|| AppError::NotFound(format!("No key {key_id}")))?;
        if entry.destroyed_at.is_some() {
            return Err(AppError::Conflict(format!("Key {key_id} has been destroyed")));
        }
        let bytes = hex::decode(&entry.key_hex)
            .map_err(|_| AppError::Internal("Corrupt key material".into()))?;
        if bytes.len() != 32 {
            return Err(AppError::Internal("Corrupt key material".into()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

impl KeyProvider for LocalVaultProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn generate_key(&self, request: GenerateKeyRequest) -> AppResult<KeyMetadata> {
        let (key, salt) = Self::derive_material(&request)?;

        let metadata = KeyMetadata {
            key_id: crypto::generate_secure_id("key_"),
            derivation: request.derivation,
            purpose: request.purpose,
            document_id: request.document_id,
            sku: request.sku,
            created_at: Utc::now(),
            extractable: true,
            provider: PROVIDER_NAME.into(),
            algorithm: ALGORITHM.into(),
            key_length: 256,
        };

        let entry = VaultEntry {
            key_id: metadata.key_id.clone(),
            key_hex: hex::encode(key),
            metadata: metadata.clone(),
            salt,
            superseded_by: None,
            destroyed_at: None,
        };

        let mut inner = self.inner.write().expect("vault lock poisoned");
        inner.entries.push(entry);
        self.store.save(&*inner)?;

        tracing::info!(key_id = %metadata.key_id, purpose = metadata.purpose.as_str(), "key generated");
        Ok(metadata)
    }

    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> AppResult<EncryptedPayload> {
        let key = self.usable_key(key_id)?;
        let cipher = Aes256Gcm16::new(GenericArray::from_slice(&key));

        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| AppError::Internal("Encryption failed".into()))?;

        Ok(EncryptedPayload {
            ciphertext: base64::engine::general_purpose::STANDARD.encode(&buffer),
            iv: hex::encode(iv),
            auth_tag: hex::encode(tag),
            algorithm: ALGORITHM.into(),
            key_id: key_id.to_string(),
            plaintext_sha256: crypto::sha256_bytes(plaintext),
            plaintext_size: plaintext.len(),
        })
    }

    fn decrypt(
        &self,
        key_id: &str,
        payload: &EncryptedPayload,
        expected_sha256: Option<&str>,
    ) -> AppResult<Vec<u8>> {
        let key = self.usable_key(key_id)?;
        let cipher = Aes256Gcm16::new(GenericArray::from_slice(&key));

        let iv = hex::decode(&payload.iv)
            .map_err(|_| AppError::BadRequest("Malformed IV".into()))?;
        let tag = hex::decode(&payload.auth_tag)
            .map_err(|_| AppError::BadRequest("Malformed auth tag".into()))?;
        let mut buffer = base64::engine::general_purpose::STANDARD
            .decode(&payload.ciphertext)
            .map_err(|_| AppError::BadRequest("Malformed ciphertext".into()))?;

        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| AppError::BadRequest("Authentication tag verification failed".into()))?;

        let digest = crypto::sha256_bytes(&buffer);
        if let Some(expected) = expected_sha256 {
            if digest != expected {
                return Err(AppError::Conflict(
                    "Decrypted content does not match the expected digest".into(),
                ));
            }
        }

        Ok(buffer)
    }

    fn sign(&self, key_id: &str, data: &str) -> AppResult<String> {
        let key = self.usable_key(key_id)?;
        Ok(crypto::hmac_sha256_hex(&hex::encode(key), data))
    }

    fn verify(&self, key_id: &str, data: &str, signature: &str) -> AppResult<bool> {
        let expected = self.sign(key_id, data)?;
        Ok(expected.as_bytes().ct_eq(signature.as_bytes()).into())
    }

    fn rotate_key(&self, key_id: &str) -> AppResult<KeyMetadata> {
        let (purpose, document_id, sku) = {
            let inner = self.inner.read().expect("vault lock poisoned");
            let entry = inner
                .entries
                .iter()
                .find(|e| e.key_id == key_id)
                .ok_or_else(|| AppError::NotFound(format!("No key {key_id}")))?;
            if entry.destroyed_at.is_some() {
                return Err(AppError::Conflict(format!("Key {key_id} has been destroyed")));
            }
            (
                entry.metadata.purpose,
                entry.metadata.document_id.clone(),
                entry.metadata.sku.clone(),
            )
        };

        let replacement = self.generate_key(GenerateKeyRequest {
            derivation: KeyDerivation::Random,
            purpose,
            document_id,
            sku,
            passphrase: None,
            signer_identity_hash: None,
        })?;

        let mut inner = self.inner.write().expect("vault lock poisoned");
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.key_id == key_id) {
            entry.superseded_by = Some(replacement.key_id.clone());
        }
        self.store.save(&*inner)?;

        tracing::info!(old = key_id, new = %replacement.key_id, "key rotated");
        Ok(replacement)
    }

    fn destroy_key(&self, key_id: &str) -> AppResult<()> {
        let mut inner = self.inner.write().expect("vault lock poisoned");
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.key_id == key_id)
            .ok_or_else(|| AppError::NotFound(format!("No key {key_id}")))?;

        // Overwrite with zeros, then random garbage, before marking destroyed.
        entry.key_hex = hex::encode([0u8; 32]);
        let mut garbage = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut garbage);
        entry.key_hex = hex::encode(garbage);
        entry.destroyed_at = Some(Utc::now());

        self.store.save(&*inner)?;
        tracing::info!(key_id = key_id, "key destroyed");
        Ok(())
    }

    fn key_metadata(&self, key_id: &str) -> AppResult<KeyMetadata> {
        let inner = self.inner.read().expect("vault lock poisoned");
        inner
            .entries
            .iter()
            .find(|e| e.key_id == key_id)
            .map(|e| e.metadata.clone())
            .ok_or_else(|| AppError::NotFound(format!("No key {key_id}")))
    }

    fn list_keys(&self) -> AppResult<Vec<KeyMetadata>> {
        let inner = self.inner.read().expect("vault lock poisoned");
        Ok(inner.entries.iter().map(|e| e.metadata.clone()).collect())
    }

    fn stats(&self) -> AppResult<ProviderStats> {
        let inner = self.inner.read().expect("vault lock poisoned");
        let mut stats = ProviderStats {
            provider: PROVIDER_NAME.into(),
            total_keys: inner.entries.len(),
            ..Default::default()
        };
        for entry in &inner.entries {
            if entry.destroyed_at.is_some() {
                stats.destroyed_keys += 1;
            } else if entry.superseded_by.is_some() {
                stats.superseded_keys += 1;
            } else {
                stats.active_keys += 1;
            }
            *stats
                .keys_by_purpose
                .entry(entry.metadata.purpose.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(derivation: KeyDerivation) -> GenerateKeyRequest {
        GenerateKeyRequest {
            derivation,
            purpose: KeyPurpose::Encryption,
            document_id: Some("doc_1".into()),
            sku: None,
            passphrase: Some("correct horse battery staple".into()),
            signer_identity_hash: Some(crypto::sha256_hex("alice@example.com")),
        }
    }

    fn vault(dir: &Path) -> LocalVaultProvider {
        LocalVaultProvider::open(dir).unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = vault(dir.path());
        let key = provider.generate_key(request(KeyDerivation::Random)).unwrap();

        let plaintext = b"the agreement text";
        let payload = provider.encrypt(&key.key_id, plaintext).unwrap();
        assert_eq!(payload.plaintext_size, plaintext.len());
        assert_eq!(payload.iv.len(), 32); // 16 bytes hex
        assert_eq!(payload.auth_tag.len(), 32);

        let decrypted = provider
            .decrypt(&key.key_id, &payload, Some(&payload.plaintext_sha256))
            .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let dir = tempfile::tempdir().unwrap();
        let provider = vault(dir.path());
        let key = provider.generate_key(request(KeyDerivation::Random)).unwrap();

        let mut payload = provider.encrypt(&key.key_id, b"secret").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(&payload.ciphertext)
            .unwrap();
        raw[0] ^= 0x01;
        payload.ciphertext = base64::engine::general_purpose::STANDARD.encode(&raw);

        assert!(provider.decrypt(&key.key_id, &payload, None).is_err());
    }

    #[test]
    fn signer_key_derivation_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let provider = vault(dir.path());
        let a = provider
            .generate_key(request(KeyDerivation::SignerKey))
            .unwrap();
        let b = provider
            .generate_key(request(KeyDerivation::SignerKey))
            .unwrap();

        // Same identity hash → same signing output even under distinct ids.
        let sig_a = provider.sign(&a.key_id, "payload").unwrap();
        let sig_b = provider.sign(&b.key_id, "payload").unwrap();
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn sign_verify_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = vault(dir.path());
        let key = provider.generate_key(request(KeyDerivation::Random)).unwrap();

        let signature = provider.sign(&key.key_id, "hash-string").unwrap();
        assert!(provider.verify(&key.key_id, "hash-string", &signature).unwrap());
        assert!(!provider.verify(&key.key_id, "other", &signature).unwrap());
    }

    #[test]
    fn rotate_marks_superseded() {
        let dir = tempfile::tempdir().unwrap();
        let provider = vault(dir.path());
        let key = provider.generate_key(request(KeyDerivation::Random)).unwrap();
        let replacement = provider.rotate_key(&key.key_id).unwrap();
        assert_ne!(key.key_id, replacement.key_id);
        assert_eq!(replacement.purpose, key.purpose);

        let stats = provider.stats().unwrap();
        assert_eq!(stats.superseded_keys, 1);
        assert_eq!(stats.active_keys, 1);
    }

    #[test]
    fn destroyed_key_refuses_operations() {
        let dir = tempfile::tempdir().unwrap();
        let provider = vault(dir.path());
        let key = provider.generate_key(request(KeyDerivation::Random)).unwrap();
        let payload = provider.encrypt(&key.key_id, b"secret").unwrap();

        provider.destroy_key(&key.key_id).unwrap();
        assert!(provider.encrypt(&key.key_id, b"again").is_err());
        assert!(provider.decrypt(&key.key_id, &payload, None).is_err());
        assert!(provider.sign(&key.key_id, "data").is_err());

        let stats = provider.stats().unwrap();
        assert_eq!(stats.destroyed_keys, 1);
    }

    #[test]
    fn passphrase_key_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key_id;
        let payload;
        {
            let provider = vault(dir.path());
            let key = provider
                .generate_key(request(KeyDerivation::Passphrase))
                .unwrap();
            key_id = key.key_id.clone();
            payload = provider.encrypt(&key_id, b"durable secret").unwrap();
        }
        let provider = vault(dir.path());
        let decrypted = provider.decrypt(&key_id, &payload, None).unwrap();
        assert_eq!(decrypted, b"durable secret");
    }
}
