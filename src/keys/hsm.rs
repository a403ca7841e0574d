use std::sync::RwLock;

use chrono::Utc;

use crate::error::{AppError, AppResult};
use crate::keys::provider::{GenerateKeyRequest, KeyProvider};
use crate::models::keys::{
    EncryptedPayload, KeyDerivation, KeyMetadata, ProviderStats,
};
use crate::utils::crypto;

const PROVIDER_NAME: &str = "hsm";

/// Hardware security module stub.
///
/// Tracks non-extractable key handles; every cryptographic operation requires
/// a real HSM backend and reports unavailability until one is wired in. The
/// abstraction exists so swapping this in for the local vault never touches
/// pipeline code.
pub struct HsmProvider {
    handles: RwLock<Vec<KeyMetadata>>,
}

impl HsmProvider {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(Vec::new()),
        }
    }

    fn backend_unavailable() -> AppError {
        AppError::Internal("HSM backend is not configured".into())
    }
}

impl Default for HsmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for HsmProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn generate_key(&self, request: GenerateKeyRequest) -> AppResult<KeyMetadata> {
        let metadata = KeyMetadata {
            key_id: crypto::generate_secure_id("hsm_"),
            derivation: KeyDerivation::HsmManaged,
            purpose: request.purpose,
            document_id: request.document_id,
            sku: request.sku,
            created_at: Utc::now(),
            extractable: false,
            provider: PROVIDER_NAME.into(),
            algorithm: "AES-256-GCM".into(),
            key_length: 256,
        };
        self.handles
            .write()
            .expect("hsm lock poisoned")
            .push(metadata.clone());
        Ok(metadata)
    }

    fn encrypt(&self, _key_id: &str, _plaintext: &[u8]) -> AppResult<EncryptedPayload> {
        Err(Self::backend_unavailable())
    }

    fn decrypt(
        &self,
        _key_id: &str,
        _payload: &EncryptedPayload,
        _expected_sha256: Option<&str>,
    ) -> AppResult<Vec<u8>> {
        Err(Self::backend_unavailable())
    }

    fn sign(&self, _key_id: &str, _data: &str) -> AppResult<String> {
        Err(Self::backend_unavailable())
    }

    fn verify(&self, _key_id: &str, _data: &str, _signature: &str) -> AppResult<bool> {
        Err(Self::backend_unavailable())
    }

    fn rotate_key(&self, _key_id: &str) -> AppResult<KeyMetadata> {
        Err(Self::backend_unavailable())
    }

    fn destroy_key(&self, _key_id: &str) -> AppResult<()> {
        Err(Self::backend_unavailable())
    }

    fn key_metadata(&self, key_id: &str) -> AppResult<KeyMetadata> {
        self.handles
            .read()
            .expect("hsm lock poisoned")
            .iter()
            .find(|m| m.key_id == key_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No key {key_id}")))
    }

    fn list_keys(&self) -> AppResult<Vec<KeyMetadata>> {
        Ok(self.handles.read().expect("hsm lock poisoned").clone())
    }

    fn stats(&self) -> AppResult<ProviderStats> {
        let handles = self.handles.read().expect("hsm lock poisoned");
        let mut stats = ProviderStats {
            provider: PROVIDER_NAME.into(),
            total_keys: handles.len(),
            active_keys: handles.len(),
            ..Default::default()
        };
        for handle in handles.iter() {
            *stats
                .keys_by_purpose
                .entry(handle.purpose.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::keys::KeyPurpose;

    #[test]
    fn handles_are_non_extractable_and_crypto_unavailable() {
        let hsm = HsmProvider::new();
        let key = hsm
            .generate_key(GenerateKeyRequest {
                derivation: KeyDerivation::HsmManaged,
                purpose: KeyPurpose::Signing,
                document_id: None,
                sku: None,
                passphrase: None,
                signer_identity_hash: None,
            })
            .unwrap();

        assert!(!key.extractable);
        assert!(hsm.encrypt(&key.key_id, b"data").is_err());
        assert!(hsm.sign(&key.key_id, "data").is_err());
        assert!(hsm.key_metadata(&key.key_id).is_ok());
        assert_eq!(hsm.stats().unwrap().total_keys, 1);
    }
}
