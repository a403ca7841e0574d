use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{AppError, AppResult};
use crate::models::keys::{
    EncryptedPayload, KeyDerivation, KeyMetadata, KeyPurpose, ProviderStats,
};

/// Inputs to key generation. Derivation-specific material travels here so the
/// provider interface stays uniform.
#[derive(Debug, Clone)]
pub struct GenerateKeyRequest {
    pub derivation: KeyDerivation,
    pub purpose: KeyPurpose,
    pub document_id: Option<String>,
    pub sku: Option<String>,
    /// Required for `Passphrase` derivation.
    pub passphrase: Option<String>,
    /// Required for `SignerKey` derivation: the signer's identity hash.
    pub signer_identity_hash: Option<String>,
}

/// The capability set every key backend implements. Swapping implementations
/// never requires touching pipeline code.
pub trait KeyProvider: Send + Sync {
    fn name(&self) -> &str;

    fn generate_key(&self, request: GenerateKeyRequest) -> AppResult<KeyMetadata>;

    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> AppResult<EncryptedPayload>;

    /// Decrypt and verify the auth tag. When `expected_sha256` is given the
    /// plaintext digest is compared as well.
    fn decrypt(
        &self,
        key_id: &str,
        payload: &EncryptedPayload,
        expected_sha256: Option<&str>,
    ) -> AppResult<Vec<u8>>;

    fn sign(&self, key_id: &str, data: &str) -> AppResult<String>;

    fn verify(&self, key_id: &str, data: &str, signature: &str) -> AppResult<bool>;

    fn rotate_key(&self, key_id: &str) -> AppResult<KeyMetadata>;

    fn destroy_key(&self, key_id: &str) -> AppResult<()>;

    fn key_metadata(&self, key_id: &str) -> AppResult<KeyMetadata>;

    fn list_keys(&self) -> AppResult<Vec<KeyMetadata>>;

    fn stats(&self) -> AppResult<ProviderStats>;
}

/// Tracks registered providers and names one *active*; all callers request
/// the active provider.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn KeyProvider>>>,
    active: RwLock<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            active: RwLock::new(String::new()),
        }
    }

    pub fn register(&self, provider: Arc<dyn KeyProvider>) {
        let name = provider.name().to_string();
        let mut providers = self.providers.write().expect("provider registry poisoned");
        let mut active = self.active.write().expect("provider registry poisoned");
        if active.is_empty() {
            *active = name.clone();
        }
        providers.insert(name, provider);
    }

    pub fn set_active(&self, name: &str) -> AppResult<()> {
        let providers = self.providers.read().expect("provider registry poisoned");
        if !providers.contains_key(name) {
            return Err(AppError::NotFound(format!("No key provider named {name}")));
        }
        *self.active.write().expect("provider registry poisoned") = name.to_string();
        Ok(())
    }

    pub fn active(&self) -> AppResult<Arc<dyn KeyProvider>> {
        let name = self.active.read().expect("provider registry poisoned").clone();
        self.providers
            .read()
            .expect("provider registry poisoned")
            .get(&name)
            .cloned()
            .ok_or_else(|| AppError::Internal("No active key provider".into()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn KeyProvider>> {
        self.providers
            .read()
            .expect("provider registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .expect("provider registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn active_name(&self) -> String {
        self.active.read().expect("provider registry poisoned").clone()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
