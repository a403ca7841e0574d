use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum KeyDerivation {
    Random,
    Passphrase,
    SignerKey,
    HsmManaged,
    MpcShared,
    External,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPurpose {
    Encryption,
    Signing,
    Anchoring,
    Identity,
    Transport,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encryption => "encryption",
            Self::Signing => "signing",
            Self::Anchoring => "anchoring",
            Self::Identity => "identity",
            Self::Transport => "transport",
        }
    }
}

/// Metadata describing a managed key. Raw key material is never surfaced by
/// non-extractable providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub key_id: String,
    pub derivation: KeyDerivation,
    pub purpose: KeyPurpose,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub created_at: DateTime<Utc>,
    pub extractable: bool,
    pub provider: String,
    pub algorithm: String,
    pub key_length: u32,
}

/// Result of an encryption operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    /// Base64 ciphertext (tag detached).
    pub ciphertext: String,
    /// Hex-encoded 128-bit IV.
    pub iv: String,
    /// Hex-encoded GCM authentication tag.
    pub auth_tag: String,
    pub algorithm: String,
    pub key_id: String,
    pub plaintext_sha256: String,
    pub plaintext_size: usize,
}

/// Aggregate counts reported by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub provider: String,
    pub total_keys: usize,
    pub active_keys: usize,
    pub superseded_keys: usize,
    pub destroyed_keys: usize,
    pub keys_by_purpose: std::collections::BTreeMap<String, usize>,
}
