use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Genesis sentinel for intent / event / anchor / backup chains.
pub const GENESIS_MARKER: &str = "genesis";

// ---------------------------------------------------------------------------
// ID and token generation
// ---------------------------------------------------------------------------

/// Generate a secure random identifier with a caller-supplied prefix followed
/// by 16 random hex characters.
///
/// Example: `sig_8f3a1b2c4d5e6f70`
pub fn generate_secure_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    format!("{prefix}{}", hex::encode(bytes))
}

/// Generate a 128-bit random identifier, hex-encoded (32 chars).
///
/// Used for session IDs, workflow IDs and fingerprint IDs.
pub fn generate_id128() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

/// Generate a 256-bit capability token, hex-encoded (64 chars).
///
/// Signing-session tokens travel in the URL path; portal tokens travel in the
/// `Authorization: Bearer` header. Both are opaque to the holder.
pub fn generate_access_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Compute the SHA-256 hex digest of the supplied content.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 hex digest of raw bytes.
pub fn sha256_bytes(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Genesis hash for signature chains: SHA-256 of the literal `"genesis"`.
pub fn genesis_signature_hash() -> String {
    sha256_hex(GENESIS_MARKER)
}

/// HMAC-SHA256 over `data` keyed with `key`, hex-encoded.
pub fn hmac_sha256_hex(key: &str, data: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Deterministic single-byte sample derived from a seed, a domain label and
/// an index. The same (seed, label, index) always yields the same byte.
pub fn sample_byte(seed: &str, label: &str, index: usize) -> u8 {
    let digest = Sha256::digest(format!("{seed}:{label}:{index}").as_bytes());
    digest[0]
}

// ---------------------------------------------------------------------------
// Signature construction
// ---------------------------------------------------------------------------

/// The canonical inputs to a signature hash. The payload is the `:`-joined
/// concatenation of these fields in this exact order.
#[derive(Debug, Clone)]
pub struct SignatureInput<'a> {
    pub signature_id: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub role: &'a str,
    pub signature_type: &'a str,
    pub document_hash: &'a str,
    pub merkle_root: &'a str,
    pub signed_at: &'a str,
    pub device_fingerprint: &'a str,
}

impl SignatureInput<'_> {
    /// The canonical `:`-joined signature payload.
    pub fn payload(&self) -> String {
        [
            self.signature_id,
            self.name,
            self.email,
            self.role,
            self.signature_type,
            self.document_hash,
            self.merkle_root,
            self.signed_at,
            self.device_fingerprint,
        ]
        .join(":")
    }
}

/// SHA-256 of the canonical signature payload.
pub fn signature_hash(input: &SignatureInput) -> String {
    sha256_hex(&input.payload())
}

/// SHA-256 of (current document hash ‖ signature hash). The combined hash
/// becomes the new document hash after the signature is applied.
pub fn combined_hash(current_document_hash: &str, signature_hash: &str) -> String {
    sha256_hex(&format!("{current_document_hash}{signature_hash}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_id_format() {
        let id = generate_secure_id("sig_");
        assert!(id.starts_with("sig_"));
        assert_eq!(id.len(), 4 + 16);
    }

    #[test]
    fn id128_is_32_hex_chars() {
        let id = generate_id128();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn access_token_is_64_hex_chars() {
        let token = generate_access_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sha256_deterministic() {
        let h1 = sha256_hex("hello");
        let h2 = sha256_hex("hello");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn hmac_deterministic() {
        let a = hmac_sha256_hex("key", "message");
        let b = hmac_sha256_hex("key", "message");
        assert_eq!(a, b);
        assert_ne!(a, hmac_sha256_hex("other", "message"));
    }

    #[test]
    fn sample_byte_deterministic() {
        assert_eq!(sample_byte("seed", "ws", 3), sample_byte("seed", "ws", 3));
        let same = (0..64).all(|i| sample_byte("seed", "ws", i) == sample_byte("seed", "hg", i));
        assert!(!same);
    }

    #[test]
    fn signature_payload_field_order() {
        let input = SignatureInput {
            signature_id: "sig1",
            name: "Alice",
            email: "alice@example.com",
            role: "ceo",
            signature_type: "author",
            document_hash: "dh",
            merkle_root: "mr",
            signed_at: "2026-01-01T00:00:00Z",
            device_fingerprint: "dev",
        };
        assert_eq!(
            input.payload(),
            "sig1:Alice:alice@example.com:ceo:author:dh:mr:2026-01-01T00:00:00Z:dev"
        );
        assert_eq!(signature_hash(&input), sha256_hex(&input.payload()));
    }

    #[test]
    fn combined_hash_chains() {
        let sig = sha256_hex("sig");
        let c1 = combined_hash("doc", &sig);
        assert_eq!(c1, sha256_hex(&format!("doc{sig}")));
        assert_ne!(c1, combined_hash(&c1, &sig));
    }

    #[test]
    fn genesis_is_sha256_of_genesis() {
        assert_eq!(genesis_signature_hash(), sha256_hex("genesis"));
    }
}
