use regex::Regex;
use std::sync::OnceLock;

/// All ledger chains the anchor engine currently supports.
pub const SUPPORTED_CHAINS: &[&str] = &["XRPL", "STELLAR", "ETHEREUM", "POLYGON", "IPFS"];

/// Returns `true` if `chain` (case-insensitive) is a supported anchor chain.
pub fn is_valid_chain(chain: &str) -> bool {
    let upper = chain.to_uppercase();
    SUPPORTED_CHAINS.iter().any(|&c| c == upper)
}

/// Lightweight email shape check: local part, `@`, domain with a dot.
pub fn is_valid_email(email: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap()
    });
    re.is_match(email)
}

/// SHA-256 hex digest: exactly 64 lowercase-or-uppercase hex characters.
pub fn is_valid_sha256(hash: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[a-fA-F0-9]{64}$").unwrap());
    re.is_match(hash)
}

/// Capability token: 64 hex characters (256 bits).
pub fn is_valid_token(token: &str) -> bool {
    is_valid_sha256(token)
}

/// Stable document SKU: alphanumeric plus `.`, `_`, `-`, 1..=64 chars.
pub fn is_valid_sku(sku: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._\-]{1,64}$").unwrap());
    re.is_match(sku)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
