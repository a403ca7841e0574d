use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The party a marked copy was prepared for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

/// A single 1:1 character substitution (whitespace variant or homoglyph).
/// Positions are char indices into the text with zero-width characters
/// filtered out, so attribution survives zero-width stripping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionMark {
    pub position: usize,
    pub original: String,
    pub replacement: String,
}

/// Internal record of every modification a fingerprint made, sufficient to
/// score a leaked copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionProfile {
    /// Char positions (in the final marked text) where zero-width code
    /// points were inserted.
    pub zero_width_positions: Vec<usize>,
    /// The zero-width alphabet indices encoded into the text, one per hex
    /// nibble of the fingerprint hash prefix.
    pub zw_encoded: Vec<u8>,
    /// The hex prefix of the fingerprint hash that was encoded.
    pub zw_encoded_hash: String,
    /// Per-word letter-spacing deviations in points.
    pub spacing_pattern: Vec<f64>,
    /// Word count of the marked document (spacing-presence scoring basis).
    pub word_count: usize,
    pub whitespace_marks: Vec<SubstitutionMark>,
    pub homoglyph_marks: Vec<SubstitutionMark>,
}

/// Persistent fingerprint registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintRecord {
    pub fingerprint_id: String,
    pub document_id: String,
    pub document_title: String,
    pub recipient: Recipient,
    pub fingerprint_hash: String,
    pub profile: DetectionProfile,
    pub verification_signature: String,
    pub created_at: DateTime<Utc>,
}

/// What the engine hands back to the caller distributing a marked copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintPayload {
    pub fingerprint_id: String,
    pub fingerprint_hash: String,
    pub fingerprinted_text: String,
    pub spacing_css: String,
    pub zero_width_count: usize,
    pub whitespace_count: usize,
    pub homoglyph_count: usize,
    pub verification_signature: String,
}

/// Attribution result for a leaked sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakMatch {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Recipient>,
    pub confidence: f64,
    pub zero_width_score: f64,
    pub homoglyph_score: f64,
    pub whitespace_score: f64,
    pub spacing_score: f64,
}
