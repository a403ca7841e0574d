use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::models::fingerprint::{
    DetectionProfile, FingerprintPayload, FingerprintRecord, LeakMatch, Recipient,
    SubstitutionMark,
};
use crate::store::JsonStore;
use crate::utils::crypto;

const STORE_FILE: &str = "sdc-fingerprints.json";

/// Zero-width code points used to carry the encoded hash.
const ZERO_WIDTH: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

/// Unicode space variants substituted for ASCII spaces.
const SPACE_VARIANTS: [char; 5] = ['\u{2004}', '\u{2005}', '\u{2006}', '\u{2009}', '\u{200A}'];

/// Latin → confusable look-alike (Cyrillic) pairs.
const HOMOGLYPHS: [(char, char); 14] = [
    ('a', 'а'),
    ('c', 'с'),
    ('e', 'е'),
    ('i', 'і'),
    ('o', 'о'),
    ('p', 'р'),
    ('s', 'ѕ'),
    ('x', 'х'),
    ('y', 'у'),
    ('A', 'А'),
    ('C', 'С'),
    ('E', 'Е'),
    ('O', 'О'),
    ('P', 'Р'),
];

/// Substitution thresholds: a hash byte above the cutoff marks the position.
const WHITESPACE_CUTOFF: u8 = 180; // ~30% of spaces
const HOMOGLYPH_CUTOFF: u8 = 216; // ~15% of eligible characters

/// Attribution weights.
const W_ZERO_WIDTH: f64 = 0.4;
const W_HOMOGLYPH: f64 = 0.3;
const W_WHITESPACE: f64 = 0.2;
const W_SPACING: f64 = 0.1;

const MATCH_FLOOR: f64 = 0.2;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintFile {
    records: Vec<FingerprintRecord>,
    last_updated: DateTime<Utc>,
}

impl Default for FingerprintFile {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

pub struct FingerprintParams {
    pub document_id: String,
    pub document_title: String,
    pub text: String,
    pub recipient: Recipient,
}

/// Deterministic per-recipient document marking with leak-source attribution.
pub struct FingerprintEngine {
    store: JsonStore,
    inner: RwLock<FingerprintFile>,
}

impl FingerprintEngine {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = JsonStore::new(data_dir, STORE_FILE)?;
        let inner = store.load::<FingerprintFile>()?.unwrap_or_default();
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    /// Mark a document for one recipient. The fingerprint is registered in
    /// the persistent store before the marked text is returned, so
    /// attribution works even if the caller never finalizes delivery.
    pub async fn fingerprint(&self, params: FingerprintParams) -> AppResult<FingerprintPayload> {
        let fingerprint_id = crypto::generate_id128();
        let fingerprint_hash = crypto::sha256_hex(&format!(
            "forensic:{}:{}:{}",
            params.recipient.email, params.document_id, fingerprint_id
        ));

        let (marked_text, profile, spacing_css) = mark_text(&params.text, &fingerprint_hash);

        let summary = format!(
            "zw:{}|ws:{}|hg:{}|words:{}",
            profile.zero_width_positions.len(),
            profile.whitespace_marks.len(),
            profile.homoglyph_marks.len(),
            profile.word_count
        );
        let verification_signature = crypto::hmac_sha256_hex(&fingerprint_hash, &summary);

        let record = FingerprintRecord {
            fingerprint_id: fingerprint_id.clone(),
            document_id: params.document_id,
            document_title: params.document_title,
            recipient: params.recipient,
            fingerprint_hash: fingerprint_hash.clone(),
            profile,
            verification_signature: verification_signature.clone(),
            created_at: Utc::now(),
        };

        {
            let mut inner = self.inner.write().await;
            inner.records.push(record.clone());
            inner.last_updated = Utc::now();
            self.store.save(&*inner)?;
        }

        tracing::info!(
            fingerprint_id = %fingerprint_id,
            document_id = %record.document_id,
            recipient = %record.recipient.email,
            "fingerprint registered"
        );
        metrics::counter!("fingerprints_created_total").increment(1);

        Ok(FingerprintPayload {
            fingerprint_id,
            fingerprint_hash,
            zero_width_count: record.profile.zero_width_positions.len(),
            whitespace_count: record.profile.whitespace_marks.len(),
            homoglyph_count: record.profile.homoglyph_marks.len(),
            fingerprinted_text: marked_text,
            spacing_css,
            verification_signature,
        })
    }

    /// Score a leaked sample against every fingerprint registered for the
    /// document and return the best match above the confidence floor.
    pub async fn identify_source(&self, document_id: &str, leaked_text: &str) -> LeakMatch {
        let inner = self.inner.read().await;
        let candidates: Vec<&FingerprintRecord> = inner
            .records
            .iter()
            .filter(|r| r.document_id == document_id)
            .collect();

        let mut best: Option<LeakMatch> = None;
        for record in candidates {
            let scored = score_leak(record, leaked_text);
            if best
                .as_ref()
                .map(|b| scored.confidence > b.confidence)
                .unwrap_or(true)
            {
                best = Some(scored);
            }
        }

        match best {
            Some(m) if m.confidence >= MATCH_FLOOR => m,
            _ => LeakMatch {
                matched: false,
                fingerprint_id: None,
                recipient: None,
                confidence: best.map(|m| m.confidence).unwrap_or(0.0),
                zero_width_score: 0.0,
                homoglyph_score: 0.0,
                whitespace_score: 0.0,
                spacing_score: 0.0,
            },
        }
    }

    pub async fn records_for(&self, document_id: &str) -> Vec<FingerprintRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.records.len()
    }
}

fn is_zero_width(c: char) -> bool {
    ZERO_WIDTH.contains(&c)
}

fn zero_width_index(c: char) -> Option<u8> {
    ZERO_WIDTH.iter().position(|&z| z == c).map(|i| i as u8)
}

fn homoglyph_for(c: char) -> Option<char> {
    HOMOGLYPHS
        .iter()
        .find(|(latin, _)| *latin == c)
        .map(|(_, glyph)| *glyph)
}

/// Apply all four marking layers. Returns the marked text, the detection
/// profile and the per-word spacing CSS.
fn mark_text(text: &str, fingerprint_hash: &str) -> (String, DetectionProfile, String) {
    let chars: Vec<char> = text.chars().collect();

    // 1. Zero-width encoding: one alphabet index per hex nibble of the hash
    //    prefix, inserted at evenly spaced word boundaries.
    let encoded_prefix: &str = &fingerprint_hash[..32.min(fingerprint_hash.len())];
    let nibble_indices: Vec<u8> = encoded_prefix
        .chars()
        .filter_map(|c| c.to_digit(16))
        .map(|n| (n % 5) as u8)
        .collect();

    let boundaries: Vec<usize> = chars
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .collect();

    let marks_to_insert = nibble_indices.len().min(boundaries.len());
    let mut insert_at: Vec<(usize, u8)> = Vec::with_capacity(marks_to_insert);
    if marks_to_insert > 0 {
        let step = (boundaries.len() / marks_to_insert).max(1);
        for (i, &alphabet_index) in nibble_indices.iter().take(marks_to_insert).enumerate() {
            let boundary = boundaries[(i * step).min(boundaries.len() - 1)];
            insert_at.push((boundary, alphabet_index));
        }
    }

    let mut with_zw: Vec<char> = Vec::with_capacity(chars.len() + marks_to_insert);
    let mut zero_width_positions = Vec::with_capacity(marks_to_insert);
    let mut zw_encoded = Vec::with_capacity(marks_to_insert);
    let mut cursor = 0;
    for (i, &c) in chars.iter().enumerate() {
        if cursor < insert_at.len() && insert_at[cursor].0 == i {
            zero_width_positions.push(with_zw.len());
            zw_encoded.push(insert_at[cursor].1);
            with_zw.push(ZERO_WIDTH[insert_at[cursor].1 as usize]);
            cursor += 1;
        }
        with_zw.push(c);
    }

    // 2. Per-word letter-spacing pattern (CSS only; the numeric pattern is
    //    stored in the profile).
    let word_count = text.split_whitespace().count();
    let mut spacing_pattern = Vec::with_capacity(word_count);
    let mut spacing_css = String::new();
    for i in 0..word_count {
        let byte = crypto::sample_byte(fingerprint_hash, "spacing", i);
        let deviation = (((byte as f64 / 255.0) * 0.06 - 0.03) * 10_000.0).round() / 10_000.0;
        spacing_pattern.push(deviation);
        spacing_css.push_str(&format!(".fp-w{i} {{ letter-spacing: {deviation:+.4}pt; }}\n"));
    }

    // 3 + 4. Whitespace variants and homoglyphs: 1:1 substitutions recorded
    //    at positions counted with zero-width characters filtered out, so
    //    attribution survives zero-width stripping.
    let mut whitespace_marks = Vec::new();
    let mut homoglyph_marks = Vec::new();
    let mut stripped_pos = 0usize;
    let mut space_index = 0usize;
    let mut eligible_index = 0usize;
    for c in with_zw.iter_mut() {
        if is_zero_width(*c) {
            continue;
        }
        if *c == ' ' {
            let byte = crypto::sample_byte(fingerprint_hash, "ws", space_index);
            if byte > WHITESPACE_CUTOFF {
                let replacement = SPACE_VARIANTS[(byte % 5) as usize];
                whitespace_marks.push(SubstitutionMark {
                    position: stripped_pos,
                    original: c.to_string(),
                    replacement: replacement.to_string(),
                });
                *c = replacement;
            }
            space_index += 1;
        } else if let Some(glyph) = homoglyph_for(*c) {
            let byte = crypto::sample_byte(fingerprint_hash, "hg", eligible_index);
            if byte > HOMOGLYPH_CUTOFF {
                homoglyph_marks.push(SubstitutionMark {
                    position: stripped_pos,
                    original: c.to_string(),
                    replacement: glyph.to_string(),
                });
                *c = glyph;
            }
            eligible_index += 1;
        }
        stripped_pos += 1;
    }

    let profile = DetectionProfile {
        zero_width_positions,
        zw_encoded,
        zw_encoded_hash: encoded_prefix.to_string(),
        spacing_pattern,
        word_count,
        whitespace_marks,
        homoglyph_marks,
    };

    (with_zw.into_iter().collect(), profile, spacing_css)
}

/// Score one leaked sample against one fingerprint record.
fn score_leak(record: &FingerprintRecord, leaked_text: &str) -> LeakMatch {
    let profile = &record.profile;

    // Zero-width recovery: extract the zero-width stream and compare.
    let extracted: Vec<u8> = leaked_text.chars().filter_map(zero_width_index).collect();
    let zero_width_score = if profile.zw_encoded.is_empty() {
        1.0
    } else if extracted == profile.zw_encoded {
        1.0
    } else {
        let agree = extracted
            .iter()
            .zip(profile.zw_encoded.iter())
            .filter(|(a, b)| a == b)
            .count();
        agree as f64 / profile.zw_encoded.len() as f64
    };

    let stripped: Vec<char> = leaked_text.chars().filter(|c| !is_zero_width(*c)).collect();

    let homoglyph_score = positional_score(&stripped, &profile.homoglyph_marks);
    let whitespace_score = positional_score(&stripped, &profile.whitespace_marks);

    // Spacing-pattern presence: CSS rarely survives extraction, so presence
    // is approximated by how much of the marked document's word stream
    // survives in the sample.
    let spacing_score = if profile.word_count == 0 {
        1.0
    } else {
        let leaked_words = leaked_text.split_whitespace().count();
        (leaked_words as f64 / profile.word_count as f64).min(1.0)
    };

    let confidence = W_ZERO_WIDTH * zero_width_score
        + W_HOMOGLYPH * homoglyph_score
        + W_WHITESPACE * whitespace_score
        + W_SPACING * spacing_score;

    LeakMatch {
        matched: confidence >= MATCH_FLOOR,
        fingerprint_id: Some(record.fingerprint_id.clone()),
        recipient: Some(record.recipient.clone()),
        confidence,
        zero_width_score,
        homoglyph_score,
        whitespace_score,
        spacing_score,
    }
}

fn positional_score(stripped: &[char], marks: &[SubstitutionMark]) -> f64 {
    if marks.is_empty() {
        return 1.0;
    }
    let matched = marks
        .iter()
        .filter(|m| {
            stripped
                .get(m.position)
                .map(|c| m.replacement.chars().next() == Some(*c))
                .unwrap_or(false)
        })
        .count();
    matched as f64 / marks.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> String {
        let paragraph = "The parties agree to keep all exchanged documents \
strictly confidential and to act in good faith at every stage of the process. \
Any disclosure to an outside party requires prior written approval from the \
counterparty and a complete record of the exchange.";
        format!("{paragraph} {paragraph} {paragraph}")
    }

    fn recipient(email: &str) -> Recipient {
        Recipient {
            email: email.into(),
            name: "Recipient".into(),
            organization: None,
            token_id: None,
        }
    }

    #[tokio::test]
    async fn fingerprint_is_registered_before_return() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FingerprintEngine::open(dir.path()).unwrap();

        engine
            .fingerprint(FingerprintParams {
                document_id: "doc_1".into(),
                document_title: "Contract".into(),
                text: sample_text(),
                recipient: recipient("x@example.com"),
            })
            .await
            .unwrap();

        assert_eq!(engine.records_for("doc_1").await.len(), 1);
    }

    #[tokio::test]
    async fn unmodified_text_matches_with_full_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FingerprintEngine::open(dir.path()).unwrap();

        let tx = engine
            .fingerprint(FingerprintParams {
                document_id: "doc_1".into(),
                document_title: "Contract".into(),
                text: sample_text(),
                recipient: recipient("x@example.com"),
            })
            .await
            .unwrap();
        engine
            .fingerprint(FingerprintParams {
                document_id: "doc_1".into(),
                document_title: "Contract".into(),
                text: sample_text(),
                recipient: recipient("y@example.com"),
            })
            .await
            .unwrap();

        let result = engine.identify_source("doc_1", &tx.fingerprinted_text).await;
        assert!(result.matched);
        assert_eq!(result.recipient.unwrap().email, "x@example.com");
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stripped_zero_width_still_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FingerprintEngine::open(dir.path()).unwrap();

        let tx = engine
            .fingerprint(FingerprintParams {
                document_id: "doc_1".into(),
                document_title: "Contract".into(),
                text: sample_text(),
                recipient: recipient("x@example.com"),
            })
            .await
            .unwrap();
        engine
            .fingerprint(FingerprintParams {
                document_id: "doc_1".into(),
                document_title: "Contract".into(),
                text: sample_text(),
                recipient: recipient("y@example.com"),
            })
            .await
            .unwrap();

        let stripped: String = tx
            .fingerprinted_text
            .chars()
            .filter(|c| !is_zero_width(*c))
            .collect();

        let result = engine.identify_source("doc_1", &stripped).await;
        assert!(result.matched);
        assert_eq!(result.recipient.unwrap().email, "x@example.com");
        assert!(result.confidence < 1.0);
        assert!(result.confidence >= 0.5);
    }

    #[tokio::test]
    async fn unrelated_text_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FingerprintEngine::open(dir.path()).unwrap();

        engine
            .fingerprint(FingerprintParams {
                document_id: "doc_1".into(),
                document_title: "Contract".into(),
                text: sample_text(),
                recipient: recipient("x@example.com"),
            })
            .await
            .unwrap();

        let result = engine.identify_source("doc_1", "short unrelated note").await;
        assert!(!result.matched);
    }

    #[test]
    fn zero_width_recovery_round_trip() {
        let hash = crypto::sha256_hex("forensic:test");
        let (marked, profile, _) = mark_text(&sample_text(), &hash);

        let extracted: Vec<u8> = marked.chars().filter_map(zero_width_index).collect();
        assert_eq!(extracted, profile.zw_encoded);
        assert_eq!(profile.zw_encoded.len(), 32);
    }

    #[test]
    fn marking_is_deterministic() {
        let hash = crypto::sha256_hex("forensic:test");
        let (a, pa, css_a) = mark_text(&sample_text(), &hash);
        let (b, pb, css_b) = mark_text(&sample_text(), &hash);
        assert_eq!(a, b);
        assert_eq!(css_a, css_b);
        assert_eq!(pa.whitespace_marks.len(), pb.whitespace_marks.len());
        assert_eq!(pa.spacing_pattern, pb.spacing_pattern);
    }

    #[test]
    fn substitution_rates_are_plausible() {
        let hash = crypto::sha256_hex("forensic:test");
        let text = sample_text();
        let (_, profile, _) = mark_text(&text, &hash);

        let spaces = text.chars().filter(|c| *c == ' ').count();
        // ~30% of spaces, ~15% of eligible characters; allow generous slack.
        assert!(profile.whitespace_marks.len() < spaces);
        assert!(!profile.whitespace_marks.is_empty());
        assert!(!profile.homoglyph_marks.is_empty());
    }
}
