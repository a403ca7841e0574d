use anyhow::Result;

use super::ChainReceipt;
use crate::utils::crypto;

/// Stellar anchor stub.
///
/// Produces a deterministic mock transaction hash (lowercase 64-hex, the
/// Horizon format). A production deployment would submit a manage-data
/// operation carrying the memo hash.
pub async fn submit(memo_hash: &str) -> Result<ChainReceipt> {
    let tx_hash = crypto::sha256_hex(&format!("stellar-anchor:{memo_hash}"));
    tracing::debug!(tx_hash = %tx_hash, "Stellar anchor stub");
    Ok(ChainReceipt { tx_hash, cid: None })
}
