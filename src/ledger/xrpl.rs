use anyhow::Result;

use super::ChainReceipt;
use crate::utils::crypto;

/// XRPL anchor stub.
///
/// Produces a deterministic mock transaction hash in the XRPL format
/// (uppercase 64-hex). A production deployment would submit a Payment with
/// the memo attached through a funded wallet.
pub async fn submit(memo_hash: &str) -> Result<ChainReceipt> {
    let tx_hash = crypto::sha256_hex(&format!("xrpl-anchor:{memo_hash}")).to_uppercase();
    tracing::debug!(tx_hash = %tx_hash, "XRPL anchor stub");
    Ok(ChainReceipt { tx_hash, cid: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_tx_hash() {
        let a = submit("m1").await.unwrap();
        let b = submit("m1").await.unwrap();
        assert_eq!(a.tx_hash, b.tx_hash);
        assert_eq!(a.tx_hash.len(), 64);
        assert!(a.tx_hash.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
