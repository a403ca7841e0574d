pub mod evm;
pub mod ipfs;
pub mod stellar;
pub mod xrpl;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Chains the anchor engine can commit to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChainTarget {
    Xrpl,
    Stellar,
    Ethereum,
    Polygon,
    Ipfs,
}

impl ChainTarget {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "xrpl" => Ok(Self::Xrpl),
            "stellar" => Ok(Self::Stellar),
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "polygon" => Ok(Self::Polygon),
            "ipfs" => Ok(Self::Ipfs),
            other => Err(anyhow!("Unsupported anchor chain: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xrpl => "xrpl",
            Self::Stellar => "stellar",
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Ipfs => "ipfs",
        }
    }
}

/// What an adapter hands back after committing an anchor.
#[derive(Debug, Clone)]
pub struct ChainReceipt {
    pub tx_hash: String,
    pub cid: Option<String>,
}

/// Route an anchor submission to the chain-specific adapter.
///
/// Adapters never run while a store lock is held; the anchor engine captures
/// its input, releases, performs the network call, then re-acquires to record
/// the result.
pub async fn submit_anchor(
    chain: ChainTarget,
    client: &reqwest::Client,
    config: &Config,
    memo_hash: &str,
    payload: &serde_json::Value,
) -> Result<ChainReceipt> {
    match chain {
        ChainTarget::Xrpl => xrpl::submit(memo_hash).await,
        ChainTarget::Stellar => stellar::submit(memo_hash).await,
        ChainTarget::Ethereum => evm::submit("ethereum", memo_hash).await,
        ChainTarget::Polygon => evm::submit("polygon", memo_hash).await,
        ChainTarget::Ipfs => ipfs::submit(client, &config.ipfs_api_url, payload).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        for name in ["xrpl", "stellar", "ethereum", "polygon", "ipfs"] {
            assert_eq!(ChainTarget::parse(name).unwrap().as_str(), name);
        }
        assert_eq!(ChainTarget::parse("ETH").unwrap(), ChainTarget::Ethereum);
        assert!(ChainTarget::parse("doge").is_err());
    }
}
