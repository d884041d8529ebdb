//! Chain identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// An EVM chain id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    /// Ethereum mainnet
    pub const ETHEREUM: ChainId = ChainId(1);
    /// Arbitrum One - the chain the trading platform signs against
    pub const ARBITRUM_ONE: ChainId = ChainId(42161);

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Hex form used by wallet JSON-RPC (`eth_chainId`, `wallet_switchEthereumChain`)
    pub fn to_hex(&self) -> String {
        format!("0x{:x}", self.0)
    }

    /// Get the full display name
    pub fn display_name(&self) -> &'static str {
        match self.0 {
            1 => "Ethereum",
            42161 => "Arbitrum One",
            _ => "Unknown chain",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.0)
    }
}

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        ChainId(value)
    }
}

impl std::str::FromStr for ChainId {
    type Err = String;

    /// Accepts both `0xa4b1` (wallet RPC form) and `42161`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        };
        parsed
            .map(ChainId)
            .map_err(|_| format!("Unknown chain id: {}", s))
    }
}
