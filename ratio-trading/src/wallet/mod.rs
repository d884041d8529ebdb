//! Wallet connection and signing
//!
//! The core talks to every signing device through [`WalletProvider`]; concrete
//! wallets are adapted at the boundary (`LocalWalletProvider` for a key held by
//! this process, `JsonRpcWalletProvider` for an EIP-1193 style bridge).

mod connector;
mod json_rpc;
mod local;

pub use connector::{SessionChange, WalletConnector};
pub use json_rpc::JsonRpcWalletProvider;
pub use local::LocalWalletProvider;

use alloy::primitives::Address;
use async_trait::async_trait;
use ratio_core::ChainId;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::eip712::TypedDataRequest;
use crate::error::{ConnectionError, SigningError};

/// Capacity of provider event channels
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Events a provider reports about its own state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The connected account as seen by the connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    pub address: Address,
    pub chain_id: ChainId,
    pub state: ConnectionState,
    pub provider: String,
}

impl WalletSession {
    /// Scope key for per-owner state
    pub fn owner(&self) -> String {
        owner_key(&self.address)
    }
}

/// Lowercase `0x` address used to scope persisted state
pub fn owner_key(address: &Address) -> String {
    address.to_string().to_lowercase()
}

/// One signing device, whatever its brand
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Human-readable provider name for logs
    fn name(&self) -> &str;

    /// Ask the user for account access (`eth_requestAccounts`)
    async fn request_accounts(&self) -> Result<Vec<Address>, ConnectionError>;

    /// Chain the provider is currently on (`eth_chainId`)
    async fn chain_id(&self) -> Result<ChainId, ConnectionError>;

    /// Produce a `0x`-prefixed 65-byte signature over EIP-712 typed data
    async fn sign_typed_data(
        &self,
        address: Address,
        data: &TypedDataRequest,
    ) -> Result<String, SigningError>;

    /// Move the provider to `chain_id` (`wallet_switchEthereumChain`)
    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), SigningError>;

    /// Account / chain change notifications
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_key_is_lowercase() {
        let address: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(owner_key(&address), "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
    }
}
