//! Wallet provider speaking EIP-1193 style JSON-RPC over HTTP

use alloy::primitives::Address;
use async_trait::async_trait;
use ratio_core::ChainId;
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use super::{EVENT_CHANNEL_CAPACITY, WalletEvent, WalletProvider};
use crate::eip712::TypedDataRequest;
use crate::error::{ConnectionError, NetworkError, SigningError};
use crate::rpc::{RpcTransport, USER_REJECTED_CODE};

/// Remote wallet reached through a JSON-RPC endpoint (wallet bridge, dev node)
///
/// HTTP has no push channel; the host bridge forwards provider events with [`emit`](Self::emit).
pub struct JsonRpcWalletProvider {
    transport: RpcTransport,
    events: broadcast::Sender<WalletEvent>,
}

impl JsonRpcWalletProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport: RpcTransport::new(url, timeout),
            events,
        }
    }

    /// Forward a provider event received out of band
    pub fn emit(&self, event: WalletEvent) {
        debug!("Wallet bridge event: {:?}", event);
        let _ = self.events.send(event);
    }
}

fn connection_error(e: NetworkError) -> ConnectionError {
    match e {
        NetworkError::Rpc { code, .. } if code == USER_REJECTED_CODE => ConnectionError::UserRejected,
        other => ConnectionError::ProviderError(other.to_string()),
    }
}

fn signing_error(e: NetworkError) -> SigningError {
    match e {
        NetworkError::Rpc { code, .. } if code == USER_REJECTED_CODE => SigningError::UserRejected,
        other => SigningError::ProviderError(other.to_string()),
    }
}

#[async_trait]
impl WalletProvider for JsonRpcWalletProvider {
    fn name(&self) -> &str {
        "json-rpc"
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ConnectionError> {
        let accounts: Vec<String> = self
            .transport
            .call("eth_requestAccounts", json!([]))
            .await
            .map_err(connection_error)?;

        accounts
            .iter()
            .map(|a| {
                a.parse::<Address>().map_err(|e| {
                    ConnectionError::ProviderError(format!("Invalid account {}: {}", a, e))
                })
            })
            .collect()
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectionError> {
        let raw: String = self
            .transport
            .call("eth_chainId", json!([]))
            .await
            .map_err(connection_error)?;

        raw.parse::<ChainId>().map_err(ConnectionError::ProviderError)
    }

    async fn sign_typed_data(
        &self,
        address: Address,
        data: &TypedDataRequest,
    ) -> Result<String, SigningError> {
        // v4 takes the typed data as a JSON string
        let payload = serde_json::to_string(&data.to_v4_payload())
            .map_err(|e| SigningError::ProviderError(format!("Invalid typed data: {}", e)))?;

        self.transport
            .call(
                "eth_signTypedData_v4",
                json!([address.to_string().to_lowercase(), payload]),
            )
            .await
            .map_err(signing_error)
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), SigningError> {
        let _: serde_json::Value = self
            .transport
            .call(
                "wallet_switchEthereumChain",
                json!([{ "chainId": chain_id.to_hex() }]),
            )
            .await
            .map_err(signing_error)?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
