//! Wallet provider backed by a private key held in this process

use alloy::primitives::{Address, B256};
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use parking_lot::RwLock;
use ratio_core::ChainId;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{EVENT_CHANNEL_CAPACITY, WalletEvent, WalletProvider};
use crate::eip712::{TypedDataRequest, signature_hex};
use crate::error::{ConnectionError, SigningError};

/// Signs locally with an alloy `PrivateKeySigner`
///
/// Used by the server deployment (key from `TRADING_PRIVATE_KEY`) and by tests.
pub struct LocalWalletProvider {
    signer: RwLock<PrivateKeySigner>,
    chain_id: RwLock<ChainId>,
    events: broadcast::Sender<WalletEvent>,
}

impl LocalWalletProvider {
    fn with_signer(signer: PrivateKeySigner, chain_id: ChainId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            signer: RwLock::new(signer),
            chain_id: RwLock::new(chain_id),
            events,
        }
    }

    /// Create a provider from a private key hex string
    pub fn from_private_key(private_key: &str, chain_id: ChainId) -> Result<Self, ConnectionError> {
        let signer = parse_signer(private_key)?;
        info!("Loaded local wallet: {}", signer.address());
        Ok(Self::with_signer(signer, chain_id))
    }

    /// Load the key from TRADING_PRIVATE_KEY
    pub fn from_env(chain_id: ChainId) -> Result<Self, ConnectionError> {
        dotenvy::dotenv().ok();

        let private_key = std::env::var("TRADING_PRIVATE_KEY").map_err(|_| {
            ConnectionError::ProviderError(
                "TRADING_PRIVATE_KEY environment variable not set".to_string(),
            )
        })?;

        Self::from_private_key(&private_key, chain_id)
    }

    /// Generate a new random wallet
    pub fn generate(chain_id: ChainId) -> Self {
        let signer = PrivateKeySigner::random();
        info!("Generated new local wallet: {}", signer.address());
        Self::with_signer(signer, chain_id)
    }

    pub fn address(&self) -> Address {
        self.signer.read().address()
    }

    /// Rotate to another key; subscribers see `AccountsChanged`
    pub fn set_account(&self, private_key: &str) -> Result<Address, ConnectionError> {
        let signer = parse_signer(private_key)?;
        let address = signer.address();
        *self.signer.write() = signer;

        info!("Local wallet account changed to {}", address);
        let _ = self.events.send(WalletEvent::AccountsChanged(vec![address]));
        Ok(address)
    }

    /// Report a chain change to subscribers
    pub fn set_chain(&self, chain_id: ChainId) {
        *self.chain_id.write() = chain_id;
        let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
    }

    /// Report the wallet going away
    pub fn emit_disconnect(&self) {
        let _ = self.events.send(WalletEvent::Disconnected);
    }
}

fn parse_signer(private_key: &str) -> Result<PrivateKeySigner, ConnectionError> {
    let key = private_key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);

    let key_bytes = B256::from_str(key).map_err(|e| {
        ConnectionError::ProviderError(format!("Invalid private key format: {}", e))
    })?;

    PrivateKeySigner::from_bytes(&key_bytes)
        .map_err(|e| ConnectionError::ProviderError(format!("Failed to create signer: {}", e)))
}

#[async_trait]
impl WalletProvider for LocalWalletProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ConnectionError> {
        Ok(vec![self.address()])
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectionError> {
        Ok(*self.chain_id.read())
    }

    async fn sign_typed_data(
        &self,
        address: Address,
        data: &TypedDataRequest,
    ) -> Result<String, SigningError> {
        let signer = self.signer.read().clone();
        if signer.address() != address {
            return Err(SigningError::ProviderError(format!(
                "Unknown account {}",
                address
            )));
        }

        let hash = data.signing_hash()?;
        debug!("Signing EIP-712 hash {} for {}", hash, address);

        let signature = signer
            .sign_hash(&hash)
            .await
            .map_err(|e| SigningError::ProviderError(format!("Failed to sign hash: {}", e)))?;

        Ok(signature_hex(&signature.as_bytes()))
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), SigningError> {
        debug!("Local wallet retargeted to {}", chain_id);
        *self.chain_id.write() = chain_id;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for LocalWalletProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWalletProvider")
            .field("address", &self.address())
            .field("chain_id", &*self.chain_id.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Known test private key (DO NOT use in production!)
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn typed_data() -> TypedDataRequest {
        let types = json!({
            "Message": [
                {"name": "address", "type": "address"},
                {"name": "timestamp", "type": "uint256"}
            ]
        });
        TypedDataRequest::new(
            json!({"name": "Pear Protocol", "version": "1", "chainId": 42161}),
            types.as_object().unwrap().clone(),
            "Message",
            json!({"address": TEST_ADDRESS, "timestamp": 1700000000}),
        )
    }

    #[test]
    fn test_wallet_from_private_key() {
        let wallet = LocalWalletProvider::from_private_key(TEST_KEY, ChainId::ARBITRUM_ONE).unwrap();
        assert_eq!(wallet.address().to_string().to_lowercase(), TEST_ADDRESS);
        assert!(!format!("{:?}", wallet).contains("ac0974"));
    }

    #[test]
    fn test_invalid_key() {
        assert!(matches!(
            LocalWalletProvider::from_private_key("0x1234", ChainId::ARBITRUM_ONE),
            Err(ConnectionError::ProviderError(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_typed_data_recovers_signer() {
        let wallet = LocalWalletProvider::from_private_key(TEST_KEY, ChainId::ARBITRUM_ONE).unwrap();
        let data = typed_data();

        let signature = wallet.sign_typed_data(wallet.address(), &data).await.unwrap();
        // 0x + 65 bytes
        assert_eq!(signature.len(), 132);

        let parsed = alloy::primitives::Signature::from_str(&signature).unwrap();
        let recovered = parsed
            .recover_address_from_prehash(&data.signing_hash().unwrap())
            .unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[tokio::test]
    async fn test_sign_rejects_foreign_account() {
        let wallet = LocalWalletProvider::from_private_key(TEST_KEY, ChainId::ARBITRUM_ONE).unwrap();
        let other = LocalWalletProvider::generate(ChainId::ARBITRUM_ONE).address();
        assert!(wallet.sign_typed_data(other, &typed_data()).await.is_err());
    }

    #[tokio::test]
    async fn test_account_and_chain_events() {
        let wallet = LocalWalletProvider::generate(ChainId::ARBITRUM_ONE);
        let mut events = wallet.subscribe();

        let address = wallet.set_account(TEST_KEY).unwrap();
        assert_eq!(events.recv().await.unwrap(), WalletEvent::AccountsChanged(vec![address]));

        wallet.set_chain(ChainId::ETHEREUM);
        assert_eq!(events.recv().await.unwrap(), WalletEvent::ChainChanged(ChainId::ETHEREUM));
        assert_eq!(wallet.chain_id().await.unwrap(), ChainId::ETHEREUM);
    }
}
