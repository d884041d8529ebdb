//! Single-provider wallet connector

use alloy::primitives::Address;
use parking_lot::RwLock;
use ratio_core::ChainId;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use super::{ConnectionState, EVENT_CHANNEL_CAPACITY, WalletEvent, WalletProvider, WalletSession};
use crate::balance::{ChainRpc, TokenAmount, TokenContract};
use crate::eip712::TypedDataRequest;
use crate::error::{ConnectionError, NetworkError, SigningError};

/// The connected account was replaced or dropped
///
/// Subscribers must drop everything cached for `previous`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub previous: Address,
    pub current: Option<WalletSession>,
}

/// Owns the wallet session and serializes access to the provider
pub struct WalletConnector {
    provider: Option<Arc<dyn WalletProvider>>,
    required_chain: ChainId,
    rpc: ChainRpc,
    state: RwLock<ConnectionState>,
    session: RwLock<Option<WalletSession>>,
    connect_lock: Mutex<()>,
    sign_lock: Mutex<()>,
    changes: broadcast::Sender<SessionChange>,
}

impl WalletConnector {
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, required_chain: ChainId, rpc: ChainRpc) -> Self {
        let (changes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            provider,
            required_chain,
            rpc,
            state: RwLock::new(ConnectionState::Disconnected),
            session: RwLock::new(None),
            connect_lock: Mutex::new(()),
            sign_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn required_chain(&self) -> ChainId {
        self.required_chain
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn session(&self) -> Option<WalletSession> {
        self.session.read().clone()
    }

    pub fn address(&self) -> Option<Address> {
        self.session.read().as_ref().map(|s| s.address)
    }

    /// Session-change notifications (account switch, chain switch, disconnect)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    /// Raw provider events, for the session's listener task
    pub fn provider_events(&self) -> Option<broadcast::Receiver<WalletEvent>> {
        self.provider.as_ref().map(|p| p.subscribe())
    }

    /// Request account access
    ///
    /// Concurrent callers serialize on the provider; a caller that waited
    /// behind a successful connect gets that session without a second prompt.
    pub async fn connect(&self) -> Result<WalletSession, ConnectionError> {
        let provider = self.provider.clone().ok_or(ConnectionError::NoProvider)?;

        let _guard = self.connect_lock.lock().await;
        if let Some(session) = self.session() {
            debug!("Already connected as {}", session.address);
            return Ok(session);
        }

        *self.state.write() = ConnectionState::Connecting;
        info!("Requesting accounts from {} wallet", provider.name());

        let result = async {
            let accounts = provider.request_accounts().await?;
            let address = *accounts.first().ok_or_else(|| {
                ConnectionError::ProviderError("Wallet returned no accounts".to_string())
            })?;
            let chain_id = provider.chain_id().await?;
            Ok::<_, ConnectionError>((address, chain_id))
        }
        .await;

        match result {
            Ok((address, chain_id)) => {
                let session = WalletSession {
                    address,
                    chain_id,
                    state: ConnectionState::Connected,
                    provider: provider.name().to_string(),
                };
                *self.session.write() = Some(session.clone());
                *self.state.write() = ConnectionState::Connected;

                if chain_id != self.required_chain {
                    warn!(
                        "Connected {} on {}, platform requires {}",
                        address, chain_id, self.required_chain
                    );
                } else {
                    info!("Connected {} on {}", address, chain_id);
                }
                Ok(session)
            }
            Err(e) => {
                warn!("Wallet connection failed: {}", e);
                *self.state.write() = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Sign EIP-712 typed data with the connected account
    ///
    /// Fails with `WrongChain` unless the wallet is on the platform's chain;
    /// callers switch first. Signing requests never overlap.
    pub async fn sign_typed_data(&self, data: &TypedDataRequest) -> Result<String, SigningError> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| SigningError::ProviderError("No wallet provider available".to_string()))?;

        let _guard = self.sign_lock.lock().await;

        let session = self
            .session()
            .ok_or_else(|| SigningError::ProviderError("Wallet not connected".to_string()))?;

        let actual = provider
            .chain_id()
            .await
            .map_err(|e| SigningError::ProviderError(e.to_string()))?;
        if actual != self.required_chain {
            return Err(SigningError::WrongChain {
                expected: self.required_chain,
                actual,
            });
        }

        debug!("Requesting typed-data signature from {}", session.address);
        provider.sign_typed_data(session.address, data).await
    }

    /// Ask the wallet to move to `chain_id`
    pub async fn switch_chain(&self, chain_id: ChainId) -> Result<(), SigningError> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| SigningError::ProviderError("No wallet provider available".to_string()))?;

        provider.switch_chain(chain_id).await?;
        if let Some(session) = self.session.write().as_mut() {
            session.chain_id = chain_id;
        }
        info!("Wallet switched to {}", chain_id);
        Ok(())
    }

    /// Native balance, or `token`'s balance, read straight from the chain
    pub async fn get_balance(
        &self,
        address: Address,
        token: Option<&TokenContract>,
    ) -> Result<TokenAmount, NetworkError> {
        self.rpc.get_balance(address, token).await
    }

    /// Fold a provider event into the session
    ///
    /// Returns the resulting change when the event actually replaced or dropped
    /// the connected account or its chain.
    pub fn apply_event(&self, event: &WalletEvent) -> Option<SessionChange> {
        let mut guard = self.session.write();
        let current = guard.clone()?;

        let change = match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first() {
                Some(address) if *address == current.address => return None,
                Some(address) => {
                    let session = WalletSession {
                        address: *address,
                        ..current.clone()
                    };
                    *guard = Some(session.clone());
                    SessionChange {
                        previous: current.address,
                        current: Some(session),
                    }
                }
                None => {
                    *guard = None;
                    SessionChange {
                        previous: current.address,
                        current: None,
                    }
                }
            },
            WalletEvent::ChainChanged(chain_id) => {
                if *chain_id == current.chain_id {
                    return None;
                }
                let session = WalletSession {
                    chain_id: *chain_id,
                    ..current.clone()
                };
                *guard = Some(session.clone());
                SessionChange {
                    previous: current.address,
                    current: Some(session),
                }
            }
            WalletEvent::Disconnected => {
                *guard = None;
                SessionChange {
                    previous: current.address,
                    current: None,
                }
            }
        };
        drop(guard);

        if change.current.is_none() {
            *self.state.write() = ConnectionState::Disconnected;
        }

        info!(
            "Wallet session changed: {} -> {:?}",
            change.previous,
            change.current.as_ref().map(|s| s.address)
        );
        let _ = self.changes.send(change.clone());
        Some(change)
    }

    /// Drop the session; returns the address that was connected
    pub fn disconnect(&self) -> Option<Address> {
        let previous = self.session.write().take()?;
        *self.state.write() = ConnectionState::Disconnected;

        info!("Wallet {} disconnected", previous.address);
        let _ = self.changes.send(SessionChange {
            previous: previous.address,
            current: None,
        });
        Some(previous.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWallet;
    use std::time::Duration;

    fn connector(wallet: Arc<FakeWallet>) -> WalletConnector {
        WalletConnector::new(
            Some(wallet as Arc<dyn WalletProvider>),
            ChainId::ARBITRUM_ONE,
            ChainRpc::new("http://127.0.0.1:9", Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_no_provider() {
        let connector = WalletConnector::new(
            None,
            ChainId::ARBITRUM_ONE,
            ChainRpc::new("http://127.0.0.1:9", Duration::from_secs(1)),
        );
        assert_eq!(connector.connect().await.unwrap_err(), ConnectionError::NoProvider);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_concurrent_connects_prompt_once() {
        let wallet = Arc::new(FakeWallet::new(ChainId::ARBITRUM_ONE));
        let connector = connector(wallet.clone());

        let (a, b) = tokio::join!(connector.connect(), connector.connect());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(wallet.account_requests(), 1);
        assert_eq!(connector.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_rejected_connect_resets_state() {
        let wallet = Arc::new(FakeWallet::new(ChainId::ARBITRUM_ONE));
        wallet.reject_connect(true);
        let connector = connector(wallet);

        assert_eq!(connector.connect().await.unwrap_err(), ConnectionError::UserRejected);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert!(connector.session().is_none());
    }

    #[tokio::test]
    async fn test_wrong_chain_blocks_signing() {
        let wallet = Arc::new(FakeWallet::new(ChainId::ETHEREUM));
        let connector = connector(wallet.clone());
        connector.connect().await.unwrap();

        let data = TypedDataRequest::new(
            serde_json::json!({}),
            serde_json::Map::new(),
            "Message",
            serde_json::json!({}),
        );
        assert_eq!(
            connector.sign_typed_data(&data).await.unwrap_err(),
            SigningError::WrongChain {
                expected: ChainId::ARBITRUM_ONE,
                actual: ChainId::ETHEREUM
            }
        );
        assert_eq!(wallet.signatures(), 0);

        connector.switch_chain(ChainId::ARBITRUM_ONE).await.unwrap();
        assert!(connector.sign_typed_data(&data).await.is_ok());
        assert_eq!(connector.session().unwrap().chain_id, ChainId::ARBITRUM_ONE);
    }

    #[tokio::test]
    async fn test_account_switch_emits_change() {
        let wallet = Arc::new(FakeWallet::new(ChainId::ARBITRUM_ONE));
        let connector = connector(wallet.clone());
        let first = connector.connect().await.unwrap().address;
        let mut changes = connector.subscribe();

        // Same account: nothing to invalidate
        assert!(connector.apply_event(&WalletEvent::AccountsChanged(vec![first])).is_none());

        let second = Address::repeat_byte(0x22);
        let change = connector
            .apply_event(&WalletEvent::AccountsChanged(vec![second]))
            .unwrap();
        assert_eq!(change.previous, first);
        assert_eq!(change.current.unwrap().address, second);
        assert_eq!(changes.recv().await.unwrap().previous, first);
        assert_eq!(connector.address(), Some(second));

        connector.apply_event(&WalletEvent::AccountsChanged(vec![])).unwrap();
        assert!(connector.session().is_none());
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let wallet = Arc::new(FakeWallet::new(ChainId::ARBITRUM_ONE));
        let connector = connector(wallet);
        let address = connector.connect().await.unwrap().address;

        assert_eq!(connector.disconnect(), Some(address));
        assert_eq!(connector.disconnect(), None);
        assert!(connector.address().is_none());
    }
}
