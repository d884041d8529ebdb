//! The explicit per-wallet session
//!
//! Owns every component and every cache for one connected wallet. Nothing in
//! the crate keeps hidden global state; callers hold a `Session` (usually in
//! an `Arc`) and go through it.

use alloy::primitives::Address;
use parking_lot::Mutex;
use ratio_core::{BasketTradeRequest, Position};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{AgentWallet, AgentWalletManager, ApprovalReference};
use crate::auth::{AuthState, AuthToken, Clock, SessionAuthenticator};
use crate::balance::{ChainRpc, TokenAmount, TokenContract};
use crate::client::{PearClient, PlatformApi};
use crate::config::PlatformConfig;
use crate::error::{Result, SessionError, TradeExecutionError};
use crate::executor::TradeExecutor;
use crate::positions::{BalanceWatch, PositionBook, PositionPoller, refresh_positions};
use crate::store::{SessionStore, SqliteSessionStore};
use crate::wallet::{SessionChange, WalletConnector, WalletEvent, WalletProvider, WalletSession, owner_key};

pub struct Session {
    config: PlatformConfig,
    platform: Arc<dyn PlatformApi>,
    store: Arc<dyn SessionStore>,
    connector: Arc<WalletConnector>,
    auth: Arc<SessionAuthenticator>,
    agents: AgentWalletManager,
    executor: TradeExecutor,
    book: Arc<PositionBook>,
    poller: Mutex<Option<PositionPoller>>,
}

impl Session {
    pub fn new(
        config: PlatformConfig,
        provider: Option<Arc<dyn WalletProvider>>,
        platform: Arc<dyn PlatformApi>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let rpc = ChainRpc::new(config.rpc_url.clone(), config.http_timeout);
        let connector = Arc::new(WalletConnector::new(provider, config.chain_id, rpc));
        let book = Arc::new(PositionBook::new());

        Self {
            auth: Arc::new(SessionAuthenticator::new(platform.clone(), store.clone())),
            agents: AgentWalletManager::new(platform.clone(), store.clone()),
            executor: TradeExecutor::new(platform.clone(), book.clone()),
            config,
            platform,
            store,
            connector,
            book,
            poller: Mutex::new(None),
        }
    }

    /// Production wiring: Pear client plus a SQLite store at the configured path
    pub fn from_config(config: PlatformConfig, provider: Option<Arc<dyn WalletProvider>>) -> Result<Self> {
        let platform = PearClient::new(config.client_id.clone(), config.http_timeout)
            .with_base_url(config.api_url.clone());
        let store = SqliteSessionStore::new(&config.session_db_path)?;

        info!(
            "Session store at {}, platform {}",
            config.session_db_path.display(),
            config.api_url
        );
        Ok(Self::new(config, provider, Arc::new(platform), Arc::new(store)))
    }

    /// Replace the authenticator's clock (before any login)
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.auth = Arc::new(
            SessionAuthenticator::new(self.platform.clone(), self.store.clone()).with_clock(clock),
        );
        self
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn connector(&self) -> &Arc<WalletConnector> {
        &self.connector
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    pub fn wallet_session(&self) -> Option<WalletSession> {
        self.connector.session()
    }

    pub fn cached_agent_wallet(&self) -> Option<AgentWallet> {
        let owner = self.current_owner()?;
        self.agents.cached(&owner)
    }

    fn current_owner(&self) -> Option<String> {
        self.connector.address().map(|a| owner_key(&a))
    }

    fn require_owner(&self) -> Result<String> {
        self.current_owner().ok_or(SessionError::NotConnected)
    }

    /// Results computed for an address that is no longer connected are dropped
    fn ensure_still(&self, started: &str) -> Result<()> {
        if self.current_owner().as_deref() == Some(started) {
            Ok(())
        } else {
            warn!("Discarding result for {}: wallet changed", started);
            Err(SessionError::SessionChanged {
                started: started.to_string(),
            })
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connect the wallet and replay persisted state for its address
    pub async fn connect(&self) -> Result<WalletSession> {
        let session = self.connector.connect().await?;
        let owner = session.owner();

        if let Some(token) = self.auth.restore(&owner)? {
            debug!("Session for {} resumes with token {}", owner, token.preview());
        }
        self.agents.restore(&owner)?;

        Ok(session)
    }

    /// Ask the wallet to move to the platform's chain
    pub async fn switch_to_required_chain(&self) -> Result<()> {
        self.connector
            .switch_chain(self.connector.required_chain())
            .await?;
        Ok(())
    }

    /// Tear the session down: polling stops and the owner's caches are cleared
    pub fn disconnect(&self) -> Result<Option<Address>> {
        self.stop_polling();
        let Some(previous) = self.connector.disconnect() else {
            return Ok(None);
        };
        self.invalidate_owner(&owner_key(&previous))?;
        Ok(Some(previous))
    }

    /// Apply a provider event; account or chain changes invalidate the old owner
    pub fn handle_wallet_event(&self, event: &WalletEvent) -> Result<Option<SessionChange>> {
        let Some(change) = self.connector.apply_event(event) else {
            return Ok(None);
        };

        self.stop_polling();
        self.invalidate_owner(&owner_key(&change.previous))?;
        Ok(Some(change))
    }

    fn invalidate_owner(&self, owner: &str) -> Result<()> {
        self.auth.invalidate(owner)?;
        self.agents.invalidate(owner)?;
        self.book.clear();
        info!("Session state for {} invalidated", owner);
        Ok(())
    }

    /// Forward provider events into [`handle_wallet_event`](Self::handle_wallet_event)
    ///
    /// The task ends when the provider goes away or the session is dropped.
    pub fn spawn_event_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.connector.provider_events()?;
        let session: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Wallet event listener lagged by {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(session) = session.upgrade() else {
                    break;
                };
                if let Err(e) = session.handle_wallet_event(&event) {
                    warn!("Failed to apply wallet event {:?}: {}", event, e);
                }
            }
            debug!("Wallet event listener finished");
        }))
    }

    // ========================================================================
    // Authentication and agent wallet
    // ========================================================================

    /// Valid token for the connected wallet; runs the handshake when none is cached
    pub async fn authenticate(&self) -> Result<AuthToken> {
        self.auth.authenticate(&self.connector).await
    }

    pub async fn ensure_agent_wallet(&self) -> Result<AgentWallet> {
        let token = self.authenticate().await?;
        let result = self.agents.ensure_agent_wallet(&token).await;
        let wallet = self.handle_unauthorized(&token, result)?;
        self.ensure_still(&token.subject_address)?;
        Ok(wallet)
    }

    /// Re-probe approval on explicit request
    pub async fn check_agent_status(&self) -> Result<AgentWallet> {
        let token = self.authenticate().await?;
        let result = self.agents.check_status(&token).await;
        let wallet = self.handle_unauthorized(&token, result)?;
        self.ensure_still(&token.subject_address)?;
        Ok(wallet)
    }

    pub fn approval_reference(&self, wallet: &AgentWallet) -> ApprovalReference {
        self.agents.get_approval_reference(wallet)
    }

    /// A rejected token is dropped so the next call logs in again
    fn handle_unauthorized<T>(&self, token: &AuthToken, result: Result<T>) -> Result<T> {
        if result.as_ref().is_err_and(SessionError::is_unauthorized) {
            warn!("Token {} rejected by the platform", token.preview());
            self.auth.invalidate(&token.subject_address)?;
        }
        result
    }

    // ========================================================================
    // Trading
    // ========================================================================

    /// Execute a basket trade through the owner's agent wallet
    ///
    /// The request is validated before anything else, so an invalid request
    /// never reaches the network.
    pub async fn execute(&self, request: &BasketTradeRequest) -> Result<Position> {
        request.validate().map_err(TradeExecutionError::from)?;
        let owner = self.require_owner()?;

        if let Some(agent) = self.agents.cached(&owner) {
            if !agent.is_active() {
                return Err(TradeExecutionError::AgentNotApproved.into());
            }
        }

        let token = self.authenticate().await?;
        let agent = self.ensure_agent_wallet().await?;
        let result = self.executor.execute(&token, &agent, request).await;
        let position = self.handle_unauthorized(&token, result.map_err(SessionError::from))?;

        self.ensure_still(&token.subject_address)?;
        Ok(position)
    }

    /// Close all of a position, or `percentage` of it
    pub async fn close_position(&self, position_id: &str, percentage: Option<f64>) -> Result<Vec<Position>> {
        let token = self.authenticate().await?;
        let result = self
            .executor
            .close_position(&token, position_id, percentage)
            .await;
        let positions = self.handle_unauthorized(&token, result.map_err(SessionError::from))?;

        self.ensure_still(&token.subject_address)?;
        Ok(positions)
    }

    pub async fn refresh_positions(&self) -> Result<Vec<Position>> {
        let token = self.authenticate().await?;
        let result = refresh_positions(self.platform.as_ref(), &token, &self.book).await;
        let positions = self.handle_unauthorized(&token, result.map_err(SessionError::from))?;

        self.ensure_still(&token.subject_address)?;
        Ok(positions)
    }

    /// Account snapshot from the exchange
    pub async fn user_state(&self) -> Result<Value> {
        let token = self.authenticate().await?;
        let result = self.platform.user_state(&token.token).await;
        let state = self.handle_unauthorized(&token, result.map_err(SessionError::from))?;

        self.ensure_still(&token.subject_address)?;
        Ok(state)
    }

    /// Balance of the connected address, read from the chain
    pub async fn balance(&self, token: Option<&TokenContract>) -> Result<TokenAmount> {
        let address = self.connector.address().ok_or(SessionError::NotConnected)?;
        let amount = self.connector.get_balance(address, token).await?;

        self.ensure_still(&owner_key(&address))?;
        self.book.publish_balance(amount);
        Ok(amount)
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Refresh positions (and a balance) on the configured interval
    pub fn start_polling(&self, balance_token: Option<TokenContract>) -> Result<()> {
        let session = self.connector.session().ok_or(SessionError::NotConnected)?;

        let poller = PositionPoller::spawn(
            session.owner(),
            self.platform.clone(),
            self.auth.clone(),
            self.book.clone(),
            Some(BalanceWatch {
                connector: self.connector.clone(),
                address: session.address,
                token: balance_token,
            }),
            self.config.position_refresh,
        );

        // Replacing drops (and aborts) any previous poller
        *self.poller.lock() = Some(poller);
        Ok(())
    }

    pub fn stop_polling(&self) {
        if let Some(poller) = self.poller.lock().take() {
            info!("Stopping position polling for {}", poller.owner());
            poller.stop();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.lock().as_ref().is_some_and(PositionPoller::is_running)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
