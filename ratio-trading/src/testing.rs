//! In-crate fakes for orchestration tests

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use ratio_core::{ChainId, Position};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::client::PlatformApi;
use crate::eip712::TypedDataRequest;
use crate::error::{AgentWalletError, AuthError, ConnectionError, NetworkError, SigningError, TradeExecutionError};
use crate::types::{Eip712Challenge, LoginResponse, OpenPositionRequest, OpenPositionResponse};
use crate::wallet::{WalletEvent, WalletProvider};

pub const AGENT_ADDRESS: &str = "0x00000000000000000000000000000000000a9e17";

#[derive(Default)]
pub struct Calls {
    pub challenge: AtomicUsize,
    pub login: AtomicUsize,
    pub get_agent: AtomicUsize,
    pub create_agent: AtomicUsize,
    pub user_state: AtomicUsize,
    pub open: AtomicUsize,
    pub positions: AtomicUsize,
    pub close: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        [
            &self.challenge,
            &self.login,
            &self.get_agent,
            &self.create_agent,
            &self.user_state,
            &self.open,
            &self.positions,
            &self.close,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

fn bump(counter: &AtomicUsize) -> usize {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

/// Scriptable platform that counts calls
pub struct FakePlatform {
    pub calls: Calls,
    pub expires_in: Mutex<Option<i64>>,
    pub reject_login: Mutex<Option<String>>,
    pub login_error: Mutex<Option<AuthError>>,
    pub agent: Mutex<Option<String>>,
    pub approved: Mutex<bool>,
    pub reject_open: Mutex<Option<String>>,
    pub fail_positions: Mutex<bool>,
    /// Every token-bearing read answers 401
    pub revoked: Mutex<bool>,
    pub positions: Mutex<Vec<Position>>,
    pub create_delay: Mutex<Option<Duration>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            calls: Calls::default(),
            expires_in: Mutex::new(Some(3600)),
            reject_login: Mutex::new(None),
            login_error: Mutex::new(None),
            agent: Mutex::new(None),
            approved: Mutex::new(false),
            reject_open: Mutex::new(None),
            fail_positions: Mutex::new(false),
            revoked: Mutex::new(false),
            positions: Mutex::new(Vec::new()),
            create_delay: Mutex::new(None),
        }
    }
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn approve(&self) {
        *self.approved.lock() = true;
    }

    pub fn count(&self, counter: fn(&Calls) -> &AtomicUsize) -> usize {
        counter(&self.calls).load(Ordering::SeqCst)
    }

    fn check_revoked(&self) -> Result<(), NetworkError> {
        if *self.revoked.lock() {
            return Err(NetworkError::Http {
                status: 401,
                body: "token expired".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn eip712_message(&self, address: &str) -> Result<Eip712Challenge, AuthError> {
        bump(&self.calls.challenge);
        serde_json::from_value(json!({
            "domain": {"name": "Pear Protocol", "version": "1", "chainId": 42161},
            "types": {
                "EIP712Domain": [{"name": "name", "type": "string"}],
                "Message": [
                    {"name": "address", "type": "address"},
                    {"name": "timestamp", "type": "uint256"}
                ]
            },
            "primaryType": "Message",
            "message": {"address": address, "timestamp": 1700000000}
        }))
        .map_err(|e| AuthError::MalformedChallenge(e.to_string()))
    }

    async fn login(&self, _address: &str, _signature: &str, _timestamp: Value) -> Result<LoginResponse, AuthError> {
        let n = bump(&self.calls.login);
        if let Some(reason) = self.reject_login.lock().clone() {
            return Err(AuthError::ServerRejected(reason));
        }
        if let Some(err) = self.login_error.lock().clone() {
            return Err(err);
        }
        Ok(LoginResponse {
            access_token: format!("T{}", n),
            expires_in: *self.expires_in.lock(),
        })
    }

    async fn get_agent_wallet(&self, _token: &str) -> Result<Option<String>, AgentWalletError> {
        bump(&self.calls.get_agent);
        Ok(self.agent.lock().clone())
    }

    async fn create_agent_wallet(&self, _token: &str) -> Result<String, AgentWalletError> {
        bump(&self.calls.create_agent);
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        *self.agent.lock() = Some(AGENT_ADDRESS.to_string());
        Ok(AGENT_ADDRESS.to_string())
    }

    async fn user_state(&self, _token: &str) -> Result<Value, NetworkError> {
        bump(&self.calls.user_state);
        self.check_revoked()?;
        if *self.approved.lock() {
            Ok(json!({"marginSummary": {"accountValue": "100.0"}}))
        } else {
            Err(NetworkError::Http {
                status: 403,
                body: "agent not approved".to_string(),
            })
        }
    }

    async fn open_position(
        &self,
        _token: &str,
        request: &OpenPositionRequest,
    ) -> Result<OpenPositionResponse, TradeExecutionError> {
        let n = bump(&self.calls.open);
        if let Some(reason) = self.reject_open.lock().clone() {
            return Err(TradeExecutionError::ServerRejected(reason));
        }

        let label = |legs: &[ratio_core::AssetWeight]| {
            legs.iter().map(|l| l.asset.clone()).collect::<Vec<_>>().join("+")
        };
        let id = format!("p-{}", n);
        self.positions.lock().push(Position {
            id: id.clone(),
            long_asset: label(&request.long_assets),
            short_asset: label(&request.short_assets),
            notional: Decimal::try_from(request.usd_value).unwrap_or_default(),
            leverage: request.leverage,
            pnl: Decimal::ZERO,
            opened_at: Utc::now(),
        });

        Ok(OpenPositionResponse {
            position_id: Some(id),
            ..Default::default()
        })
    }

    async fn positions(&self, _token: &str) -> Result<Vec<Position>, NetworkError> {
        bump(&self.calls.positions);
        self.check_revoked()?;
        if *self.fail_positions.lock() {
            return Err(NetworkError::Timeout);
        }
        Ok(self.positions.lock().clone())
    }

    async fn close_position(
        &self,
        _token: &str,
        position_id: &str,
        percentage: Option<f64>,
    ) -> Result<(), TradeExecutionError> {
        bump(&self.calls.close);
        if percentage.is_none_or(|p| p >= 1.0) {
            self.positions.lock().retain(|p| p.id != position_id);
        }
        Ok(())
    }
}

type SignHook = Box<dyn Fn() + Send + Sync>;

/// Scriptable wallet provider
pub struct FakeWallet {
    address: Mutex<Address>,
    chain_id: Mutex<ChainId>,
    reject_connect: Mutex<bool>,
    reject_sign: Mutex<bool>,
    on_sign: Mutex<Option<SignHook>>,
    account_requests: AtomicUsize,
    signatures: AtomicUsize,
    events: broadcast::Sender<WalletEvent>,
}

impl FakeWallet {
    pub fn new(chain_id: ChainId) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            address: Mutex::new(Address::repeat_byte(0xab)),
            chain_id: Mutex::new(chain_id),
            reject_connect: Mutex::new(false),
            reject_sign: Mutex::new(false),
            on_sign: Mutex::new(None),
            account_requests: AtomicUsize::new(0),
            signatures: AtomicUsize::new(0),
            events,
        }
    }

    pub fn address(&self) -> Address {
        *self.address.lock()
    }

    pub fn reject_connect(&self, reject: bool) {
        *self.reject_connect.lock() = reject;
    }

    pub fn reject_sign(&self, reject: bool) {
        *self.reject_sign.lock() = reject;
    }

    /// Run `hook` while a signature is being produced
    pub fn on_sign(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_sign.lock() = Some(Box::new(hook));
    }

    pub fn emit(&self, event: WalletEvent) {
        if let WalletEvent::AccountsChanged(accounts) = &event {
            if let Some(address) = accounts.first() {
                *self.address.lock() = *address;
            }
        }
        let _ = self.events.send(event);
    }

    pub fn account_requests(&self) -> usize {
        self.account_requests.load(Ordering::SeqCst)
    }

    pub fn signatures(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    fn name(&self) -> &str {
        "fake"
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ConnectionError> {
        bump(&self.account_requests);
        // Let a concurrent caller queue up behind this one
        tokio::task::yield_now().await;
        if *self.reject_connect.lock() {
            return Err(ConnectionError::UserRejected);
        }
        Ok(vec![self.address()])
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectionError> {
        Ok(*self.chain_id.lock())
    }

    async fn sign_typed_data(&self, _address: Address, _data: &TypedDataRequest) -> Result<String, SigningError> {
        if let Some(hook) = self.on_sign.lock().as_ref() {
            hook();
        }
        if *self.reject_sign.lock() {
            return Err(SigningError::UserRejected);
        }
        bump(&self.signatures);
        Ok(format!("0x{}", "11".repeat(65)))
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), SigningError> {
        *self.chain_id.lock() = chain_id;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
