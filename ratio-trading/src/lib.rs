//! Ratio Trading - wallet-to-platform session orchestration
//!
//! This crate provides:
//! - Wallet connection behind one provider interface (local key, JSON-RPC bridge)
//! - EIP-712 challenge/response login with a persisted bearer token
//! - Agent wallet discovery, creation and approval tracking
//! - Basket trade validation, normalization and execution
//! - Position refresh and interval polling
//!
//! Everything hangs off an explicit [`Session`]; no component keeps global state.

pub mod agent;
pub mod auth;
pub mod balance;
pub mod client;
pub mod config;
pub mod eip712;
pub mod error;
pub mod executor;
pub mod positions;
pub mod rpc;
pub mod session;
pub mod store;
pub mod types;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentStatus, AgentWallet, AgentWalletManager, ApprovalReference};
pub use auth::{AuthState, AuthToken, Clock, SessionAuthenticator};
pub use balance::{ChainRpc, NATIVE_DECIMALS, TokenAmount, TokenContract, USDC_DECIMALS};
pub use client::{PearClient, PlatformApi};
pub use config::PlatformConfig;
pub use eip712::TypedDataRequest;
pub use error::{
    AgentWalletError, AuthError, ConnectionError, NetworkError, Result, SessionError,
    SigningError, StoreError, TradeExecutionError,
};
pub use executor::TradeExecutor;
pub use positions::{PositionBook, PositionPoller, refresh_positions};
pub use session::Session;
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore, StoreKey};
pub use wallet::{
    ConnectionState, JsonRpcWalletProvider, LocalWalletProvider, SessionChange, WalletConnector,
    WalletEvent, WalletProvider, WalletSession, owner_key,
};
