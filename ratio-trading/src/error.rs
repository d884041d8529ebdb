//! Error taxonomy for the session layer
//!
//! One enum per step of the flow. Every error is returned to the immediate
//! caller; `SessionError` wraps them so `?` composes across steps.

use ratio_core::{BasketError, ChainId};
use thiserror::Error;

/// Transport-level failure on an HTTP or JSON-RPC call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Request timed out")]
    Timeout,

    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, NetworkError::Http { status: 401, .. })
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkError::Timeout
        } else if e.is_decode() {
            NetworkError::InvalidResponse(e.to_string())
        } else {
            NetworkError::Unreachable(e.to_string())
        }
    }
}

/// Wallet connection step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("No wallet provider available")]
    NoProvider,

    #[error("User rejected the connection request")]
    UserRejected,

    #[error("Wallet provider error: {0}")]
    ProviderError(String),
}

/// Structured-data signing step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SigningError {
    #[error("User rejected the signature request")]
    UserRejected,

    #[error("Wallet provider error: {0}")]
    ProviderError(String),

    #[error("Wallet is on {actual}, expected {expected}")]
    WrongChain { expected: ChainId, actual: ChainId },
}

/// Login handshake against the platform
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Login rejected: {0}")]
    ServerRejected(String),

    #[error("Malformed login challenge: {0}")]
    MalformedChallenge(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Agent wallet lookup / creation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentWalletError {
    #[error("Agent wallet creation failed: {0}")]
    CreationFailed(String),

    #[error("Access token rejected by the platform")]
    Unauthorized,

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Trade validation and submission
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeExecutionError {
    #[error("Agent wallet is not approved on the exchange")]
    AgentNotApproved,

    #[error("Position size ${usd_value} is below the ${minimum} minimum")]
    BelowMinimum { usd_value: f64, minimum: f64 },

    #[error("Invalid trade request: {0}")]
    InvalidRequest(String),

    #[error("Trade rejected: {0}")]
    ServerRejected(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl From<BasketError> for TradeExecutionError {
    fn from(e: BasketError) -> Self {
        match e {
            BasketError::BelowMinimum { usd_value, minimum } => {
                TradeExecutionError::BelowMinimum { usd_value, minimum }
            }
            other => TradeExecutionError::InvalidRequest(other.to_string()),
        }
    }
}

/// Persisted session store failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Corrupt value for {key}: {value}")]
    Corrupt { key: &'static str, value: String },

    #[error("Lock error")]
    LockError,
}

/// Any failure surfaced by the session orchestration
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    AgentWallet(#[from] AgentWalletError),

    #[error(transparent)]
    Trade(#[from] TradeExecutionError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Wallet not connected")]
    NotConnected,

    #[error("Wallet changed from {started} while the request was in flight")]
    SessionChanged { started: String },
}

impl SessionError {
    /// The platform no longer honours the access token (HTTP 401 anywhere in the chain)
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SessionError::AgentWallet(AgentWalletError::Unauthorized) => true,
            SessionError::Network(e)
            | SessionError::Auth(AuthError::Network(e))
            | SessionError::AgentWallet(AgentWalletError::Network(e))
            | SessionError::Trade(TradeExecutionError::Network(e)) => e.is_unauthorized(),
            _ => false,
        }
    }

    /// Stable machine-readable kind for API responses
    pub fn kind(&self) -> &'static str {
        if self.is_unauthorized() {
            return "auth_expired";
        }
        match self {
            SessionError::Connection(ConnectionError::NoProvider) => "no_provider",
            SessionError::Connection(ConnectionError::UserRejected) => "connection_rejected",
            SessionError::Connection(ConnectionError::ProviderError(_)) => "provider_error",
            SessionError::Signing(SigningError::UserRejected) => "signature_rejected",
            SessionError::Signing(SigningError::WrongChain { .. }) => "wrong_chain",
            SessionError::Signing(SigningError::ProviderError(_)) => "provider_error",
            SessionError::Auth(AuthError::Network(_)) => "network",
            SessionError::Auth(_) => "auth_rejected",
            SessionError::AgentWallet(AgentWalletError::Network(_)) => "network",
            SessionError::AgentWallet(AgentWalletError::Unauthorized) => "auth_expired",
            SessionError::AgentWallet(_) => "agent_wallet",
            SessionError::Trade(TradeExecutionError::AgentNotApproved) => "agent_not_approved",
            SessionError::Trade(TradeExecutionError::BelowMinimum { .. }) => "below_minimum",
            SessionError::Trade(TradeExecutionError::InvalidRequest(_)) => "invalid_request",
            SessionError::Trade(TradeExecutionError::ServerRejected(_)) => "trade_rejected",
            SessionError::Trade(TradeExecutionError::Network(_)) => "network",
            SessionError::Network(_) => "network",
            SessionError::Store(_) => "store",
            SessionError::NotConnected => "not_connected",
            SessionError::SessionChanged { .. } => "session_changed",
        }
    }

    /// Actionable text for the user
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Connection(ConnectionError::NoProvider) => {
                "No wallet found. Install or unlock a wallet and try again.".to_string()
            }
            SessionError::Connection(ConnectionError::UserRejected) => {
                "Wallet connection was rejected. Approve the request to continue.".to_string()
            }
            SessionError::Signing(SigningError::UserRejected) => {
                "Signature rejected. Sign the login message to continue.".to_string()
            }
            SessionError::Signing(SigningError::WrongChain { expected, .. }) => {
                format!("Switch your wallet to {} and try again.", expected)
            }
            SessionError::Trade(TradeExecutionError::AgentNotApproved) => {
                "Approve the agent wallet on the exchange before trading.".to_string()
            }
            SessionError::Trade(TradeExecutionError::BelowMinimum { minimum, .. }) => {
                format!("Position size must be at least ${}.", minimum)
            }
            e if e.is_unauthorized() => "Your session expired. Sign in again.".to_string(),
            SessionError::NotConnected => "Connect your wallet first.".to_string(),
            SessionError::SessionChanged { .. } => {
                "Your wallet changed. Retry with the new account.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
