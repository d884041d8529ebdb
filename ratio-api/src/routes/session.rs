//! Wallet session routes: connect, login, agent wallet

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use ratio_trading::{AgentWallet, ApprovalReference, WalletSession};
use serde::Serialize;
use tracing::info;

use crate::error::ApiResult;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

/// Login result. The bearer token itself stays server-side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub address: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectResponse {
    pub disconnected: Option<String>,
}

/// Agent wallet plus what the user must do while it is still pending
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWalletResponse {
    #[serde(flatten)]
    pub wallet: AgentWallet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalReference>,
}

impl AgentWalletResponse {
    fn new(state: &AppState, wallet: AgentWallet) -> Self {
        let approval = (!wallet.is_active()).then(|| state.session.approval_reference(&wallet));
        Self { wallet, approval }
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn connect(State(state): State<AppState>) -> ApiResult<Json<WalletSession>> {
    let session = state.session.connect().await?;
    info!("Wallet {} connected on chain {}", session.address, session.chain_id);
    Ok(Json(session))
}

async fn switch_chain(State(state): State<AppState>) -> ApiResult<Json<Option<WalletSession>>> {
    state.session.switch_to_required_chain().await?;
    Ok(Json(state.session.wallet_session()))
}

/// Log in (or reuse a valid token) and start background position refresh
async fn authenticate(State(state): State<AppState>) -> ApiResult<Json<AuthResponse>> {
    let token = state.session.authenticate().await?;

    if !state.session.is_polling() {
        state.session.start_polling(None)?;
    }

    Ok(Json(AuthResponse {
        address: token.subject_address,
        expires_at: token.expires_at,
    }))
}

async fn disconnect(State(state): State<AppState>) -> ApiResult<Json<DisconnectResponse>> {
    let previous = state.session.disconnect()?;
    Ok(Json(DisconnectResponse {
        disconnected: previous.map(|a| a.to_string()),
    }))
}

async fn get_agent_wallet(State(state): State<AppState>) -> ApiResult<Json<AgentWalletResponse>> {
    let wallet = state.session.ensure_agent_wallet().await?;
    Ok(Json(AgentWalletResponse::new(&state, wallet)))
}

async fn check_agent_wallet(State(state): State<AppState>) -> ApiResult<Json<AgentWalletResponse>> {
    let wallet = state.session.check_agent_status().await?;
    Ok(Json(AgentWalletResponse::new(&state, wallet)))
}

async fn user_state(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(state.session.user_state().await?))
}

/// Create session routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/session/connect", post(connect))
        .route("/session/switch-chain", post(switch_chain))
        .route("/session/auth", post(authenticate))
        .route("/session/disconnect", post(disconnect))
        .route("/agent-wallet", get(get_agent_wallet))
        .route("/agent-wallet/check", post(check_agent_wallet))
        .route("/user-state", get(user_state))
}
