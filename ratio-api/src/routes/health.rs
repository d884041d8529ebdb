//! Health check endpoints

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use ratio_trading::{AgentStatus, AuthState, ConnectionState, TokenAmount};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    wallet: ConnectionState,
    auth: AuthState,
    agent: Option<AgentStatus>,
    polling: bool,
    positions: usize,
    positions_refreshed_at: Option<DateTime<Utc>>,
    balance: Option<TokenAmount>,
    platform: String,
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let session = &state.session;
    let book = session.book();

    Json(HealthResponse {
        status: "ok",
        wallet: session.connector().state(),
        auth: session.auth_state(),
        agent: session.cached_agent_wallet().map(|w| w.status),
        polling: session.is_polling(),
        positions: book.positions().len(),
        positions_refreshed_at: book.refreshed_at(),
        balance: book.balance(),
        platform: state.config.api_url.clone(),
    })
}

/// Simple liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratio_trading::{MemorySessionStore, PearClient, PlatformConfig, Session};
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> AppState {
        let config = PlatformConfig::default();
        let session = Session::new(
            config.clone(),
            None,
            Arc::new(PearClient::new(config.client_id.clone(), Duration::from_secs(1))),
            Arc::new(MemorySessionStore::new()),
        );
        AppState {
            session: Arc::new(session),
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn test_health_reports_cached_session_state() {
        let state = state();

        let Json(before) = health_check(State(state.clone())).await;
        assert_eq!(before.wallet, ConnectionState::Disconnected);
        assert_eq!(before.auth, AuthState::Unauthenticated);
        assert!(before.agent.is_none());
        assert!(before.positions_refreshed_at.is_none());
        assert!(before.balance.is_none());

        state.session.book().publish(Vec::new());
        let Json(after) = health_check(State(state)).await;
        assert!(after.positions_refreshed_at.is_some());

        let body = serde_json::to_value(&after).unwrap();
        assert_eq!(body["wallet"], "DISCONNECTED");
        assert_eq!(body["positions"], 0);
        assert!(body["positionsRefreshedAt"].is_string());
    }
}
