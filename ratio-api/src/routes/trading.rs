//! Basket trading and balance routes

use alloy::primitives::Address;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get},
    Router,
};
use ratio_core::{BasketTradeRequest, Position};
use ratio_trading::{TokenAmount, TokenContract, USDC_DECIMALS};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ClosePositionQuery {
    /// Fraction in (0, 1]; omitted closes the whole position
    pub percentage: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    /// ERC20 contract; omitted reads the native balance
    pub token: Option<String>,
    pub decimals: Option<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub raw: String,
    pub formatted: String,
    pub decimals: u8,
}

impl BalanceQuery {
    fn contract(&self) -> Result<Option<TokenContract>, ApiError> {
        let Some(raw) = self.token.as_deref() else {
            return Ok(None);
        };
        let address: Address = raw
            .trim()
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Invalid token address: {}", raw)))?;
        Ok(Some(TokenContract::new(
            address,
            self.decimals.unwrap_or(USDC_DECIMALS),
        )))
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn list_positions(State(state): State<AppState>) -> ApiResult<Json<Vec<Position>>> {
    Ok(Json(state.session.refresh_positions().await?))
}

async fn open_position(
    State(state): State<AppState>,
    Json(request): Json<BasketTradeRequest>,
) -> ApiResult<Json<Position>> {
    info!(
        "Basket trade: ${} x{} ({} long / {} short)",
        request.usd_value,
        request.leverage,
        request.long_assets.len(),
        request.short_assets.len()
    );

    Ok(Json(state.session.execute(&request).await?))
}

async fn close_position(
    State(state): State<AppState>,
    Path(position_id): Path<String>,
    Query(query): Query<ClosePositionQuery>,
) -> ApiResult<Json<Vec<Position>>> {
    Ok(Json(
        state
            .session
            .close_position(&position_id, query.percentage)
            .await?,
    ))
}

async fn balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<Json<BalanceResponse>> {
    let contract = query.contract()?;
    let amount: TokenAmount = state.session.balance(contract.as_ref()).await?;

    let address = state
        .session
        .wallet_session()
        .map(|s| s.address.to_string())
        .unwrap_or_default();

    Ok(Json(BalanceResponse {
        address,
        token: contract.map(|c| c.address.to_string()),
        raw: amount.raw.to_string(),
        formatted: amount.to_string(),
        decimals: amount.decimals,
    }))
}

/// Create trading routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/positions", get(list_positions).post(open_position))
        .route("/positions/{id}", delete(close_position))
        .route("/balance", get(balance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_query_defaults_to_usdc_decimals() {
        let query = BalanceQuery {
            token: Some("0xaf88d065e77c8cC2239327C5EDb3A432268e5831".to_string()),
            decimals: None,
        };
        let contract = query.contract().unwrap().unwrap();
        assert_eq!(contract.decimals, USDC_DECIMALS);

        let native = BalanceQuery {
            token: None,
            decimals: None,
        };
        assert!(native.contract().unwrap().is_none());
    }

    #[test]
    fn test_balance_query_rejects_bad_address() {
        let query = BalanceQuery {
            token: Some("0xnothex".to_string()),
            decimals: Some(6),
        };
        assert!(matches!(query.contract(), Err(ApiError::BadRequest(_))));
    }
}
