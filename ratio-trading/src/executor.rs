//! Basket trade execution

use chrono::Utc;
use ratio_core::{BasketTradeRequest, LegSide, Position};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::AgentWallet;
use crate::auth::AuthToken;
use crate::client::PlatformApi;
use crate::error::TradeExecutionError;
use crate::positions::{PositionBook, refresh_positions};
use crate::types::{OpenPositionRequest, OpenPositionResponse};

/// Validates, normalizes and submits basket trades
pub struct TradeExecutor {
    platform: Arc<dyn PlatformApi>,
    book: Arc<PositionBook>,
}

impl TradeExecutor {
    pub fn new(platform: Arc<dyn PlatformApi>, book: Arc<PositionBook>) -> Self {
        Self { platform, book }
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    /// Local checks only; returns the normalized request to submit
    pub fn prepare(
        agent: &AgentWallet,
        request: &BasketTradeRequest,
    ) -> Result<BasketTradeRequest, TradeExecutionError> {
        if !agent.is_active() {
            return Err(TradeExecutionError::AgentNotApproved);
        }
        request.validate()?;
        Ok(request.normalized())
    }

    /// Open a MARKET basket position and return it
    ///
    /// Server rejections come back verbatim; nothing is retried. The position
    /// list is refreshed before returning.
    pub async fn execute(
        &self,
        token: &AuthToken,
        agent: &AgentWallet,
        request: &BasketTradeRequest,
    ) -> Result<Position, TradeExecutionError> {
        let normalized = Self::prepare(agent, request)?;
        let order = OpenPositionRequest::market(&normalized);

        let response = self.platform.open_position(&token.token, &order).await?;
        info!(
            "Opened {} / {} basket (${}, x{}) as {:?}",
            normalized.leg_label(LegSide::Long),
            normalized.leg_label(LegSide::Short),
            normalized.usd_value,
            normalized.leverage,
            response.id()
        );

        let positions = self.refresh_or_last_known(token).await;
        Ok(locate_position(&response, &normalized, &positions))
    }

    /// Close `percentage` (0, 1] of a position; `None` closes all of it
    pub async fn close_position(
        &self,
        token: &AuthToken,
        position_id: &str,
        percentage: Option<f64>,
    ) -> Result<Vec<Position>, TradeExecutionError> {
        if position_id.trim().is_empty() {
            return Err(TradeExecutionError::InvalidRequest(
                "position id is required".to_string(),
            ));
        }
        if let Some(p) = percentage {
            if !(p > 0.0 && p <= 1.0) {
                return Err(TradeExecutionError::InvalidRequest(format!(
                    "close percentage must be in (0, 1], got {}",
                    p
                )));
            }
        }

        self.platform
            .close_position(&token.token, position_id, percentage)
            .await?;
        info!("Closed position {} ({:?})", position_id, percentage);

        Ok(self.refresh_or_last_known(token).await)
    }

    /// The trade already happened; a failed refresh must not turn it into an error
    async fn refresh_or_last_known(&self, token: &AuthToken) -> Vec<Position> {
        match refresh_positions(self.platform.as_ref(), token, &self.book).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!("Position refresh after trade failed: {}", e);
                self.book.positions()
            }
        }
    }
}

/// Pick the executed position out of the refreshed list
///
/// A response id is authoritative: when that id is not listed yet (or the
/// refresh failed) a provisional projection carrying it is returned. Only an
/// id-less response falls back to the newest position on the same legs.
fn locate_position(
    response: &OpenPositionResponse,
    request: &BasketTradeRequest,
    positions: &[Position],
) -> Position {
    let long_label = request.leg_label(LegSide::Long);
    let short_label = request.leg_label(LegSide::Short);

    let id = response.id();
    match &id {
        Some(id) => {
            if let Some(found) = positions.iter().find(|p| &p.id == id) {
                return found.clone();
            }
        }
        None => {
            if let Some(found) = positions
                .iter()
                .filter(|p| p.matches_legs(&long_label, &short_label))
                .max_by_key(|p| p.opened_at)
            {
                return found.clone();
            }
        }
    }

    Position {
        id: id.unwrap_or_default(),
        long_asset: long_label,
        short_asset: short_label,
        notional: Decimal::try_from(request.usd_value).unwrap_or_default(),
        leverage: request.leverage,
        pnl: Decimal::ZERO,
        opened_at: Utc::now(),
    }
}
