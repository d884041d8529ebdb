//! Open basket positions as reported by the trading platform

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A basket position. Read-only: fetched from the platform, never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Platform position identifier
    pub id: String,

    /// Long leg label (`BTC+ETH` for multi-asset legs)
    pub long_asset: String,

    /// Short leg label
    pub short_asset: String,

    /// USD size of the position before leverage
    pub notional: Decimal,

    /// Leverage the position was opened with
    pub leverage: u32,

    /// Unrealized profit/loss in USD
    pub pnl: Decimal,

    /// When the position was opened
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Exposure after leverage
    pub fn exposure(&self) -> Decimal {
        self.notional * Decimal::from(self.leverage.max(1))
    }

    /// P&L as a percentage of notional
    pub fn pnl_percentage(&self) -> Decimal {
        if self.notional.is_zero() {
            Decimal::ZERO
        } else {
            (self.pnl / self.notional) * Decimal::from(100)
        }
    }

    /// Whether this position trades the given legs
    pub fn matches_legs(&self, long_asset: &str, short_asset: &str) -> bool {
        self.long_asset.eq_ignore_ascii_case(long_asset)
            && self.short_asset.eq_ignore_ascii_case(short_asset)
    }
}
