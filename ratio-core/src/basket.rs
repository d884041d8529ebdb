//! Basket (long/short pair) trade requests
//!
//! A basket trade opens a weighted set of long assets against a weighted set
//! of short assets. Weights inside a leg are relative; before submission each
//! leg is normalized so its weights sum to 1.0.

use crate::error::{BasketError, BasketResult};
use serde::{Deserialize, Serialize};

/// Smallest position size the platform accepts, in USD
pub const MIN_USD_VALUE: f64 = 10.0;

/// Leverage bounds (inclusive)
pub const MIN_LEVERAGE: u32 = 1;
pub const MAX_LEVERAGE: u32 = 100;

/// Slippage tolerance used when the request does not specify one (8%)
pub const DEFAULT_SLIPPAGE: f64 = 0.08;

/// Maximum number of distinct assets per leg
pub const MAX_ASSETS_PER_SIDE: usize = 5;

/// Sums this close to 1.0 are treated as already normalized
const NORMALIZED_EPSILON: f64 = 1e-12;

/// Which side of the basket a leg sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegSide {
    Long,
    Short,
}

impl LegSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegSide::Long => "long",
            LegSide::Short => "short",
        }
    }
}

/// One asset and its relative weight inside a leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetWeight {
    pub asset: String,
    pub weight: f64,
}

impl AssetWeight {
    pub fn new(asset: impl Into<String>, weight: f64) -> Self {
        Self {
            asset: asset.into(),
            weight,
        }
    }
}

/// How a take-profit / stop-loss value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTargetKind {
    Percentage,
}

/// Take-profit or stop-loss trigger attached to a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTarget {
    #[serde(rename = "type")]
    pub kind: RiskTargetKind,
    pub value: f64,
}

impl RiskTarget {
    /// Percentage trigger; the sign is dropped since the platform expects magnitudes
    pub fn percentage(value: f64) -> Self {
        Self {
            kind: RiskTargetKind::Percentage,
            value: value.abs(),
        }
    }
}

/// A leveraged long/short basket trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasketTradeRequest {
    #[serde(default)]
    pub long_assets: Vec<AssetWeight>,
    #[serde(default)]
    pub short_assets: Vec<AssetWeight>,
    pub usd_value: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<RiskTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<RiskTarget>,
}

fn default_leverage() -> u32 {
    MIN_LEVERAGE
}

impl BasketTradeRequest {
    pub fn new(long_assets: Vec<AssetWeight>, short_assets: Vec<AssetWeight>, usd_value: f64) -> Self {
        Self {
            long_assets,
            short_assets,
            usd_value,
            leverage: MIN_LEVERAGE,
            slippage: None,
            take_profit: None,
            stop_loss: None,
        }
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_slippage(mut self, slippage: f64) -> Self {
        self.slippage = Some(slippage);
        self
    }

    pub fn with_take_profit(mut self, percent: f64) -> Self {
        self.take_profit = Some(RiskTarget::percentage(percent));
        self
    }

    pub fn with_stop_loss(mut self, percent: f64) -> Self {
        self.stop_loss = Some(RiskTarget::percentage(percent));
        self
    }

    /// Slippage that will be submitted
    pub fn effective_slippage(&self) -> f64 {
        self.slippage.unwrap_or(DEFAULT_SLIPPAGE)
    }

    /// Check the request locally. Never touches the network.
    pub fn validate(&self) -> BasketResult<()> {
        if self.long_assets.is_empty() && self.short_assets.is_empty() {
            return Err(BasketError::EmptyBasket);
        }

        // NaN fails the comparison and is rejected too
        if !(self.usd_value >= MIN_USD_VALUE) {
            return Err(BasketError::BelowMinimum {
                usd_value: self.usd_value,
                minimum: MIN_USD_VALUE,
            });
        }

        if !(MIN_LEVERAGE..=MAX_LEVERAGE).contains(&self.leverage) {
            return Err(BasketError::LeverageOutOfRange(self.leverage));
        }

        let slippage = self.effective_slippage();
        if !(slippage > 0.0 && slippage < 1.0) {
            return Err(BasketError::SlippageOutOfRange(slippage));
        }

        validate_leg(LegSide::Long, &self.long_assets)?;
        validate_leg(LegSide::Short, &self.short_assets)?;

        Ok(())
    }

    /// Canonical symbols, merged duplicates, unit-sum legs and explicit slippage
    pub fn normalized(&self) -> BasketTradeRequest {
        BasketTradeRequest {
            long_assets: normalize_leg(&merge_leg(&self.long_assets)),
            short_assets: normalize_leg(&merge_leg(&self.short_assets)),
            usd_value: self.usd_value,
            leverage: self.leverage,
            slippage: Some(self.effective_slippage()),
            take_profit: self.take_profit.clone(),
            stop_loss: self.stop_loss.clone(),
        }
    }

    /// Display label for a leg, e.g. `BTC+ETH`
    pub fn leg_label(&self, side: LegSide) -> String {
        let leg = match side {
            LegSide::Long => &self.long_assets,
            LegSide::Short => &self.short_assets,
        };
        leg.iter()
            .map(|a| canonical_asset(&a.asset))
            .collect::<Vec<_>>()
            .join("+")
    }
}

fn validate_leg(side: LegSide, leg: &[AssetWeight]) -> BasketResult<()> {
    for asset in leg {
        if canonical_asset(&asset.asset).is_empty() {
            return Err(BasketError::InvalidAsset(asset.asset.clone()));
        }
        if !asset.weight.is_finite() || asset.weight < 0.0 {
            return Err(BasketError::InvalidWeight {
                asset: asset.asset.clone(),
                weight: asset.weight,
            });
        }
    }

    let distinct = merge_leg(leg).len();
    if distinct > MAX_ASSETS_PER_SIDE {
        return Err(BasketError::TooManyAssets {
            side: side.as_str(),
            count: distinct,
            max: MAX_ASSETS_PER_SIDE,
        });
    }

    Ok(())
}

/// Upper-case symbol with any `-PERP` suffix removed
pub fn canonical_asset(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    upper
        .strip_suffix("-PERP")
        .map(str::to_string)
        .unwrap_or(upper)
}

/// Merge repeated symbols by summing their weights, keeping first-seen order
fn merge_leg(leg: &[AssetWeight]) -> Vec<AssetWeight> {
    let mut merged: Vec<AssetWeight> = Vec::with_capacity(leg.len());
    for entry in leg {
        let symbol = canonical_asset(&entry.asset);
        match merged.iter_mut().find(|m| m.asset == symbol) {
            Some(existing) => existing.weight += entry.weight,
            None => merged.push(AssetWeight::new(symbol, entry.weight)),
        }
    }
    merged
}

/// Scale a leg so its weights sum to 1.0
///
/// A leg whose weights sum to zero is returned unchanged; the platform rejects
/// it. Already-normalized legs are returned as-is, so the operation is idempotent.
pub fn normalize_leg(leg: &[AssetWeight]) -> Vec<AssetWeight> {
    let sum: f64 = leg.iter().map(|a| a.weight).sum();

    if sum == 0.0 || (sum - 1.0).abs() <= NORMALIZED_EPSILON {
        return leg.to_vec();
    }

    leg.iter()
        .map(|a| AssetWeight::new(a.asset.clone(), a.weight / sum))
        .collect()
}
