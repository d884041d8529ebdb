//! Validation errors for basket trade requests

use thiserror::Error;

/// Reasons a basket request is rejected before it reaches the platform
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasketError {
    #[error("Basket has no long or short assets")]
    EmptyBasket,

    #[error("Position size ${usd_value} is below the ${minimum} minimum")]
    BelowMinimum { usd_value: f64, minimum: f64 },

    #[error("Leverage {0}x is outside 1-100x")]
    LeverageOutOfRange(u32),

    #[error("Slippage {0} must be strictly between 0 and 1")]
    SlippageOutOfRange(f64),

    #[error("Invalid weight {weight} for {asset}")]
    InvalidWeight { asset: String, weight: f64 },

    #[error("Invalid asset symbol: {0:?}")]
    InvalidAsset(String),

    #[error("{side} leg has {count} assets (max {max})")]
    TooManyAssets {
        side: &'static str,
        count: usize,
        max: usize,
    },
}

/// Result type alias for basket validation
pub type BasketResult<T> = Result<T, BasketError>;
