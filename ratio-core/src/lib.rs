//! Core types for the Ratio basket trading session layer
//!
//! This crate defines the shared data structures used across the workspace,
//! including chains, basket trade requests, positions and validation errors.

pub mod basket;
pub mod chain;
pub mod error;
pub mod position;

pub use basket::{
    canonical_asset, normalize_leg, AssetWeight, BasketTradeRequest, LegSide, RiskTarget,
    RiskTargetKind, DEFAULT_SLIPPAGE, MAX_ASSETS_PER_SIDE, MAX_LEVERAGE, MIN_LEVERAGE,
    MIN_USD_VALUE,
};
pub use chain::ChainId;
pub use error::{BasketError, BasketResult};
pub use position::Position;
