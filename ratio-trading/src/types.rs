//! Shared types for the trading platform API

use chrono::{DateTime, TimeZone, Utc};
use ratio_core::{AssetWeight, BasketTradeRequest, Position, RiskTarget, canonical_asset};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Platform Constants
// ============================================================================

/// Trading platform base URL (Pear Protocol, proxying Hyperliquid)
pub const PEAR_API_URL: &str = "https://hl-v2.pearprotocol.io";

/// Client id registered with the platform
pub const DEFAULT_CLIENT_ID: &str = "HLHackathon9";

/// Arbitrum One public RPC
pub const ARBITRUM_RPC_URL: &str = "https://arb1.arbitrum.io/rpc";

/// Where users authorize agent addresses on the exchange
pub const AGENT_APPROVAL_URL: &str = "https://app.hyperliquid.xyz/API";

/// Execution type for basket orders
pub const EXECUTION_TYPE_MARKET: &str = "MARKET";

/// Login method for the EIP-712 handshake
pub const LOGIN_METHOD_EIP712: &str = "eip712";

/// Token lifetime assumed when the login response omits `expiresIn`
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

// ============================================================================
// Auth
// ============================================================================

/// Login challenge returned by `GET /auth/eip712-message`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Challenge {
    pub domain: Value,
    pub types: Map<String, Value>,
    #[serde(default = "default_primary_type")]
    pub primary_type: String,
    pub message: Value,
}

fn default_primary_type() -> String {
    "Message".to_string()
}

impl Eip712Challenge {
    /// Timestamp the server embedded in the message; echoed back on login
    pub fn timestamp(&self) -> Option<&Value> {
        self.message.get("timestamp").filter(|v| !v.is_null())
    }

    /// Address as the server echoed it in the message
    pub fn echoed_address(&self) -> Option<&str> {
        self.message.get("address").and_then(Value::as_str)
    }
}

/// Body of `POST /auth/login`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub method: &'static str,
    pub address: String,
    pub client_id: String,
    pub details: LoginDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginDetails {
    pub signature: String,
    pub timestamp: Value,
}

/// Response from `POST /auth/login`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

// ============================================================================
// Agent Wallet
// ============================================================================

/// Response from `GET /agentWallet` and `POST /agentWallet`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWalletResponse {
    #[serde(default)]
    pub agent_wallet_address: Option<String>,
}

/// Body of `POST /agentWallet`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentWalletRequest {
    pub client_id: String,
}

// ============================================================================
// Positions
// ============================================================================

/// Body of `POST /positions`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionRequest {
    pub execution_type: &'static str,
    pub slippage: f64,
    pub leverage: u32,
    pub usd_value: f64,
    pub long_assets: Vec<AssetWeight>,
    pub short_assets: Vec<AssetWeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<RiskTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<RiskTarget>,
}

impl OpenPositionRequest {
    /// Build a MARKET order from an already-normalized request
    pub fn market(request: &BasketTradeRequest) -> Self {
        Self {
            execution_type: EXECUTION_TYPE_MARKET,
            slippage: request.effective_slippage(),
            leverage: request.leverage,
            usd_value: request.usd_value,
            long_assets: request.long_assets.clone(),
            short_assets: request.short_assets.clone(),
            take_profit: request.take_profit.clone(),
            stop_loss: request.stop_loss.clone(),
        }
    }
}

/// Response from `POST /positions`. Only the identifier is interpreted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionResponse {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub position_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OpenPositionResponse {
    /// Identifier of the opened position, falling back to `id` / `orderId`
    pub fn id(&self) -> Option<String> {
        self.position_id.clone().or_else(|| {
            ["id", "orderId"]
                .iter()
                .find_map(|k| self.extra.get(*k).and_then(id_from_value))
        })
    }
}

/// Body of `DELETE /positions/{id}` for partial closes
#[derive(Debug, Clone, Serialize)]
pub struct ClosePositionRequest {
    pub percentage: f64,
}

/// Asset entry inside a platform position
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformAsset {
    #[serde(alias = "coin")]
    pub asset: String,
}

/// Position as returned by `GET /positions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPosition {
    #[serde(alias = "id", deserialize_with = "deserialize_id")]
    pub position_id: String,
    #[serde(default)]
    pub long_assets: Vec<PlatformAsset>,
    #[serde(default)]
    pub short_assets: Vec<PlatformAsset>,
    #[serde(default, alias = "entryPositionValue", alias = "usdValue")]
    pub position_value: Decimal,
    #[serde(default)]
    pub leverage: Option<f64>,
    #[serde(default, alias = "unrealizedPnl")]
    pub pnl: Decimal,
    #[serde(default, alias = "openedAt", deserialize_with = "deserialize_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl PlatformPosition {
    pub fn into_position(self) -> Position {
        fn label(assets: &[PlatformAsset]) -> String {
            assets
                .iter()
                .map(|a| canonical_asset(&a.asset))
                .collect::<Vec<_>>()
                .join("+")
        }

        Position {
            long_asset: label(&self.long_assets),
            short_asset: label(&self.short_assets),
            id: self.position_id,
            notional: self.position_value,
            leverage: self.leverage.map(|l| l.round().max(1.0) as u32).unwrap_or(1),
            pnl: self.pnl,
            opened_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Ids arrive as strings or numbers depending on the endpoint
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("Invalid id: {}", other))),
    }
}

/// Like [`deserialize_id`], but anything unusable is treated as absent
fn deserialize_optional_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_from_value(&Value::deserialize(deserializer)?))
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339 strings or unix timestamps (seconds or milliseconds)
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Value::Number(n)) => n.as_i64().and_then(|ts| {
            if ts > 10_000_000_000 {
                Utc.timestamp_millis_opt(ts).single()
            } else {
                Utc.timestamp_opt(ts, 0).single()
            }
        }),
        _ => None,
    })
}

/// Pull a human-readable reason out of an error body
///
/// The platform answers with `{"message": ...}` or `{"error": ...}`; anything
/// else is passed through verbatim.
pub fn server_reason(status: u16, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let reason = parsed.as_ref().and_then(|v| {
        ["message", "error", "detail"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    });

    match reason {
        Some(reason) => reason,
        None if body.trim().is_empty() => format!("HTTP {}", status),
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_challenge_accessors() {
        let challenge: Eip712Challenge = serde_json::from_value(json!({
            "domain": {"name": "Pear", "version": "1", "chainId": 42161},
            "types": {"Message": [{"name": "address", "type": "address"}]},
            "primaryType": "Message",
            "message": {"address": "0xabc", "timestamp": 1700000000}
        }))
        .unwrap();

        assert_eq!(challenge.echoed_address(), Some("0xabc"));
        assert_eq!(challenge.timestamp(), Some(&json!(1700000000)));
    }

    #[test]
    fn test_open_position_response_ids() {
        let parse = |v: Value| serde_json::from_value::<OpenPositionResponse>(v).unwrap().id();

        assert_eq!(parse(json!({"positionId": "p-1", "id": "p-1"})), Some("p-1".to_string()));
        assert_eq!(parse(json!({"orderId": 123})), Some("123".to_string()));
        assert_eq!(parse(json!({"id": "x-9", "status": "FILLED"})), Some("x-9".to_string()));
        assert_eq!(parse(json!({"positionId": null, "id": 7})), Some("7".to_string()));
        assert_eq!(parse(json!({"positionId": {"nested": true}})), None);
        assert_eq!(parse(json!({})), None);
    }

    #[test]
    fn test_open_position_request_format() {
        let request = BasketTradeRequest::new(
            vec![AssetWeight::new("BTC", 1.0)],
            vec![AssetWeight::new("ETH", 1.0)],
            20.0,
        )
        .with_leverage(4)
        .with_take_profit(12.0);

        let body = serde_json::to_value(OpenPositionRequest::market(&request)).unwrap();
        assert_eq!(body["executionType"], "MARKET");
        assert_eq!(body["slippage"], 0.08);
        assert_eq!(body["leverage"], 4);
        assert_eq!(body["longAssets"][0]["asset"], "BTC");
        assert_eq!(body["takeProfit"]["type"], "PERCENTAGE");
        assert!(body.get("stopLoss").is_none());
    }

    #[test]
    fn test_platform_position_parsing() {
        let raw = json!({
            "positionId": "abc-123",
            "longAssets": [{"coin": "btc"}, {"coin": "ETH"}],
            "shortAssets": [{"coin": "SOL"}],
            "entryPositionValue": 20.5,
            "leverage": 4,
            "unrealizedPnl": "-0.25",
            "createdAt": "2025-01-02T03:04:05Z"
        });

        let position = serde_json::from_value::<PlatformPosition>(raw)
            .unwrap()
            .into_position();

        assert_eq!(position.id, "abc-123");
        assert_eq!(position.long_asset, "BTC+ETH");
        assert_eq!(position.short_asset, "SOL");
        assert_eq!(position.notional, dec!(20.5));
        assert_eq!(position.leverage, 4);
        assert_eq!(position.pnl, dec!(-0.25));
        assert_eq!(position.opened_at.timestamp(), 1735787045);
    }

    #[test]
    fn test_platform_position_numeric_id_and_millis() {
        let raw = json!({"id": 42, "createdAt": 1735787045000i64});
        let position = serde_json::from_value::<PlatformPosition>(raw)
            .unwrap()
            .into_position();
        assert_eq!(position.id, "42");
        assert_eq!(position.opened_at.timestamp(), 1735787045);
        assert_eq!(position.leverage, 1);
    }

    #[test]
    fn test_server_reason() {
        assert_eq!(server_reason(400, r#"{"message":"Insufficient margin"}"#), "Insufficient margin");
        assert_eq!(server_reason(400, r#"{"error":"Asset not tradable"}"#), "Asset not tradable");
        assert_eq!(server_reason(500, "boom"), "boom");
        assert_eq!(server_reason(502, ""), "HTTP 502");
    }
}
