//! Balance queries via direct chain JSON-RPC
//!
//! Native balance through `eth_getBalance`, fungible-token balance through an
//! `eth_call` to the ERC20 `balanceOf(address)` function. No indexer, no retry.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::NetworkError;
use crate::rpc::RpcTransport;

/// ERC20 function selector for balanceOf(address)
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Native currency decimals (ETH on Arbitrum)
pub const NATIVE_DECIMALS: u8 = 18;

/// USDC has 6 decimals
pub const USDC_DECIMALS: u8 = 6;

/// A fungible token to read a balance for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenContract {
    pub address: Address,
    pub decimals: u8,
}

impl TokenContract {
    pub fn new(address: Address, decimals: u8) -> Self {
        Self { address, decimals }
    }
}

/// Raw on-chain amount with its decimals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub raw: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }
}

impl fmt::Display for TokenAmount {
    /// Human-readable amount with trailing zeros trimmed, e.g. `1.5` or `100.00`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let divisor = U256::from(10u64).pow(U256::from(self.decimals));
        let whole = self.raw / divisor;
        let fraction = self.raw % divisor;

        if fraction.is_zero() {
            return write!(f, "{}.00", whole);
        }

        let padded = format!("{:0>width$}", fraction.to_string(), width = self.decimals as usize);
        write!(f, "{}.{}", whole, padded.trim_end_matches('0'))
    }
}

/// Direct chain RPC reader
#[derive(Debug)]
pub struct ChainRpc {
    transport: RpcTransport,
}

impl ChainRpc {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport: RpcTransport::new(rpc_url, timeout),
        }
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// Balance of `address`: native currency when `token` is `None`, otherwise the token's
    pub async fn get_balance(
        &self,
        address: Address,
        token: Option<&TokenContract>,
    ) -> Result<TokenAmount, NetworkError> {
        match token {
            None => self.native_balance(address).await,
            Some(token) => self.token_balance(address, token).await,
        }
    }

    async fn native_balance(&self, address: Address) -> Result<TokenAmount, NetworkError> {
        debug!("eth_getBalance for {}", address);

        let result: String = self
            .transport
            .call("eth_getBalance", json!([address.to_checksum(None), "latest"]))
            .await?;

        Ok(TokenAmount::new(parse_uint256(&result)?, NATIVE_DECIMALS))
    }

    async fn token_balance(
        &self,
        address: Address,
        token: &TokenContract,
    ) -> Result<TokenAmount, NetworkError> {
        let data = format!("0x{}{}", BALANCE_OF_SELECTOR, pad_address(&address));
        debug!("balanceOf via eth_call to {}: {}", token.address, data);

        let result: String = self
            .transport
            .call(
                "eth_call",
                json!([
                    { "to": token.address.to_checksum(None), "data": data },
                    "latest"
                ]),
            )
            .await?;

        Ok(TokenAmount::new(parse_uint256(&result)?, token.decimals))
    }
}

/// Pad an address to 32 bytes (64 hex chars)
fn pad_address(address: &Address) -> String {
    format!("{:0>64}", hex::encode(address.as_slice()))
}

/// Parse a hex quantity as U256
fn parse_uint256(hex: &str) -> Result<U256, NetworkError> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);

    // Handle empty or zero result
    if hex.is_empty() || hex.chars().all(|c| c == '0') {
        return Ok(U256::ZERO);
    }

    U256::from_str_radix(hex, 16)
        .map_err(|e| NetworkError::InvalidResponse(format!("Failed to parse uint256: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HOLDER: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bE00";
    const USDC: &str = "0xaf88d065e77c8cC2239327C5EDb3A432268e5831";

    #[test]
    fn test_pad_address() {
        let padded = pad_address(&HOLDER.parse().unwrap());
        assert_eq!(padded.len(), 64);
        assert!(padded.starts_with("000000000000000000000000742d35cc"));
    }

    #[test]
    fn test_parse_uint256() {
        assert_eq!(parse_uint256("0x0").unwrap(), U256::ZERO);
        assert_eq!(parse_uint256("0x").unwrap(), U256::ZERO);
        assert_eq!(parse_uint256("0x1").unwrap(), U256::from(1));
        assert_eq!(parse_uint256("0x0f4240").unwrap(), U256::from(1_000_000u64));
        assert!(parse_uint256("0xzz").is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(TokenAmount::new(U256::ZERO, USDC_DECIMALS).to_string(), "0.00");
        assert_eq!(TokenAmount::new(U256::from(1_000_000u64), USDC_DECIMALS).to_string(), "1.00");
        assert_eq!(TokenAmount::new(U256::from(1_500_000u64), USDC_DECIMALS).to_string(), "1.5");
        assert_eq!(TokenAmount::new(U256::from(1_000_001u64), USDC_DECIMALS).to_string(), "1.000001");
        assert_eq!(
            TokenAmount::new(U256::from(250_000_000_000_000_000u64), NATIVE_DECIMALS).to_string(),
            "0.25"
        );
    }

    #[tokio::test]
    async fn test_native_balance() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "eth_getBalance"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": "0xde0b6b3a7640000"
            })))
            .mount(&mock_server)
            .await;

        let rpc = ChainRpc::new(mock_server.uri(), Duration::from_secs(5));
        let balance = rpc.get_balance(HOLDER.parse().unwrap(), None).await.unwrap();
        assert_eq!(balance.to_string(), "1.00");
        assert_eq!(balance.decimals, NATIVE_DECIMALS);
    }

    #[tokio::test]
    async fn test_token_balance() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "eth_call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x0000000000000000000000000000000000000000000000000000000001312d00"
            })))
            .mount(&mock_server)
            .await;

        let rpc = ChainRpc::new(mock_server.uri(), Duration::from_secs(5));
        let usdc = TokenContract::new(USDC.parse().unwrap(), USDC_DECIMALS);
        let balance = rpc
            .get_balance(HOLDER.parse().unwrap(), Some(&usdc))
            .await
            .unwrap();
        assert_eq!(balance.raw, U256::from(20_000_000u64));
        assert_eq!(balance.to_string(), "20.00");
    }

    #[tokio::test]
    async fn test_rpc_failure_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let rpc = ChainRpc::new(mock_server.uri(), Duration::from_secs(5));
        let err = rpc.get_balance(HOLDER.parse().unwrap(), None).await.unwrap_err();
        assert!(matches!(err, NetworkError::Http { status: 503, .. }));
    }
}
