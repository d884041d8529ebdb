//! Minimal JSON-RPC 2.0 transport over HTTP
//!
//! Shared by the chain balance reader and the JSON-RPC wallet provider.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::NetworkError;

/// EIP-1193 "user rejected request"
pub const USER_REJECTED_CODE: i64 = 4001;

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client
#[derive(Debug)]
pub struct RpcTransport {
    http_client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and decode its `result`
    ///
    /// JSON-RPC level errors surface as `NetworkError::Rpc` with the original code.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, NetworkError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        debug!("JSON-RPC #{} {} -> {}", id, method, self.url);

        let response = self.http_client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Http { status, body });
        }

        let rpc_response: JsonRpcResponse = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(NetworkError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        // `null` is a legal result for methods like wallet_switchEthereumChain
        let result = rpc_response.result.unwrap_or(serde_json::Value::Null);

        serde_json::from_value(result)
            .map_err(|e| NetworkError::InvalidResponse(format!("{}: {}", method, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_call_decodes_result() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_chainId"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0xa4b1"})),
            )
            .mount(&mock_server)
            .await;

        let transport = RpcTransport::new(mock_server.uri(), Duration::from_secs(5));
        let chain: String = transport.call("eth_chainId", json!([])).await.unwrap();
        assert_eq!(chain, "0xa4b1");
    }

    #[tokio::test]
    async fn test_call_surfaces_rpc_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": 4001, "message": "User rejected the request."}
            })))
            .mount(&mock_server)
            .await;

        let transport = RpcTransport::new(mock_server.uri(), Duration::from_secs(5));
        let err = transport
            .call::<String>("eth_requestAccounts", json!([]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            NetworkError::Rpc {
                code: USER_REJECTED_CODE,
                message: "User rejected the request.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let transport = RpcTransport::new("http://127.0.0.1:9", Duration::from_secs(2));
        let err = transport
            .call::<String>("eth_chainId", json!([]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::Unreachable(_) | NetworkError::Timeout
        ));
    }
}
