//! HTTP client for the trading platform API
//!
//! Bearer-authenticated JSON over HTTPS. Every call is a single attempt; the
//! caller decides whether to retry.

use async_trait::async_trait;
use ratio_core::Position;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{AgentWalletError, AuthError, NetworkError, TradeExecutionError};
use crate::types::{
    AgentWalletResponse, ClosePositionRequest, CreateAgentWalletRequest, DEFAULT_CLIENT_ID,
    Eip712Challenge, LOGIN_METHOD_EIP712, LoginDetails, LoginRequest, LoginResponse,
    OpenPositionRequest, OpenPositionResponse, PEAR_API_URL, PlatformPosition, server_reason,
};

/// Platform operations the session layer depends on
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// `GET /auth/eip712-message`
    async fn eip712_message(&self, address: &str) -> Result<Eip712Challenge, AuthError>;

    /// `POST /auth/login`
    async fn login(
        &self,
        address: &str,
        signature: &str,
        timestamp: Value,
    ) -> Result<LoginResponse, AuthError>;

    /// `GET /agentWallet`; `None` when the owner has none yet
    async fn get_agent_wallet(&self, token: &str) -> Result<Option<String>, AgentWalletError>;

    /// `POST /agentWallet`
    async fn create_agent_wallet(&self, token: &str) -> Result<String, AgentWalletError>;

    /// `GET /hl/user-state`
    async fn user_state(&self, token: &str) -> Result<Value, NetworkError>;

    /// `POST /positions`
    async fn open_position(
        &self,
        token: &str,
        request: &OpenPositionRequest,
    ) -> Result<OpenPositionResponse, TradeExecutionError>;

    /// `GET /positions`
    async fn positions(&self, token: &str) -> Result<Vec<Position>, NetworkError>;

    /// `DELETE /positions/{id}`, optionally for a fraction of the position
    async fn close_position(
        &self,
        token: &str,
        position_id: &str,
        percentage: Option<f64>,
    ) -> Result<(), TradeExecutionError>;
}

/// `GET /positions` answers with a bare list or a wrapped one
#[derive(Deserialize)]
#[serde(untagged)]
enum PositionsEnvelope {
    List(Vec<PlatformPosition>),
    Wrapped { positions: Vec<PlatformPosition> },
}

/// Pear Protocol client
#[derive(Debug, Clone)]
pub struct PearClient {
    http_client: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl PearClient {
    pub fn new(client_id: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent("ratio-session/0.1")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            base_url: PEAR_API_URL.to_string(),
            client_id: client_id.into(),
        }
    }

    /// Point the client at a different deployment (or a mock server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Split a response into its status and body for non-2xx handling
    async fn failure(response: Response) -> (u16, String) {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }
}

impl Default for PearClient {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_ID, Duration::from_secs(30))
    }
}

#[async_trait]
impl PlatformApi for PearClient {
    async fn eip712_message(&self, address: &str) -> Result<Eip712Challenge, AuthError> {
        debug!("Fetching EIP-712 challenge for {}", address);

        let response = self
            .http_client
            .get(self.url("/auth/eip712-message"))
            .query(&[("address", address), ("clientId", self.client_id.as_str())])
            .send()
            .await
            .map_err(NetworkError::from)?;

        if !response.status().is_success() {
            let (status, body) = Self::failure(response).await;
            error!("Challenge request failed: {} - {}", status, body);
            return Err(AuthError::ServerRejected(server_reason(status, &body)));
        }

        let body: Value = response.json().await.map_err(NetworkError::from)?;
        serde_json::from_value(body).map_err(|e| AuthError::MalformedChallenge(e.to_string()))
    }

    async fn login(
        &self,
        address: &str,
        signature: &str,
        timestamp: Value,
    ) -> Result<LoginResponse, AuthError> {
        let request = LoginRequest {
            method: LOGIN_METHOD_EIP712,
            address: address.to_string(),
            client_id: self.client_id.clone(),
            details: LoginDetails {
                signature: signature.to_string(),
                timestamp,
            },
        };

        info!("Submitting login for {}", address);

        let response = self
            .http_client
            .post(self.url("/auth/login"))
            .json(&request)
            .send()
            .await
            .map_err(NetworkError::from)?;

        if !response.status().is_success() {
            let (status, body) = Self::failure(response).await;
            warn!("Login rejected: {} - {}", status, body);
            return Err(AuthError::ServerRejected(server_reason(status, &body)));
        }

        let login: LoginResponse = response.json().await.map_err(NetworkError::from)?;
        if login.access_token.is_empty() {
            return Err(AuthError::ServerRejected(
                "Login response carried no access token".to_string(),
            ));
        }
        Ok(login)
    }

    async fn get_agent_wallet(&self, token: &str) -> Result<Option<String>, AgentWalletError> {
        let response = self
            .http_client
            .get(self.url("/agentWallet"))
            .bearer_auth(token)
            .query(&[("clientId", self.client_id.as_str())])
            .send()
            .await
            .map_err(NetworkError::from)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                info!("No agent wallet found");
                return Ok(None);
            }
            StatusCode::UNAUTHORIZED => return Err(AgentWalletError::Unauthorized),
            status if !status.is_success() => {
                let (status, body) = Self::failure(response).await;
                error!("Agent wallet lookup failed: {} - {}", status, body);
                return Err(NetworkError::Http { status, body }.into());
            }
            _ => {}
        }

        let wallet: AgentWalletResponse = response.json().await.map_err(NetworkError::from)?;
        let address = wallet.agent_wallet_address.filter(|a| !a.is_empty());
        if let Some(address) = &address {
            info!("Agent wallet found: {}", address);
        }
        Ok(address)
    }

    async fn create_agent_wallet(&self, token: &str) -> Result<String, AgentWalletError> {
        info!("Creating new agent wallet");

        let response = self
            .http_client
            .post(self.url("/agentWallet"))
            .bearer_auth(token)
            .json(&CreateAgentWalletRequest {
                client_id: self.client_id.clone(),
            })
            .send()
            .await
            .map_err(NetworkError::from)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AgentWalletError::Unauthorized);
        }
        if !response.status().is_success() {
            let (status, body) = Self::failure(response).await;
            error!("Agent wallet creation failed: {} - {}", status, body);
            return Err(AgentWalletError::CreationFailed(server_reason(status, &body)));
        }

        let wallet: AgentWalletResponse = response.json().await.map_err(NetworkError::from)?;
        let address = wallet
            .agent_wallet_address
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                AgentWalletError::CreationFailed("Response carried no agent wallet address".to_string())
            })?;

        info!("Agent wallet created: {}", address);
        Ok(address)
    }

    async fn user_state(&self, token: &str) -> Result<Value, NetworkError> {
        debug!("Fetching user state");

        let response = self
            .http_client
            .get(self.url("/hl/user-state"))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = Self::failure(response).await;
            return Err(NetworkError::Http { status, body });
        }

        Ok(response.json().await?)
    }

    async fn open_position(
        &self,
        token: &str,
        request: &OpenPositionRequest,
    ) -> Result<OpenPositionResponse, TradeExecutionError> {
        info!(
            "Opening ${} x{} basket: {} long / {} short",
            request.usd_value,
            request.leverage,
            request.long_assets.len(),
            request.short_assets.len()
        );

        let response = self
            .http_client
            .post(self.url("/positions"))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(NetworkError::from)?;

        if !response.status().is_success() {
            let (status, body) = Self::failure(response).await;
            error!("Trade rejected: {} - {}", status, body);
            return Err(TradeExecutionError::ServerRejected(server_reason(status, &body)));
        }

        // Some deployments answer 201 with an empty body
        let body = response.text().await.map_err(NetworkError::from)?;
        if body.trim().is_empty() {
            return Ok(OpenPositionResponse::default());
        }
        // The order is placed once the status is 2xx; an odd body must not turn it into a failure
        match serde_json::from_str(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!("Unreadable open position response ({}): {}", e, body);
                Ok(OpenPositionResponse::default())
            }
        }
    }

    async fn positions(&self, token: &str) -> Result<Vec<Position>, NetworkError> {
        debug!("Fetching positions");

        let response = self
            .http_client
            .get(self.url("/positions"))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = Self::failure(response).await;
            return Err(NetworkError::Http { status, body });
        }

        let envelope: PositionsEnvelope = response.json().await?;
        let positions = match envelope {
            PositionsEnvelope::List(list) | PositionsEnvelope::Wrapped { positions: list } => list,
        };

        Ok(positions
            .into_iter()
            .map(PlatformPosition::into_position)
            .collect())
    }

    async fn close_position(
        &self,
        token: &str,
        position_id: &str,
        percentage: Option<f64>,
    ) -> Result<(), TradeExecutionError> {
        info!("Closing position {} ({:?})", position_id, percentage);

        let mut request = self
            .http_client
            .delete(self.url(&format!("/positions/{}", position_id)))
            .bearer_auth(token);

        if let Some(percentage) = percentage.filter(|p| *p < 1.0) {
            request = request.json(&ClosePositionRequest { percentage });
        }

        let response = request.send().await.map_err(NetworkError::from)?;

        if !response.status().is_success() {
            let (status, body) = Self::failure(response).await;
            error!("Close rejected: {} - {}", status, body);
            return Err(TradeExecutionError::ServerRejected(server_reason(status, &body)));
        }

        Ok(())
    }
}
