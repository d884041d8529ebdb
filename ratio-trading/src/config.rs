//! Runtime configuration loaded from the environment

use ratio_core::ChainId;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::types::{ARBITRUM_RPC_URL, DEFAULT_CLIENT_ID, PEAR_API_URL};

const DEFAULT_SESSION_DB: &str = "data/session.db";
const DEFAULT_REFRESH_SECS: u64 = 30;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Platform, chain and persistence settings for a session
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    pub api_url: String,
    pub client_id: String,
    pub chain_id: ChainId,
    pub rpc_url: String,
    pub session_db_path: PathBuf,
    pub position_refresh: Duration,
    pub http_timeout: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: PEAR_API_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            chain_id: ChainId::ARBITRUM_ONE,
            rpc_url: ARBITRUM_RPC_URL.to_string(),
            session_db_path: PathBuf::from(DEFAULT_SESSION_DB),
            position_refresh: Duration::from_secs(DEFAULT_REFRESH_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl PlatformConfig {
    /// Read settings from the process environment (after `.env` loading)
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let api_url = std::env::var("PEAR_API_URL")
            .ok()
            .filter(|u| is_valid_url(u))
            .unwrap_or(defaults.api_url);

        let chain_id = std::env::var("RATIO_CHAIN_ID")
            .ok()
            .and_then(|raw| {
                raw.parse::<ChainId>()
                    .map_err(|e| warn!("Ignoring RATIO_CHAIN_ID={}: {}", raw, e))
                    .ok()
            })
            .unwrap_or(defaults.chain_id);

        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            client_id: std::env::var("PEAR_CLIENT_ID").unwrap_or(defaults.client_id),
            chain_id,
            rpc_url: std::env::var("RATIO_RPC_URL").unwrap_or(defaults.rpc_url),
            session_db_path: std::env::var("RATIO_SESSION_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_db_path),
            position_refresh: env_secs("RATIO_POSITION_REFRESH_SECS")
                .unwrap_or(defaults.position_refresh),
            http_timeout: env_secs("RATIO_HTTP_TIMEOUT_SECS").unwrap_or(defaults.http_timeout),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }

    pub fn with_session_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_db_path = path.into();
        self
    }

    pub fn with_position_refresh(mut self, interval: Duration) -> Self {
        self.position_refresh = interval;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

fn is_valid_url(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(e) => {
            warn!("Ignoring invalid PEAR_API_URL {}: {}", raw, e);
            false
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
