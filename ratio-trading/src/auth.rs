//! EIP-712 challenge/response login
//!
//! `UNAUTHENTICATED -> CHALLENGE_REQUESTED -> SIGNING -> LOGIN_SUBMITTED -> AUTHENTICATED`.
//! Any failing step drops back to `UNAUTHENTICATED` and nothing from the
//! failed attempt is cached.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::PlatformApi;
use crate::eip712::TypedDataRequest;
use crate::error::{AuthError, Result, SessionError, StoreError};
use crate::store::{self, SessionStore, owner_scope};
use crate::types::DEFAULT_TOKEN_TTL_SECS;
use crate::wallet::{WalletConnector, WalletSession, owner_key};

/// Characters of a token that may appear in logs
const TOKEN_PREVIEW_LEN: usize = 12;

/// Source of "now"; swapped out in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Bearer token issued by the platform
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    /// Lowercase address the token was issued to
    pub subject_address: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Valid strictly before `expires_at`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_for(&self, owner: &str) -> bool {
        self.subject_address == owner_scope(owner)
    }

    /// Log-safe prefix of the token
    pub fn preview(&self) -> String {
        let prefix: String = self.token.chars().take(TOKEN_PREVIEW_LEN).collect();
        format!("{}...", prefix)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &self.preview())
            .field("subject_address", &self.subject_address)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthState {
    Unauthenticated,
    ChallengeRequested,
    Signing,
    LoginSubmitted,
    Authenticated,
}

/// Drives the login handshake and owns the token cache
pub struct SessionAuthenticator {
    platform: Arc<dyn PlatformApi>,
    store: Arc<dyn SessionStore>,
    state: RwLock<AuthState>,
    tokens: RwLock<HashMap<String, AuthToken>>,
    flight: Mutex<()>,
    clock: Clock,
}

impl SessionAuthenticator {
    pub fn new(platform: Arc<dyn PlatformApi>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            platform,
            store,
            state: RwLock::new(AuthState::Unauthenticated),
            tokens: RwLock::new(HashMap::new()),
            flight: Mutex::new(()),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn state(&self) -> AuthState {
        *self.state.read()
    }

    fn set_state(&self, state: AuthState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!("Auth state {:?} -> {:?}", previous, state);
        }
    }

    /// Return a valid token for the connected wallet, running the handshake if needed
    ///
    /// No-op while a non-expired token is cached for the current address.
    pub async fn authenticate(&self, wallet: &WalletConnector) -> Result<AuthToken> {
        let session = wallet.session().ok_or(SessionError::NotConnected)?;
        let owner = session.owner();

        // One handshake at a time; late arrivals reuse the winner's token
        let _flight = self.flight.lock().await;

        if let Some(token) = self.current_token(&owner)? {
            debug!("Reusing token {} for {}", token.preview(), owner);
            self.set_state(AuthState::Authenticated);
            return Ok(token);
        }

        match self.handshake(wallet, &session).await {
            Ok(token) => Ok(token),
            Err(e) => {
                self.set_state(AuthState::Unauthenticated);
                if matches!(e, SessionError::Auth(AuthError::ServerRejected(_))) {
                    self.discard(&owner)?;
                }
                warn!("Authentication failed for {}: {}", owner, e);
                Err(e)
            }
        }
    }

    async fn handshake(&self, wallet: &WalletConnector, session: &WalletSession) -> Result<AuthToken> {
        let owner = session.owner();
        info!("Starting EIP-712 login for {}", owner);

        self.set_state(AuthState::ChallengeRequested);
        let challenge = self.platform.eip712_message(&owner).await?;
        let timestamp = challenge.timestamp().cloned().ok_or_else(|| {
            AuthError::MalformedChallenge("challenge message has no timestamp".to_string())
        })?;

        self.set_state(AuthState::Signing);
        let typed_data = TypedDataRequest::from_challenge(&challenge);
        let signature = wallet.sign_typed_data(&typed_data).await?;

        self.set_state(AuthState::LoginSubmitted);
        let login_address = challenge
            .echoed_address()
            .map(str::to_lowercase)
            .unwrap_or_else(|| owner.clone());
        let login = self
            .platform
            .login(&login_address, &signature, timestamp)
            .await?;

        let lifetime = login.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        if lifetime <= 0 {
            return Err(AuthError::ServerRejected(format!(
                "token lifetime must be positive, got {}",
                lifetime
            ))
            .into());
        }

        let issued_at = self.now();
        let token = AuthToken {
            token: login.access_token,
            subject_address: owner.clone(),
            issued_at,
            expires_at: issued_at + Duration::seconds(lifetime),
        };

        // The wallet moved on while we were waiting; this token belongs to nobody
        if wallet.address().map(|a| owner_key(&a)).as_deref() != Some(owner.as_str()) {
            warn!("Discarding login for {}: wallet changed mid-flight", owner);
            return Err(SessionError::SessionChanged { started: owner });
        }

        store::save_token(self.store.as_ref(), &token)?;
        self.tokens.write().insert(owner.clone(), token.clone());

        // An account switch can land while the token is being written
        if wallet.address().map(|a| owner_key(&a)).as_deref() != Some(owner.as_str()) {
            warn!("Dropping saved login for {}: wallet changed while persisting", owner);
            self.discard(&owner)?;
            return Err(SessionError::SessionChanged { started: owner });
        }
        self.set_state(AuthState::Authenticated);

        info!(
            "Authenticated {} (token {}, expires {})",
            owner,
            token.preview(),
            token.expires_at
        );
        Ok(token)
    }

    /// Non-expired token for `owner`, from memory or the store
    ///
    /// Expired tokens found on the way are deleted, not just skipped.
    pub fn current_token(&self, owner: &str) -> std::result::Result<Option<AuthToken>, StoreError> {
        let owner = owner_scope(owner);
        let now = self.now();

        let cached = self.tokens.read().get(&owner).cloned();
        if let Some(token) = cached {
            if token.is_valid_at(now) {
                return Ok(Some(token));
            }
            info!("Token {} for {} expired at {}", token.preview(), owner, token.expires_at);
            self.discard(&owner)?;
            return Ok(None);
        }

        let stored = match store::load_token(self.store.as_ref(), &owner) {
            Ok(stored) => stored,
            Err(StoreError::Corrupt { key, value }) => {
                warn!("Dropping corrupt {} for {}: {}", key, owner, value);
                store::clear_token(self.store.as_ref(), &owner)?;
                None
            }
            Err(e) => return Err(e),
        };

        match stored {
            Some(token) if token.is_valid_at(now) => {
                self.tokens.write().insert(owner, token.clone());
                Ok(Some(token))
            }
            Some(token) => {
                info!("Stored token for {} expired at {}", owner, token.expires_at);
                store::clear_token(self.store.as_ref(), &owner)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Reload a persisted token after a restart, without touching the network
    pub fn restore(&self, owner: &str) -> std::result::Result<Option<AuthToken>, StoreError> {
        let token = self.current_token(owner)?;
        match &token {
            Some(token) => {
                info!("Restored token {} for {}", token.preview(), token.subject_address);
                self.set_state(AuthState::Authenticated);
            }
            None => self.set_state(AuthState::Unauthenticated),
        }
        Ok(token)
    }

    /// Forget everything cached for `owner` (disconnect, account switch, 401)
    pub fn invalidate(&self, owner: &str) -> std::result::Result<(), StoreError> {
        self.discard(&owner_scope(owner))?;
        self.set_state(AuthState::Unauthenticated);
        info!("Invalidated session token for {}", owner_scope(owner));
        Ok(())
    }

    fn discard(&self, owner: &str) -> std::result::Result<(), StoreError> {
        self.tokens.write().remove(owner);
        store::clear_token(self.store.as_ref(), owner)
    }
}
