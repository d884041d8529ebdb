//! Agent wallet lifecycle
//!
//! The agent is a delegated trading identity created on the platform and
//! approved by the user on the exchange, out of band. Approval can only be
//! observed indirectly: a privileged read that succeeds is taken as ACTIVE.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::AuthToken;
use crate::client::PlatformApi;
use crate::error::{Result, StoreError};
use crate::store::{SessionStore, StoreKey, owner_scope};
use crate::types::AGENT_APPROVAL_URL;

/// Ordered so that `max` is the only legal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    NotFound,
    PendingApproval,
    Active,
}

impl AgentStatus {
    /// Fold an observation in; never moves backwards
    pub fn advance(self, observed: AgentStatus) -> AgentStatus {
        self.max(observed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWallet {
    pub address: String,
    pub owner_address: String,
    pub status: AgentStatus,
}

impl AgentWallet {
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// What the user needs to approve the agent on the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalReference {
    pub agent_address: String,
    pub url: String,
    pub message: String,
}

type Slot = Arc<Mutex<Option<AgentWallet>>>;

/// Creates or discovers one agent wallet per owner and tracks its approval
pub struct AgentWalletManager {
    platform: Arc<dyn PlatformApi>,
    store: Arc<dyn SessionStore>,
    slots: DashMap<String, Slot>,
}

impl AgentWalletManager {
    pub fn new(platform: Arc<dyn PlatformApi>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            platform,
            store,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, owner: &str) -> Slot {
        self.slots
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// An invalidation replaces the slot; results for the old one are dropped
    fn is_current(&self, owner: &str, slot: &Slot) -> bool {
        self.slots
            .get(owner)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    /// Agent wallet for the token's owner, creating it on first use
    ///
    /// Concurrent callers for one owner wait for the first call's result
    /// instead of issuing a second creation.
    pub async fn ensure_agent_wallet(&self, token: &AuthToken) -> Result<AgentWallet> {
        let owner = owner_scope(&token.subject_address);
        let slot = self.slot(&owner);
        let mut guard = slot.lock().await;

        if let Some(wallet) = guard.as_ref() {
            debug!("Agent wallet for {} cached as {:?}", owner, wallet.status);
            return Ok(wallet.clone());
        }

        let wallet = match self.platform.get_agent_wallet(&token.token).await? {
            Some(address) => {
                let status = self.probe(token).await;
                AgentWallet {
                    address,
                    owner_address: owner.clone(),
                    status,
                }
            }
            None => {
                let address = self.platform.create_agent_wallet(&token.token).await?;
                AgentWallet {
                    address,
                    owner_address: owner.clone(),
                    status: AgentStatus::PendingApproval,
                }
            }
        };

        if !self.is_current(&owner, &slot) {
            warn!("Agent wallet for {} resolved after invalidation; not caching", owner);
            return Ok(wallet);
        }

        self.store.set(&owner, StoreKey::AgentWallet, &wallet.address)?;
        *guard = Some(wallet.clone());

        info!("Agent wallet {} for {} is {:?}", wallet.address, owner, wallet.status);
        Ok(wallet)
    }

    /// Re-probe approval now ("check status")
    ///
    /// The cached status only moves forward; a failed probe after ACTIVE is ignored.
    pub async fn check_status(&self, token: &AuthToken) -> Result<AgentWallet> {
        let owner = owner_scope(&token.subject_address);
        let slot = self.slot(&owner);
        let mut guard = slot.lock().await;

        let Some(mut wallet) = guard.clone() else {
            drop(guard);
            return self.ensure_agent_wallet(token).await;
        };

        let observed = self.probe(token).await;
        let status = wallet.status.advance(observed);
        if status != wallet.status {
            info!("Agent wallet {} is now {:?}", wallet.address, status);
        }
        wallet.status = status;

        if self.is_current(&owner, &slot) {
            *guard = Some(wallet.clone());
        }
        Ok(wallet)
    }

    /// Privileged read used as the approval signal; failure means "not yet"
    async fn probe(&self, token: &AuthToken) -> AgentStatus {
        match self.platform.user_state(&token.token).await {
            Ok(_) => AgentStatus::Active,
            Err(e) => {
                debug!("Approval probe failed, treating as pending: {}", e);
                AgentStatus::PendingApproval
            }
        }
    }

    pub fn get_approval_reference(&self, wallet: &AgentWallet) -> ApprovalReference {
        ApprovalReference {
            agent_address: wallet.address.clone(),
            url: AGENT_APPROVAL_URL.to_string(),
            message: format!(
                "Authorize agent wallet {} for {} in the exchange's API settings, then check status again.",
                wallet.address, wallet.owner_address
            ),
        }
    }

    /// Cached wallet, if any and not mid-resolution
    pub fn cached(&self, owner: &str) -> Option<AgentWallet> {
        let slot = self.slots.get(&owner_scope(owner))?.value().clone();
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }

    /// Reload the persisted agent address after a restart
    ///
    /// Approval is never persisted, so a restored wallet is PENDING_APPROVAL
    /// until the next explicit check.
    pub fn restore(&self, owner: &str) -> std::result::Result<Option<AgentWallet>, StoreError> {
        let owner = owner_scope(owner);
        let Some(address) = self.store.get(&owner, StoreKey::AgentWallet)? else {
            return Ok(None);
        };

        let wallet = AgentWallet {
            address,
            owner_address: owner.clone(),
            status: AgentStatus::PendingApproval,
        };

        let slot = self.slot(&owner);
        if let Ok(mut guard) = slot.try_lock() {
            if guard.is_none() {
                *guard = Some(wallet.clone());
                info!("Restored agent wallet {} for {}", wallet.address, owner);
            }
        }
        Ok(Some(wallet))
    }

    /// Drop the local pointer for `owner`; the server-side agent is untouched
    pub fn invalidate(&self, owner: &str) -> std::result::Result<(), StoreError> {
        let owner = owner_scope(owner);
        self.slots.remove(&owner);
        self.store.clear(&owner, StoreKey::AgentWallet)?;
        debug!("Invalidated agent wallet cache for {}", owner);
        Ok(())
    }
}
