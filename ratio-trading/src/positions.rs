//! Position refresh and interval polling
//!
//! Refresh is a one-shot read of `GET /positions` published to a shared
//! [`PositionBook`]. The poller repeats it (plus a balance read) on a fixed
//! interval and keeps the last known values when a tick fails.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use ratio_core::Position;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::auth::{AuthToken, SessionAuthenticator};
use crate::balance::{TokenAmount, TokenContract};
use crate::client::PlatformApi;
use crate::error::NetworkError;
use crate::wallet::WalletConnector;

/// Last known positions and balance for the connected owner
pub struct PositionBook {
    positions: watch::Sender<Vec<Position>>,
    balance: watch::Sender<Option<TokenAmount>>,
    refreshed_at: RwLock<Option<DateTime<Utc>>>,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self {
            positions: watch::Sender::new(Vec::new()),
            balance: watch::Sender::new(None),
            refreshed_at: RwLock::new(None),
        }
    }
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Position>> {
        self.positions.subscribe()
    }

    pub fn publish(&self, positions: Vec<Position>) {
        self.positions.send_replace(positions);
        *self.refreshed_at.write() = Some(Utc::now());
    }

    pub fn balance(&self) -> Option<TokenAmount> {
        *self.balance.borrow()
    }

    pub fn publish_balance(&self, amount: TokenAmount) {
        self.balance.send_replace(Some(amount));
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        *self.refreshed_at.read()
    }

    /// Forget everything (session teardown)
    pub fn clear(&self) {
        self.positions.send_replace(Vec::new());
        self.balance.send_replace(None);
        *self.refreshed_at.write() = None;
    }
}

/// Fetch positions and publish them to `book`
pub async fn refresh_positions(
    platform: &dyn PlatformApi,
    token: &AuthToken,
    book: &PositionBook,
) -> Result<Vec<Position>, NetworkError> {
    let positions = platform.positions(&token.token).await?;
    debug!("Refreshed {} positions for {}", positions.len(), token.subject_address);
    book.publish(positions.clone());
    Ok(positions)
}

/// Balance to read on each poll tick
#[derive(Clone)]
pub struct BalanceWatch {
    pub connector: Arc<WalletConnector>,
    pub address: Address,
    pub token: Option<TokenContract>,
}

/// Background refresh task; aborted on [`stop`](Self::stop) or drop
pub struct PositionPoller {
    owner: String,
    handle: JoinHandle<()>,
}

impl PositionPoller {
    /// Start polling every `period` for `owner`
    ///
    /// Each tick asks the authenticator for the owner's current token, so a
    /// re-login is picked up without restarting; ticks without a valid token
    /// are skipped.
    pub fn spawn(
        owner: String,
        platform: Arc<dyn PlatformApi>,
        auth: Arc<SessionAuthenticator>,
        book: Arc<PositionBook>,
        balance: Option<BalanceWatch>,
        period: Duration,
    ) -> Self {
        info!("Starting position polling for {} every {:?}", owner, period);

        let task_owner = owner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                poll_once(&task_owner, platform.as_ref(), &auth, &book, balance.as_ref()).await;
            }
        });

        Self { owner, handle }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for PositionPoller {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("Stopped position polling for {}", self.owner);
    }
}

async fn poll_once(
    owner: &str,
    platform: &dyn PlatformApi,
    auth: &SessionAuthenticator,
    book: &PositionBook,
    balance: Option<&BalanceWatch>,
) {
    let token = match auth.current_token(owner) {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!("No valid token for {}, skipping poll tick", owner);
            return;
        }
        Err(e) => {
            warn!("Token lookup failed for {}: {}", owner, e);
            return;
        }
    };

    if let Err(e) = refresh_positions(platform, &token, book).await {
        warn!("Position refresh failed for {}, keeping last known: {}", owner, e);
    }

    if let Some(watch) = balance {
        match watch.connector.get_balance(watch.address, watch.token.as_ref()).await {
            Ok(amount) => book.publish_balance(amount),
            Err(e) => warn!("Balance refresh failed for {}, keeping last known: {}", owner, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, MemorySessionStore};
    use crate::testing::FakePlatform;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;

    const OWNER: &str = "0xabababababababababababababababababababab";

    fn position(id: &str) -> Position {
        Position {
            id: id.to_string(),
            long_asset: "BTC".to_string(),
            short_asset: "ETH".to_string(),
            notional: Decimal::from(20),
            leverage: 2,
            pnl: Decimal::ZERO,
            opened_at: Utc::now(),
        }
    }

    fn authenticated(platform: &Arc<FakePlatform>) -> Arc<SessionAuthenticator> {
        let store = Arc::new(MemorySessionStore::new());
        store::save_token(
            store.as_ref(),
            &AuthToken {
                token: "T1".to_string(),
                subject_address: OWNER.to_string(),
                issued_at: Utc::now(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            },
        )
        .unwrap();
        Arc::new(SessionAuthenticator::new(platform.clone(), store))
    }

    #[tokio::test]
    async fn test_refresh_publishes() {
        let platform = FakePlatform::new();
        platform.positions.lock().push(position("p-1"));
        let book = PositionBook::new();
        let mut updates = book.subscribe();
        let token = authenticated(&platform).current_token(OWNER).unwrap().unwrap();

        let positions = refresh_positions(platform.as_ref(), &token, &book).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update()[0].id, "p-1");
        assert!(book.refreshed_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ticks_and_stops() {
        let platform = FakePlatform::new();
        let book = Arc::new(PositionBook::new());
        let poller = PositionPoller::spawn(
            OWNER.to_string(),
            platform.clone(),
            authenticated(&platform),
            book.clone(),
            None,
            Duration::from_secs(30),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(platform.count(|c| &c.positions), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(platform.count(|c| &c.positions), 2);

        poller.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(platform.count(|c| &c.positions), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_last_known() {
        let platform = FakePlatform::new();
        platform.positions.lock().push(position("p-1"));
        let book = Arc::new(PositionBook::new());
        let _poller = PositionPoller::spawn(
            OWNER.to_string(),
            platform.clone(),
            authenticated(&platform),
            book.clone(),
            None,
            Duration::from_secs(30),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(book.positions().len(), 1);

        *platform.fail_positions.lock() = true;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(platform.count(|c| &c.positions), 2);
        assert_eq!(book.positions()[0].id, "p-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_without_token_are_skipped() {
        let platform = FakePlatform::new();
        let auth = Arc::new(SessionAuthenticator::new(
            platform.clone(),
            Arc::new(MemorySessionStore::new()),
        ));
        let _poller = PositionPoller::spawn(
            OWNER.to_string(),
            platform.clone(),
            auth,
            Arc::new(PositionBook::new()),
            None,
            Duration::from_secs(30),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(platform.calls.total(), 0);
    }
}
