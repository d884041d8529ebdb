//! Persisted session store
//!
//! A durable key-value surface scoped by owner address. Three keys matter per
//! owner: the bearer token, its expiry and the agent-wallet address. Writes are
//! last-writer-wins per key; owners never interact.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::auth::AuthToken;
use crate::error::StoreError;

/// Keys stored per owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Token,
    TokenIssuedAt,
    TokenExpiresAt,
    AgentWallet,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Token => "token",
            StoreKey::TokenIssuedAt => "token_issued_at",
            StoreKey::TokenExpiresAt => "token_expires_at",
            StoreKey::AgentWallet => "agent_wallet",
        }
    }

    pub const ALL: [StoreKey; 4] = [
        StoreKey::Token,
        StoreKey::TokenIssuedAt,
        StoreKey::TokenExpiresAt,
        StoreKey::AgentWallet,
    ];
}

/// Owner scope: addresses are compared case-insensitively
pub fn owner_scope(owner: &str) -> String {
    owner.trim().to_lowercase()
}

/// Durable key-value store for session state
pub trait SessionStore: Send + Sync {
    fn get(&self, owner: &str, key: StoreKey) -> Result<Option<String>, StoreError>;

    fn set(&self, owner: &str, key: StoreKey, value: &str) -> Result<(), StoreError>;

    fn clear(&self, owner: &str, key: StoreKey) -> Result<(), StoreError>;

    /// Drop every key for `owner`
    fn clear_owner(&self, owner: &str) -> Result<(), StoreError> {
        for key in StoreKey::ALL {
            self.clear(owner, key)?;
        }
        Ok(())
    }
}

// ============================================================================
// Typed helpers
// ============================================================================

/// Load the cached token for `owner`, whether or not it has expired
pub fn load_token(store: &dyn SessionStore, owner: &str) -> Result<Option<AuthToken>, StoreError> {
    let Some(token) = store.get(owner, StoreKey::Token)? else {
        return Ok(None);
    };
    let Some(expires_at) = store.get(owner, StoreKey::TokenExpiresAt)? else {
        // A token without an expiry cannot be validated
        return Ok(None);
    };

    let expires_at = parse_timestamp(StoreKey::TokenExpiresAt, &expires_at)?;
    let issued_at = match store.get(owner, StoreKey::TokenIssuedAt)? {
        Some(raw) => parse_timestamp(StoreKey::TokenIssuedAt, &raw)?,
        None => expires_at - chrono::Duration::seconds(1),
    };

    Ok(Some(AuthToken {
        token,
        subject_address: owner_scope(owner),
        issued_at,
        expires_at,
    }))
}

/// Persist a token under its subject address
pub fn save_token(store: &dyn SessionStore, token: &AuthToken) -> Result<(), StoreError> {
    let owner = token.subject_address.as_str();
    store.set(owner, StoreKey::Token, &token.token)?;
    store.set(owner, StoreKey::TokenIssuedAt, &token.issued_at.timestamp().to_string())?;
    store.set(owner, StoreKey::TokenExpiresAt, &token.expires_at.timestamp().to_string())?;
    Ok(())
}

/// Remove the token keys for `owner`
pub fn clear_token(store: &dyn SessionStore, owner: &str) -> Result<(), StoreError> {
    store.clear(owner, StoreKey::Token)?;
    store.clear(owner, StoreKey::TokenIssuedAt)?;
    store.clear(owner, StoreKey::TokenExpiresAt)?;
    Ok(())
}

fn parse_timestamp(key: StoreKey, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    raw.parse::<i64>()
        .ok()
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .ok_or_else(|| StoreError::Corrupt {
            key: key.as_str(),
            value: raw.to_string(),
        })
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store (tests, ephemeral sessions)
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<(String, StoreKey), String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, owner: &str, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(&(owner_scope(owner), key)).cloned())
    }

    fn set(&self, owner: &str, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert((owner_scope(owner), key), value.to_string());
        Ok(())
    }

    fn clear(&self, owner: &str, key: StoreKey) -> Result<(), StoreError> {
        self.entries.write().remove(&(owner_scope(owner), key));
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// Session store backed by a SQLite file
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `db_path`
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Create an in-memory store (useful for testing)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockError)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session_kv (
                owner TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now')),
                PRIMARY KEY (owner, key)
            );
            "#,
        )?;

        Ok(())
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, owner: &str, key: StoreKey) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockError)?;

        let value = conn
            .query_row(
                "SELECT value FROM session_kv WHERE owner = ?1 AND key = ?2",
                params![owner_scope(owner), key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    fn set(&self, owner: &str, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockError)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO session_kv (owner, key, value, updated_at)
            VALUES (?1, ?2, ?3, strftime('%s', 'now'))
            "#,
            params![owner_scope(owner), key.as_str(), value],
        )?;

        debug!("Stored {} for {}", key.as_str(), owner_scope(owner));
        Ok(())
    }

    fn clear(&self, owner: &str, key: StoreKey) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockError)?;

        conn.execute(
            "DELETE FROM session_kv WHERE owner = ?1 AND key = ?2",
            params![owner_scope(owner), key.as_str()],
        )?;

        Ok(())
    }

    fn clear_owner(&self, owner: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockError)?;

        conn.execute(
            "DELETE FROM session_kv WHERE owner = ?1",
            params![owner_scope(owner)],
        )?;

        Ok(())
    }
}
