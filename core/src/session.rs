/// Login session persistence and the capability the subscription layer reads it through
use crate::conversations::UserId;
use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

const SESSION_KEY: &[u8] = b"login_user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Persisted login: bearer token plus the signed-in user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSession {
    pub token: String,
    pub user: SessionUser,
}

/// Read access to whoever is signed in right now.
///
/// Both lookups are re-evaluated on every call; the token may rotate at any time.
pub trait SessionProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
    fn bearer_token(&self) -> Option<String>;
}

/// Session storage, persisted in a sled DB under the session directory
pub struct SessionStore {
    db: sled::Db,
}

impl SessionStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("session.db"))
            .map_err(|e| RealtimeError::Storage(format!("session DB: {}", e)))?;
        Ok(Self { db })
    }

    pub fn save(&self, session: &LoginSession) -> Result<()> {
        let val = serde_json::to_vec(session).map_err(RealtimeError::Serialization)?;
        self.db
            .insert(SESSION_KEY, val)
            .map_err(|e| RealtimeError::Storage(format!("save session: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| RealtimeError::Storage(format!("flush session: {}", e)))?;
        Ok(())
    }

    /// The stored session, or `None` when nobody is signed in or the record is unreadable
    pub fn login_user(&self) -> Option<LoginSession> {
        let raw = match self.db.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read session: {}", e);
                return None;
            }
        };
        match serde_json::from_slice::<LoginSession>(&raw) {
            Ok(session) if !session.token.is_empty() => Some(session),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring malformed session record: {}", e);
                None
            }
        }
    }

    pub fn clear(&self) -> Result<bool> {
        let removed = self
            .db
            .remove(SESSION_KEY)
            .map_err(|e| RealtimeError::Storage(format!("clear session: {}", e)))?;
        Ok(removed.is_some())
    }
}

impl SessionProvider for SessionStore {
    fn current_user_id(&self) -> Option<UserId> {
        self.login_user().map(|s| s.user.id)
    }

    fn bearer_token(&self) -> Option<String> {
        self.login_user().map(|s| s.token)
    }
}

impl Clone for SessionStore {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}
