//! Server-side login sessions keyed by an opaque cookie token.
//!
//! Sessions expire a fixed time after login. Expired entries are dropped
//! when looked up and swept whenever a new session is opened.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "samvad-session";

/// Lifetime of a session unless configured otherwise.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub logged_in_at: DateTime<Utc>,
}

impl Session {
    fn expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        // A login stamped in the future (clock step) counts as fresh.
        (now - self.logged_in_at)
            .to_std()
            .is_ok_and(|age| age >= ttl)
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Opens a session and returns its token.
    pub async fn open(&self, user_id: &str, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            user_id: user_id.to_string(),
            username: username.to_string(),
            logged_in_at: now,
        };

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.expired(self.ttl, now));
        if sessions.len() < before {
            tracing::debug!(expired = before - sessions.len(), "swept expired sessions");
        }
        sessions.insert(token.clone(), session);
        token
    }

    pub async fn get(&self, token: &str) -> Option<Session> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(session) if !session.expired(self.ttl, now) => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions.write().await.remove(token);
        None
    }

    pub async fn close(&self, token: &str) -> Option<Session> {
        self.sessions.write().await.remove(token)
    }

    /// Number of sessions held, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
