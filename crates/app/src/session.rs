use std::{collections::HashMap, sync::Arc, time::Duration};

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kick_calories_core::types::ChannelIdentity;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "kc_session";
const FALLBACK_TTL_MINUTES: i64 = 10;
/// Upper bound on live sessions.
const MAX_SESSIONS: usize = 10_000;

/// PKCE values generated when an authorization attempt starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub code_verifier: String,
    pub state: String,
}

/// Per-browser OAuth progress.
#[derive(Debug, Clone)]
pub struct Session {
    pub pending: Option<PendingAuthorization>,
    pub access_token: Option<String>,
    pub channel: Option<ChannelIdentity>,
    last_seen: DateTime<Utc>,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            pending: None,
            access_token: None,
            channel: None,
            last_seen: now,
        }
    }
}

/// In-memory session map keyed by the `kc_session` cookie.
///
/// Entries expire after a period of inactivity and are dropped lazily on
/// access or by [`SessionStore::purge_expired`]. When the store is full, the
/// least recently seen session makes room for a new one.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
    ttl: ChronoDuration,
    capacity: usize,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, MAX_SESSIONS)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let ttl = ChronoDuration::from_std(ttl)
            .unwrap_or_else(|_| ChronoDuration::minutes(FALLBACK_TTL_MINUTES));
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Creates an empty session and returns its identifier.
    pub async fn create(&self, now: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let mut sessions = self.inner.write().await;

        if sessions.len() >= self.capacity {
            sessions.retain(|_, session| !self.is_expired(session, now));
        }
        while sessions.len() >= self.capacity {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, session)| session.last_seen)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
            debug!(
                stage = "oauth",
                capacity = self.capacity,
                "session store full, evicted oldest session"
            );
        }

        sessions.insert(id.clone(), Session::new(now));
        id
    }

    /// Returns a snapshot of the session, refreshing its activity timestamp.
    pub async fn get(&self, id: &str, now: DateTime<Utc>) -> Option<Session> {
        self.update(id, now, |session| session.clone()).await
    }

    /// Applies `f` to a live session under the store's write lock.
    ///
    /// Returns `None` when the session does not exist or has expired.
    pub async fn update<F, R>(&self, id: &str, now: DateTime<Utc>, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.inner.write().await;
        let expired = match sessions.get(id) {
            Some(session) => self.is_expired(session, now),
            None => return None,
        };
        if expired {
            sessions.remove(id);
            return None;
        }

        let session = sessions.get_mut(id)?;
        session.last_seen = now;
        Some(f(session))
    }

    /// Drops every expired session and returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.inner.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        before - sessions.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.last_seen + self.ttl <= now
    }
}

/// Reads the session identifier from the request cookies.
pub fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// Builds the cookie carrying the session identifier.
///
/// `SameSite=Lax` keeps the cookie on the top-level redirect back from the
/// identity provider.
pub fn session_cookie(id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}
