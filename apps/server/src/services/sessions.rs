//! Cookie sessions with absolute and idle expiry.
//!
//! Only the SHA-256 digest of a session key is stored.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chrono::Utc;
use phenolib_core::session::{ExpiryPolicy, ExpiryReason};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::Store;
use crate::models::{SessionRecord, User};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    /// No cookie, or a key that matches no session.
    Anonymous,
    Active(User),
    /// The session ended and was deleted.
    Expired(ExpiryReason),
}

pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Value of cookie `name` in the request's `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"'))
        .filter(|v| !v.is_empty())
}

pub struct SessionService {
    store: Arc<dyn Store>,
    policy: ExpiryPolicy,
    cookie_name: String,
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>, policy: ExpiryPolicy, cookie_name: String) -> Self {
        Self {
            store,
            policy,
            cookie_name,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax",
            self.cookie_name
        )
    }

    /// Start a session for `user_id` and return the cookie key.
    pub async fn open(&self, user_id: i64) -> Result<String> {
        let key = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let now = Utc::now();
        self.store
            .create_session(SessionRecord {
                key_hash: hash_key(&key),
                user_id,
                created: now,
                last_request: now,
            })
            .await?;
        Ok(key)
    }

    /// Resolve a cookie key. Live sessions are touched; expired ones are
    /// deleted.
    pub async fn lookup(&self, key: Option<&str>) -> Result<SessionLookup> {
        let Some(key) = key else {
            return Ok(SessionLookup::Anonymous);
        };
        let key_hash = hash_key(key);
        let Some(session) = self.store.find_session(&key_hash).await? else {
            return Ok(SessionLookup::Anonymous);
        };

        let now = Utc::now();
        if let Some(reason) = self.policy.check(session.created, session.last_request, now) {
            self.store.delete_session(&key_hash).await?;
            tracing::info!(user_id = session.user_id, reason = ?reason, "Session expired");
            return Ok(SessionLookup::Expired(reason));
        }

        match self.store.get_user(session.user_id).await? {
            Some(user) => {
                self.store.touch_session(&key_hash, now).await?;
                Ok(SessionLookup::Active(user))
            }
            None => {
                self.store.delete_session(&key_hash).await?;
                Ok(SessionLookup::Anonymous)
            }
        }
    }

    pub async fn close(&self, key: &str) -> Result<()> {
        self.store.delete_session(&hash_key(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, SessionStore};
    use axum::http::HeaderValue;
    use chrono::Duration;

    fn user(id: i64) -> User {
        User {
            id,
            username: format!("user{id}"),
            email: None,
            is_superuser: false,
            is_moderator: false,
            groups: vec![],
            brand_admin_of: vec![],
        }
    }

    async fn service(policy: ExpiryPolicy) -> (Arc<MemoryStore>, SessionService) {
        let store = Arc::new(MemoryStore::new());
        store.add_user(user(1)).await;
        let svc = SessionService::new(store.clone(), policy, "sessionid".into());
        (store, svc)
    }

    #[test]
    fn keys_are_hashed_to_hex() {
        let digest = hash_key("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("csrftoken=x; sessionid=abc123; theme=dark"),
        );
        assert_eq!(cookie_value(&headers, "sessionid"), Some("abc123"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[tokio::test]
    async fn open_session_resolves_to_user() {
        let (_, svc) = service(ExpiryPolicy::from_seconds(3600, 600)).await;
        let key = svc.open(1).await.unwrap();
        assert_eq!(
            svc.lookup(Some(&key)).await.unwrap(),
            SessionLookup::Active(user(1))
        );
        assert_eq!(
            svc.lookup(Some("forged")).await.unwrap(),
            SessionLookup::Anonymous
        );
    }

    #[tokio::test]
    async fn idle_session_is_deleted() {
        let (store, svc) = service(ExpiryPolicy::from_seconds(3600, 600)).await;
        let key = "idle-key";
        let start = Utc::now() - Duration::seconds(1200);
        store
            .create_session(SessionRecord {
                key_hash: hash_key(key),
                user_id: 1,
                created: start,
                last_request: start,
            })
            .await
            .unwrap();

        assert_eq!(
            svc.lookup(Some(key)).await.unwrap(),
            SessionLookup::Expired(ExpiryReason::Idle)
        );
        assert!(store.find_session(&hash_key(key)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn absolute_limit_applies_to_active_sessions() {
        let (store, svc) = service(ExpiryPolicy::from_seconds(3600, 600)).await;
        let key = "old-key";
        store
            .create_session(SessionRecord {
                key_hash: hash_key(key),
                user_id: 1,
                created: Utc::now() - Duration::seconds(7200),
                last_request: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(
            svc.lookup(Some(key)).await.unwrap(),
            SessionLookup::Expired(ExpiryReason::Absolute)
        );
    }
}
