use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use phenolib_core::access::Subject;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub groups: Vec<i64>,
    /// Brands this user administers.
    #[serde(default)]
    pub brand_admin_of: Vec<i32>,
}

impl User {
    pub fn subject(&self) -> Subject {
        Subject {
            user_id: Some(self.id),
            username: Some(self.username.clone()),
            groups: self.groups.iter().copied().collect(),
            is_superuser: self.is_superuser,
            is_moderator: self.is_moderator,
            brand_admin_of: self.brand_admin_of.iter().copied().collect::<BTreeSet<_>>(),
        }
    }
}

/// Stored session. The cookie value itself is never persisted, only its
/// SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key_hash: String,
    pub user_id: i64,
    pub created: DateTime<Utc>,
    pub last_request: DateTime<Utc>,
}
