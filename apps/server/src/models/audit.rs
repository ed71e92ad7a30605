use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A request admitted by the audit rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub url: String,
    pub method: String,
    pub query_string: String,
    pub user_id: Option<i64>,
    pub remote_ip: String,
    pub brand: Option<String>,
    pub timestamp: DateTime<Utc>,
}
