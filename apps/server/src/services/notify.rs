//! Publication notifications.

use async_trait::async_trait;
use phenolib_core::publication::{ApprovalStatus, Transition};
use serde::Serialize;

/// Who a publication event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Moderators,
    Submitter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicationEvent {
    pub entity_id: String,
    pub history_id: i64,
    pub transition: Transition,
    pub status: Option<ApprovalStatus>,
    pub actor_id: Option<i64>,
    pub submitter_id: Option<i64>,
    pub comment: Option<String>,
}

impl PublicationEvent {
    /// Requests go to moderators; decisions go back to the submitter.
    pub fn audience(&self) -> Audience {
        match self.transition {
            Transition::Request | Transition::Cancel => Audience::Moderators,
            Transition::Review
            | Transition::Approve
            | Transition::Reject
            | Transition::Withdraw => Audience::Submitter,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &PublicationEvent);
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &PublicationEvent) {
        tracing::info!(
            audience = ?event.audience(),
            entity_id = %event.entity_id,
            history_id = event.history_id,
            transition = event.transition.as_str(),
            status = event.status.map(|s| s.as_str()).unwrap_or("NONE"),
            actor_id = ?event.actor_id,
            submitter_id = ?event.submitter_id,
            "Publication notification"
        );
    }
}
