//! Publication workflow: transitions, history and the moderation queue.

use std::collections::BTreeSet;
use std::sync::Arc;

use phenolib_core::access::{can_edit, in_brand_scope, Subject};
use phenolib_core::publication::{Actor, ApprovalStatus, Plan, Transition};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::Store;
use crate::metrics::PUBLICATION_TRANSITIONS_TOTAL;
use crate::models::PublicationView;
use crate::services::{Notifier, PhenotypeService, PublicationEvent};
use crate::{Error, Result};

/// Map a URL action onto a transition. `request_publish` and `publish` are
/// accepted for `request` and `approve`.
pub fn parse_action(action: &str) -> Option<Transition> {
    match action.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "request" | "request_publish" => Some(Transition::Request),
        "review" => Some(Transition::Review),
        "approve" | "publish" => Some(Transition::Approve),
        "reject" | "decline" => Some(Transition::Reject),
        "cancel" => Some(Transition::Cancel),
        "withdraw" => Some(Transition::Withdraw),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransitionResult {
    pub entity_id: String,
    pub history_id: i64,
    pub transition: String,
    /// Status of the pair after the transition.
    #[schema(value_type = Option<String>)]
    pub status: Option<ApprovalStatus>,
    /// False when the transition was already satisfied.
    pub changed: bool,
    pub record: Option<PublicationView>,
}

pub struct PublicationService {
    store: Arc<dyn Store>,
    phenotypes: Arc<PhenotypeService>,
    notifier: Arc<dyn Notifier>,
}

impl PublicationService {
    pub fn new(
        store: Arc<dyn Store>,
        phenotypes: Arc<PhenotypeService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            phenotypes,
            notifier,
        }
    }

    pub async fn transition(
        &self,
        id: &str,
        history_id: i64,
        transition: Transition,
        subject: &Subject,
        brand_id: Option<i32>,
        comment: Option<String>,
    ) -> Result<TransitionResult> {
        if !subject.is_authenticated() {
            return Err(Error::Unauthenticated);
        }
        let head = self
            .store
            .get_phenotype(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("phenotype {id}")))?;
        if !in_brand_scope(&head.brands, brand_id) {
            return Err(Error::NotFound(format!("phenotype {id}")));
        }

        let actor = Actor {
            subject,
            can_edit: can_edit(subject, &head.ownership(), brand_id),
            is_brand_admin: head.brands.iter().any(|b| subject.brand_admin_of.contains(b)),
        };
        let outcome = match self
            .store
            .transition_publication(id, history_id, transition, &actor, comment.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let label = match &e {
                    Error::PermissionDenied(_) => "denied",
                    Error::InvalidState(_) => "invalid",
                    _ => "error",
                };
                PUBLICATION_TRANSITIONS_TOTAL
                    .with_label_values(&[transition.as_str(), label])
                    .inc();
                return Err(e);
            }
        };

        let changed = !outcome.plan.is_noop();
        PUBLICATION_TRANSITIONS_TOTAL
            .with_label_values(&[
                transition.as_str(),
                if changed { "applied" } else { "noop" },
            ])
            .inc();

        let status = outcome.plan.resulting_status();
        if changed {
            tracing::info!(
                entity_id = %id,
                history_id,
                transition = transition.as_str(),
                status = status.map(|s| s.as_str()).unwrap_or("NONE"),
                user_id = ?subject.user_id,
                "Publication transition applied"
            );
            let submitter_id = outcome.record.as_ref().and_then(|r| r.created_by);
            self.notifier
                .notify(&PublicationEvent {
                    entity_id: id.to_string(),
                    history_id,
                    transition,
                    status,
                    actor_id: subject.user_id,
                    submitter_id,
                    comment,
                })
                .await;
        }

        let record = match outcome.plan {
            Plan::Remove { .. } => None,
            _ => outcome.record.map(PublicationView::from),
        };
        Ok(TransitionResult {
            entity_id: id.to_string(),
            history_id,
            transition: transition.as_str().to_string(),
            status,
            changed,
            record,
        })
    }

    /// Attempts for one version, visible to anyone who can see the version.
    pub async fn history(
        &self,
        id: &str,
        history_id: i64,
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<Vec<PublicationView>> {
        self.phenotypes
            .visible(id, Some(history_id), subject, brand_id)
            .await?;
        let records = self.store.publication_records(id, history_id).await?;
        Ok(records.into_iter().map(PublicationView::from).collect())
    }

    /// Open requests: all of them for moderators, their own Brands' for
    /// Brand administrators.
    pub async fn queue(&self, subject: &Subject) -> Result<Vec<PublicationView>> {
        if !subject.is_authenticated() {
            return Err(Error::Unauthenticated);
        }
        if subject.can_moderate() {
            return self.store.moderation_queue(None).await;
        }
        if subject.brand_admin_of.is_empty() {
            return Err(Error::PermissionDenied(
                "the moderation queue is restricted to moderators".into(),
            ));
        }
        let brands: BTreeSet<i32> = subject.brand_admin_of.clone();
        self.store.moderation_queue(Some(&brands)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::PhenotypeInput;
    use crate::services::ConceptService;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PublicationEvent>>);

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, event: &PublicationEvent) {
            self.0.lock().await.push(event.clone());
        }
    }

    fn user(id: i64) -> Subject {
        Subject {
            user_id: Some(id),
            ..Subject::default()
        }
    }

    fn moderator() -> Subject {
        Subject {
            is_moderator: true,
            ..user(50)
        }
    }

    struct Fixture {
        phenotypes: Arc<PhenotypeService>,
        publication: PublicationService,
        recorder: Arc<Recorder>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let concepts = Arc::new(ConceptService::new(store.clone(), 8));
        let phenotypes = Arc::new(PhenotypeService::new(store.clone(), concepts));
        let recorder = Arc::new(Recorder::default());
        let publication = PublicationService::new(store, phenotypes.clone(), recorder.clone());
        Fixture {
            phenotypes,
            publication,
            recorder,
        }
    }

    async fn create(f: &Fixture, owner: i64) -> String {
        let input = PhenotypeInput {
            name: "Asthma".into(),
            ..PhenotypeInput::default()
        };
        f.phenotypes.create(input, &user(owner), None).await.unwrap().id
    }

    #[test]
    fn actions_are_parsed() {
        assert_eq!(parse_action("request_publish"), Some(Transition::Request));
        assert_eq!(parse_action("publish"), Some(Transition::Approve));
        assert_eq!(parse_action("Withdraw"), Some(Transition::Withdraw));
        assert_eq!(parse_action("delete"), None);
    }

    #[tokio::test]
    async fn request_then_approve() {
        let f = fixture();
        let id = create(&f, 1).await;
        assert!(f.publication.queue(&moderator()).await.unwrap().is_empty());

        let requested = f
            .publication
            .transition(&id, 1, Transition::Request, &user(1), None, None)
            .await
            .unwrap();
        assert_eq!(requested.status, Some(ApprovalStatus::Requested));
        assert!(requested.changed);
        assert_eq!(f.publication.queue(&moderator()).await.unwrap().len(), 1);

        let err = f
            .publication
            .transition(&id, 1, Transition::Approve, &user(2), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let approved = f
            .publication
            .transition(&id, 1, Transition::Approve, &moderator(), None, None)
            .await
            .unwrap();
        assert_eq!(approved.status, Some(ApprovalStatus::Approved));

        let events = f.recorder.0.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].submitter_id, Some(1));
    }

    #[tokio::test]
    async fn repeated_request_is_a_noop() {
        let f = fixture();
        let id = create(&f, 1).await;
        f.publication
            .transition(&id, 1, Transition::Request, &user(1), None, None)
            .await
            .unwrap();
        let again = f
            .publication
            .transition(&id, 1, Transition::Request, &user(1), None, None)
            .await
            .unwrap();
        assert!(!again.changed);
        assert_eq!(f.recorder.0.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn guests_and_plain_users_have_no_queue() {
        let f = fixture();
        assert!(matches!(
            f.publication.queue(&Subject::anonymous()).await,
            Err(Error::Unauthenticated)
        ));
        assert!(matches!(
            f.publication.queue(&user(3)).await,
            Err(Error::PermissionDenied(_))
        ));
    }
}
