//! Publication workflow for one `(entity_id, history_id)` pair.
//!
//! ```text
//! (none) --request--> REQUESTED --review--> PENDING
//! REQUESTED | PENDING --approve--> APPROVED
//! REQUESTED | PENDING --reject--> REJECTED
//! REQUESTED | PENDING --cancel--> (none)
//! APPROVED --withdraw--> (none)
//! ```
//!
//! Each attempt is one record. A record in an open state advances in place;
//! `APPROVED` and `REJECTED` records are never changed again. A rejected
//! attempt may be followed by a new request, which starts a new record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::Subject;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Requested,
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn code(self) -> i16 {
        match self {
            ApprovalStatus::Requested => 0,
            ApprovalStatus::Pending => 1,
            ApprovalStatus::Approved => 2,
            ApprovalStatus::Rejected => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(ApprovalStatus::Requested),
            1 => Some(ApprovalStatus::Pending),
            2 => Some(ApprovalStatus::Approved),
            3 => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Requested => "REQUESTED",
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "REQUESTED" => Some(ApprovalStatus::Requested),
            "PENDING" => Some(ApprovalStatus::Pending),
            "APPROVED" => Some(ApprovalStatus::Approved),
            "REJECTED" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }

    /// `REQUESTED` and `PENDING` still await a decision.
    pub fn is_open(self) -> bool {
        matches!(self, ApprovalStatus::Requested | ApprovalStatus::Pending)
    }
}

/// One publication attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub id: i64,
    pub entity_id: String,
    pub entity_history_id: i64,
    pub status: ApprovalStatus,
    pub created_by: Option<i64>,
    pub moderator_id: Option<i64>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Request,
    Review,
    Approve,
    Reject,
    Cancel,
    Withdraw,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Request => "request",
            Transition::Review => "review",
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
            Transition::Withdraw => "withdraw",
        }
    }
}

/// What the caller is allowed to do with the entity, computed by the caller
/// from [`crate::access`].
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub subject: &'a Subject,
    pub can_edit: bool,
    /// Brand admin of a Brand the entity belongs to.
    pub is_brand_admin: bool,
}

impl Actor<'_> {
    fn is_moderator(&self) -> bool {
        self.subject.can_moderate()
    }
}

/// Storage change required by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Nothing to write; the current status (if any) is returned unchanged.
    NoOp(Option<ApprovalStatus>),
    /// Insert a new attempt in this status.
    Create(ApprovalStatus),
    /// Move the open attempt `record_id` to `to`.
    Advance {
        record_id: i64,
        from: ApprovalStatus,
        to: ApprovalStatus,
    },
    /// Delete attempt `record_id`.
    Remove {
        record_id: i64,
        status: ApprovalStatus,
    },
}

impl Plan {
    /// Status after the plan is applied.
    pub fn resulting_status(&self) -> Option<ApprovalStatus> {
        match self {
            Plan::NoOp(status) => *status,
            Plan::Create(status) => Some(*status),
            Plan::Advance { to, .. } => Some(*to),
            Plan::Remove { .. } => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Plan::NoOp(_))
    }
}

/// Status of the pair as a whole: the open attempt, else an approval, else
/// the latest attempt.
pub fn current_status(records: &[PublicationRecord]) -> Option<ApprovalStatus> {
    open_record(records)
        .or_else(|| approved_record(records))
        .or_else(|| records.iter().max_by_key(|r| r.id))
        .map(|r| r.status)
}

fn open_record(records: &[PublicationRecord]) -> Option<&PublicationRecord> {
    records.iter().find(|r| r.status.is_open())
}

fn approved_record(records: &[PublicationRecord]) -> Option<&PublicationRecord> {
    records
        .iter()
        .filter(|r| r.status == ApprovalStatus::Approved)
        .max_by_key(|r| r.id)
}

/// Decide what `transition` does given every attempt recorded for one
/// `(entity_id, history_id)` pair. Permission is checked before state.
pub fn plan(
    records: &[PublicationRecord],
    transition: Transition,
    actor: &Actor<'_>,
) -> Result<Plan> {
    let open = open_record(records);
    let approved = approved_record(records);

    match transition {
        Transition::Request => {
            if !actor.can_edit {
                return Err(Error::PermissionDenied(
                    "publication requests require edit access".into(),
                ));
            }
            if let Some(record) = open.or(approved) {
                return Ok(Plan::NoOp(Some(record.status)));
            }
            Ok(Plan::Create(ApprovalStatus::Requested))
        }
        Transition::Review => {
            if !actor.is_moderator() {
                return Err(Error::PermissionDenied("only moderators can review".into()));
            }
            match open {
                Some(r) if r.status == ApprovalStatus::Requested => Ok(Plan::Advance {
                    record_id: r.id,
                    from: r.status,
                    to: ApprovalStatus::Pending,
                }),
                Some(r) => Ok(Plan::NoOp(Some(r.status))),
                None => Err(invalid(records, transition)),
            }
        }
        Transition::Approve => {
            if !(actor.is_moderator() || actor.is_brand_admin) {
                return Err(Error::PermissionDenied(
                    "only moderators or brand administrators can approve".into(),
                ));
            }
            match (open, approved) {
                (Some(r), _) => Ok(Plan::Advance {
                    record_id: r.id,
                    from: r.status,
                    to: ApprovalStatus::Approved,
                }),
                (None, Some(_)) => Ok(Plan::NoOp(Some(ApprovalStatus::Approved))),
                (None, None) => Err(invalid(records, transition)),
            }
        }
        Transition::Reject => {
            if !actor.is_moderator() {
                return Err(Error::PermissionDenied("only moderators can reject".into()));
            }
            match open {
                Some(r) => Ok(Plan::Advance {
                    record_id: r.id,
                    from: r.status,
                    to: ApprovalStatus::Rejected,
                }),
                None if approved.is_none()
                    && current_status(records) == Some(ApprovalStatus::Rejected) =>
                {
                    Ok(Plan::NoOp(Some(ApprovalStatus::Rejected)))
                }
                None => Err(invalid(records, transition)),
            }
        }
        Transition::Cancel => {
            let Some(r) = open else {
                return Err(invalid(records, transition));
            };
            let is_submitter =
                actor.subject.user_id.is_some() && r.created_by == actor.subject.user_id;
            if !(is_submitter || actor.is_moderator()) {
                return Err(Error::PermissionDenied(
                    "only the submitter or a moderator can cancel".into(),
                ));
            }
            Ok(Plan::Remove {
                record_id: r.id,
                status: r.status,
            })
        }
        Transition::Withdraw => {
            if !actor.is_moderator() {
                return Err(Error::PermissionDenied("only moderators can withdraw".into()));
            }
            match approved {
                Some(r) => Ok(Plan::Remove {
                    record_id: r.id,
                    status: r.status,
                }),
                None => Err(invalid(records, transition)),
            }
        }
    }
}

fn invalid(records: &[PublicationRecord], transition: Transition) -> Error {
    let state = current_status(records).map_or("UNPUBLISHED", ApprovalStatus::as_str);
    Error::InvalidState(format!("cannot {} from {}", transition.as_str(), state))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, status: ApprovalStatus, created_by: i64) -> PublicationRecord {
        let now = Utc::now();
        PublicationRecord {
            id,
            entity_id: "PH42".into(),
            entity_history_id: 1,
            status,
            created_by: Some(created_by),
            moderator_id: None,
            created: now,
            modified: now,
            decided_at: None,
            comment: None,
        }
    }

    fn owner() -> Subject {
        Subject {
            user_id: Some(1),
            ..Subject::default()
        }
    }

    fn moderator() -> Subject {
        Subject {
            user_id: Some(9),
            is_moderator: true,
            ..Subject::default()
        }
    }

    fn actor(subject: &Subject, can_edit: bool) -> Actor<'_> {
        Actor {
            subject,
            can_edit,
            is_brand_admin: false,
        }
    }

    #[test]
    fn request_needs_edit() {
        let other = Subject {
            user_id: Some(2),
            ..Subject::default()
        };
        let err = plan(&[], Transition::Request, &actor(&other, false)).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let owner = owner();
        let p = plan(&[], Transition::Request, &actor(&owner, true)).unwrap();
        assert_eq!(p, Plan::Create(ApprovalStatus::Requested));
    }

    #[test]
    fn repeated_request_is_a_noop() {
        let owner = owner();
        let open = [record(1, ApprovalStatus::Requested, 1)];
        let p = plan(&open, Transition::Request, &actor(&owner, true)).unwrap();
        assert_eq!(p, Plan::NoOp(Some(ApprovalStatus::Requested)));

        let approved = [record(1, ApprovalStatus::Approved, 1)];
        let p = plan(&approved, Transition::Request, &actor(&owner, true)).unwrap();
        assert_eq!(p, Plan::NoOp(Some(ApprovalStatus::Approved)));
    }

    #[test]
    fn rejected_attempt_can_be_requested_again() {
        let owner = owner();
        let rejected = [record(1, ApprovalStatus::Rejected, 1)];
        let p = plan(&rejected, Transition::Request, &actor(&owner, true)).unwrap();
        assert_eq!(p, Plan::Create(ApprovalStatus::Requested));
    }

    #[test]
    fn only_moderators_approve() {
        let open = [record(3, ApprovalStatus::Requested, 1)];
        let owner = owner();
        let err = plan(&open, Transition::Approve, &actor(&owner, true)).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let moderator = moderator();
        let p = plan(&open, Transition::Approve, &actor(&moderator, false)).unwrap();
        assert_eq!(
            p,
            Plan::Advance {
                record_id: 3,
                from: ApprovalStatus::Requested,
                to: ApprovalStatus::Approved
            }
        );
    }

    #[test]
    fn brand_admin_may_approve_but_not_reject() {
        let open = [record(3, ApprovalStatus::Pending, 1)];
        let admin = Subject {
            user_id: Some(4),
            ..Subject::default()
        };
        let a = Actor {
            subject: &admin,
            can_edit: false,
            is_brand_admin: true,
        };
        assert!(plan(&open, Transition::Approve, &a).is_ok());
        assert!(matches!(
            plan(&open, Transition::Reject, &a),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn approve_without_request_is_invalid_state() {
        let moderator = moderator();
        let err = plan(&[], Transition::Approve, &actor(&moderator, false)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let rejected = [record(1, ApprovalStatus::Rejected, 1)];
        let err = plan(&rejected, Transition::Approve, &actor(&moderator, false)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn review_then_reject() {
        let moderator = moderator();
        let open = [record(5, ApprovalStatus::Requested, 1)];
        let p = plan(&open, Transition::Review, &actor(&moderator, false)).unwrap();
        assert_eq!(p.resulting_status(), Some(ApprovalStatus::Pending));

        let pending = [record(5, ApprovalStatus::Pending, 1)];
        let p = plan(&pending, Transition::Reject, &actor(&moderator, false)).unwrap();
        assert_eq!(p.resulting_status(), Some(ApprovalStatus::Rejected));
    }

    #[test]
    fn submitter_cancels_open_request() {
        let owner = owner();
        let open = [record(5, ApprovalStatus::Requested, 1)];
        let p = plan(&open, Transition::Cancel, &actor(&owner, true)).unwrap();
        assert_eq!(
            p,
            Plan::Remove {
                record_id: 5,
                status: ApprovalStatus::Requested
            }
        );

        let stranger = Subject {
            user_id: Some(77),
            ..Subject::default()
        };
        assert!(matches!(
            plan(&open, Transition::Cancel, &actor(&stranger, false)),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn withdraw_removes_approval() {
        let moderator = moderator();
        let records = [
            record(1, ApprovalStatus::Rejected, 1),
            record(2, ApprovalStatus::Approved, 1),
        ];
        let p = plan(&records, Transition::Withdraw, &actor(&moderator, false)).unwrap();
        assert_eq!(
            p,
            Plan::Remove {
                record_id: 2,
                status: ApprovalStatus::Approved
            }
        );
        assert!(plan(&records[..1], Transition::Withdraw, &actor(&moderator, false)).is_err());
    }

    #[test]
    fn status_codes_match_column_values() {
        assert_eq!(ApprovalStatus::Requested.code(), 0);
        assert_eq!(ApprovalStatus::from_code(2), Some(ApprovalStatus::Approved));
        assert_eq!(ApprovalStatus::parse("pending"), Some(ApprovalStatus::Pending));
    }
}
