//! Service layer - business logic between handlers and storage

pub mod audit;
pub mod catalogue;
pub mod concepts;
pub mod health;
pub mod notify;
pub mod ontology;
pub mod phenotypes;
pub mod publication;
pub mod search;
pub mod sessions;
pub mod sitemap;

pub use audit::AuditService;
pub use catalogue::CatalogueService;
pub use concepts::ConceptService;
pub use health::{HealthReport, HealthService};
pub use notify::{LogNotifier, Notifier, PublicationEvent};
pub use ontology::OntologyService;
pub use phenotypes::PhenotypeService;
pub use publication::{PublicationService, TransitionResult};
pub use search::SearchService;
pub use sessions::{SessionLookup, SessionService};
pub use sitemap::SitemapService;

use phenolib_core::access::Subject;

use crate::Error;

/// Error for an entity the subject may not read: guests are told it does
/// not exist, signed-in users that they lack access.
pub(crate) fn hidden(subject: &Subject, what: &str) -> Error {
    if subject.is_authenticated() {
        Error::PermissionDenied(format!("no access to {what}"))
    } else {
        Error::NotFound(what.to_string())
    }
}
