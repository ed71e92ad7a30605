//! Database layer - storage traits and their backends

pub mod memory;
pub mod postgres;
pub mod traits;

use std::future::Future;

pub use memory::{MemoryStore, Seed};
pub use postgres::PgStore;
pub use traits::{
    AuditStore, CatalogueStore, ConceptQuery, ConceptStore, HealthCheck, OntologyStore,
    PhenotypeStore, PublicationStore, SessionStore, Store, TransitionOutcome,
};

use crate::metrics::DB_RETRIES_TOTAL;
use crate::Result;

/// Run an idempotent read, retrying it once when the first attempt fails
/// with a connection-level error. Never use this for writes.
pub async fn retry_once<T, F, Fut>(operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(operation, error = %e, "Transient storage error, retrying once");
            DB_RETRIES_TOTAL.with_label_values(&[operation]).inc();
            op().await
        }
        other => other,
    }
}
