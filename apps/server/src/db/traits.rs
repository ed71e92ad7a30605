//! Storage traits implemented by the PostgreSQL and in-memory backends.
//!
//! Every method is a single unit of work: writes that touch several tables
//! (entity head, history row, search vector) are atomic, and reads observe a
//! consistent snapshot of the row they return.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phenolib_core::access::Subject;
use phenolib_core::concept::{ConceptRef, ConceptVersion};
use phenolib_core::ontology::OntologyNode;
use phenolib_core::publication::{Actor, Plan, PublicationRecord, Transition};
use phenolib_core::search::SearchWeights;

use crate::models::{
    Brand, CodeEntry, CodingSystem, Concept, ConceptRecord, ConceptWrite, DataSource,
    NewPhenotypeVersion, OntologyType, Phenotype, PublicationView, RequestEvent, SearchPage,
    SearchRequest, SessionRecord, Tag, TagType, Template, User,
};
use crate::Result;

/// Versioned phenotype records.
#[async_trait]
pub trait PhenotypeStore: Send + Sync {
    /// Create a new phenotype with a server-assigned `PH` id and history 1.
    async fn create_phenotype(&self, version: NewPhenotypeVersion) -> Result<Phenotype>;

    /// Append a new history row and move the head to it.
    ///
    /// # Errors
    /// * `NotFound` - the phenotype does not exist
    async fn append_phenotype_version(
        &self,
        id: &str,
        version: NewPhenotypeVersion,
    ) -> Result<Phenotype>;

    /// Current head, including deleted heads.
    async fn get_phenotype(&self, id: &str) -> Result<Option<Phenotype>>;

    async fn get_phenotype_version(&self, id: &str, history_id: i64) -> Result<Option<Phenotype>>;

    /// Every history row, oldest first.
    async fn list_phenotype_versions(&self, id: &str) -> Result<Vec<Phenotype>>;

    /// Text form of the stored search vector of one version.
    async fn phenotype_search_vector(&self, id: &str, history_id: i64) -> Result<Option<String>>;

    /// Run the visibility, facet, text, ordering and pagination pipeline.
    async fn search_phenotypes(&self, request: &SearchRequest) -> Result<SearchPage>;

    /// `(id, history_id)` of the newest approved version of every
    /// non-deleted phenotype visible under `brand_id`.
    async fn published_phenotypes(&self, brand_id: Option<i32>) -> Result<Vec<(String, i64)>>;
}

/// Result of an applied publication transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub plan: Plan,
    /// The written row, or the removed one for `Plan::Remove`.
    pub record: Option<PublicationRecord>,
}

/// Publication attempts per `(entity_id, history_id)`.
#[async_trait]
pub trait PublicationStore: Send + Sync {
    async fn publication_records(
        &self,
        entity_id: &str,
        history_id: i64,
    ) -> Result<Vec<PublicationRecord>>;

    /// Attempts across every version of an entity.
    async fn entity_publications(&self, entity_id: &str) -> Result<Vec<PublicationRecord>>;

    /// Plan `transition` against the pair's records and apply the plan.
    /// Planning and writing happen under a per-pair lock so that concurrent
    /// requests cannot both open an attempt.
    async fn transition_publication(
        &self,
        entity_id: &str,
        history_id: i64,
        transition: Transition,
        actor: &Actor<'_>,
        comment: Option<String>,
    ) -> Result<TransitionOutcome>;

    /// Open attempts. `brands` limits the queue to phenotypes of those Brands.
    async fn moderation_queue(
        &self,
        brands: Option<&BTreeSet<i32>>,
    ) -> Result<Vec<PublicationView>>;
}

/// Listing parameters for `concepts/`.
#[derive(Debug, Clone)]
pub struct ConceptQuery {
    pub text: Option<String>,
    pub subject: Subject,
    pub page: Option<i64>,
    pub page_size: u32,
}

#[async_trait]
pub trait ConceptStore: Send + Sync {
    async fn get_concept(&self, id: i64) -> Result<Option<ConceptRecord>>;

    async fn get_concept_version(&self, id: i64, history_id: i64) -> Result<Option<ConceptRecord>>;

    async fn list_concept_versions(&self, id: i64) -> Result<Vec<Concept>>;

    /// Heads visible to the caller, ordered by id, with the total count.
    async fn list_concepts(&self, query: &ConceptQuery) -> Result<(u64, Vec<Concept>)>;

    /// `root` and every concept version reachable from it through
    /// child-concept components. Cycles are cut by the ancestor path.
    async fn concept_graph(&self, root: ConceptRef) -> Result<Vec<ConceptVersion>>;

    /// Write a new concept version, materialising expression components.
    async fn insert_concept_version(&self, write: ConceptWrite) -> Result<Concept>;

    /// Whether an approved phenotype version references the concept.
    async fn concept_is_published(&self, concept_id: i64) -> Result<bool>;
}

#[async_trait]
pub trait OntologyStore: Send + Sync {
    async fn ontology_node(&self, id: i64) -> Result<Option<OntologyNode>>;

    async fn ontology_nodes(&self, ids: &BTreeSet<i64>) -> Result<Vec<OntologyNode>>;

    async fn ontology_parents(&self, id: i64) -> Result<Vec<OntologyNode>>;

    async fn ontology_children(&self, id: i64) -> Result<Vec<OntologyNode>>;

    /// `ids` together with all their descendants.
    async fn ontology_expand(&self, ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>>;

    async fn ontology_ancestors(&self, id: i64) -> Result<BTreeSet<i64>>;

    /// True iff some candidate has one of `parents` as an ancestor.
    async fn ontology_is_descendant(
        &self,
        parents: &BTreeSet<i64>,
        candidates: &BTreeSet<i64>,
    ) -> Result<bool>;

    async fn ontology_types(&self) -> Result<Vec<OntologyType>>;

    /// Nodes of `type_id` without parents.
    async fn ontology_roots(&self, type_id: i32) -> Result<Vec<OntologyNode>>;

    /// Ranked by `name` (A) + `properties.code` (B) and trigram similarity.
    async fn search_ontology(
        &self,
        query: &str,
        type_id: Option<i32>,
        weights: &SearchWeights,
        limit: u32,
    ) -> Result<Vec<(OntologyNode, f64)>>;

    async fn add_ontology_node(&self, node: OntologyNode) -> Result<OntologyNode>;

    /// Insert an edge; `Ok(false)` when it already exists.
    ///
    /// # Errors
    /// * `Cycle` - `child` is `parent` or one of its ancestors
    async fn add_ontology_edge(&self, parent: i64, child: i64) -> Result<bool>;
}

/// Reference data.
#[async_trait]
pub trait CatalogueStore: Send + Sync {
    async fn brands(&self) -> Result<Vec<Brand>>;

    /// Latest version of every template.
    async fn templates(&self) -> Result<Vec<Template>>;

    /// A template at `version`, or its latest version.
    async fn template_version(&self, id: i64, version: Option<i64>) -> Result<Option<Template>>;

    async fn template_versions(&self, id: i64) -> Result<Vec<Template>>;

    async fn data_sources(&self) -> Result<Vec<DataSource>>;

    async fn data_source(&self, id: i64) -> Result<Option<DataSource>>;

    /// Tags of `tag_type`; with a Brand, only unbranded ones and those of that Brand.
    async fn tags(&self, tag_type: TagType, brand_id: Option<i32>) -> Result<Vec<Tag>>;

    async fn tag(&self, id: i64) -> Result<Option<Tag>>;

    async fn coding_systems(&self) -> Result<Vec<CodingSystem>>;

    async fn coding_system(&self, id: i64) -> Result<Option<CodingSystem>>;

    /// Trigram and prefix match over code and description.
    async fn search_codes(
        &self,
        system: &CodingSystem,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CodeEntry>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: SessionRecord) -> Result<()>;

    async fn find_session(&self, key_hash: &str) -> Result<Option<SessionRecord>>;

    async fn touch_session(&self, key_hash: &str, at: DateTime<Utc>) -> Result<()>;

    async fn delete_session(&self, key_hash: &str) -> Result<()>;

    async fn get_user(&self, id: i64) -> Result<Option<User>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record_request(&self, event: RequestEvent) -> Result<()>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Cheap round trip to the backing store.
    async fn ping(&self) -> Result<()>;
}

/// Every store a server needs, behind one trait object.
pub trait Store:
    PhenotypeStore
    + PublicationStore
    + ConceptStore
    + OntologyStore
    + CatalogueStore
    + SessionStore
    + AuditStore
    + HealthCheck
{
}

impl<T> Store for T where
    T: PhenotypeStore
        + PublicationStore
        + ConceptStore
        + OntologyStore
        + CatalogueStore
        + SessionStore
        + AuditStore
        + HealthCheck
{
}
