//! In-memory storage backend.
//!
//! Holds the whole catalogue behind one `RwLock`. Search vectors are
//! recomputed in the write path with the same weighting as the database
//! triggers, and every write takes the write lock, so each store method is
//! atomic. Used for development (`--memory`), demos and the integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phenolib_core::access::{can_read, effective_access, in_brand_scope, AccessLevel, Subject};
use phenolib_core::concept::{CodeRow, ConceptRef, ConceptVersion};
use phenolib_core::documents::{
    phenotype_vector, template_concepts, template_ids, OntologyTerm, PhenotypeDocument,
};
use phenolib_core::ontology::{OntologyDag, OntologyNode};
use phenolib_core::publication::{
    self, current_status, Actor, ApprovalStatus, Plan, PublicationRecord, Transition,
};
use phenolib_core::search::{compare, id_serial, paginate, SearchWeights, SortKey, TextScorer};
use phenolib_textsearch::{trigram, TsVector};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::traits::{
    AuditStore, CatalogueStore, ConceptQuery, ConceptStore, HealthCheck, OntologyStore,
    PhenotypeStore, PublicationStore, SessionStore, TransitionOutcome,
};
use crate::models::phenotype::{CONCEPT_KEY, ONTOLOGY_KEY};
use crate::models::{
    Brand, CodeEntry, CodingSystem, Concept, ConceptRecord, ConceptWrite, DataSource,
    NewPhenotypeVersion, OntologyType, Phenotype, PhenotypeSummary, PublicationView,
    RequestEvent, SearchPage, SearchRequest, SessionRecord, Tag, TagType, Template, User,
};
use crate::{Error, Result};

/// Initial content of a memory store, loaded from JSON or YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub users: Vec<User>,
    pub brands: Vec<Brand>,
    pub templates: Vec<Template>,
    pub data_sources: Vec<DataSource>,
    pub tags: Vec<Tag>,
    pub coding_systems: Vec<CodingSystem>,
    /// Code rows keyed by coding-system table name.
    pub codes: HashMap<String, Vec<CodeRow>>,
    pub ontology_types: Vec<OntologyType>,
    pub ontology_nodes: Vec<OntologyNode>,
    pub ontology_edges: Vec<(i64, i64)>,
    /// Every stored phenotype version; the highest history id is the head.
    pub phenotypes: Vec<Phenotype>,
    pub publications: Vec<PublicationRecord>,
    pub concepts: Vec<ConceptRecord>,
}

impl Seed {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let seed = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
            _ => serde_json::from_str(&raw)?,
        };
        Ok(seed)
    }
}

fn default_ontology_types() -> Vec<OntologyType> {
    [
        (0, "Clinical Disease Category (SNOMED)"),
        (1, "Clinical Domain"),
        (2, "Clinical Functional Anatomy"),
        (3, "Clinical Speciality"),
    ]
    .into_iter()
    .map(|(id, name)| OntologyType {
        id,
        name: name.to_string(),
    })
    .collect()
}

#[derive(Debug, Clone)]
struct StoredPhenotype {
    phenotype: Phenotype,
    vector: TsVector,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, User>,
    sessions: HashMap<String, SessionRecord>,
    brands: Vec<Brand>,
    templates: Vec<Template>,
    data_sources: BTreeMap<i64, DataSource>,
    tags: BTreeMap<i64, Tag>,
    coding_systems: BTreeMap<i64, CodingSystem>,
    codes: HashMap<String, Vec<CodeRow>>,
    ontology: OntologyDag,
    ontology_types: Vec<OntologyType>,
    /// History rows per phenotype, oldest first.
    phenotypes: BTreeMap<String, Vec<StoredPhenotype>>,
    phenotype_serial: i64,
    publications: Vec<PublicationRecord>,
    publication_serial: i64,
    /// History rows per concept, oldest first.
    concepts: BTreeMap<i64, Vec<ConceptRecord>>,
    concept_serial: i64,
    component_serial: i64,
    request_events: Vec<RequestEvent>,
}

impl Inner {
    fn ontology_terms(&self, template_data: &serde_json::Value) -> Vec<OntologyTerm> {
        template_ids(template_data, ONTOLOGY_KEY)
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| self.ontology.get_node(id).ok())
            .map(|node| OntologyTerm {
                id: node.id,
                name: node.name.clone(),
                code: node.code(),
            })
            .collect()
    }

    fn store_phenotype(&self, phenotype: Phenotype) -> StoredPhenotype {
        let terms = self.ontology_terms(&phenotype.template_data);
        let vector = phenotype_vector(&PhenotypeDocument {
            id: &phenotype.id,
            name: &phenotype.name,
            author: &phenotype.author,
            definition: &phenotype.definition,
            implementation: &phenotype.implementation,
            validation: &phenotype.validation,
            ontology: &terms,
        });
        StoredPhenotype { phenotype, vector }
    }

    fn records_for(&self, entity_id: &str, history_id: i64) -> Vec<PublicationRecord> {
        self.publications
            .iter()
            .filter(|r| r.entity_id == entity_id && r.entity_history_id == history_id)
            .cloned()
            .collect()
    }

    fn status_of(&self, entity_id: &str, history_id: i64) -> Option<ApprovalStatus> {
        current_status(&self.records_for(entity_id, history_id))
    }

    /// Newest history id with an approved publication.
    fn latest_approved(&self, entity_id: &str) -> Option<i64> {
        self.publications
            .iter()
            .filter(|r| r.entity_id == entity_id && r.status == ApprovalStatus::Approved)
            .map(|r| r.entity_history_id)
            .max()
    }

    /// The version of a phenotype a subject may see in listings: the head
    /// with VIEW access, otherwise the newest approved version.
    fn visible_version<'a>(
        &self,
        versions: &'a [StoredPhenotype],
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Option<&'a StoredPhenotype> {
        let head = versions.last()?;
        let ownership = head.phenotype.ownership();
        if !in_brand_scope(&ownership.brands, brand_id) {
            return None;
        }
        let access = effective_access(subject, &ownership, brand_id);
        if ownership.is_deleted && access != AccessLevel::Edit {
            return None;
        }
        if access >= AccessLevel::View {
            return Some(head);
        }
        let approved = self.latest_approved(&head.phenotype.id)?;
        versions
            .iter()
            .find(|v| v.phenotype.history_id == approved)
    }

    fn concept_head(&self, id: i64) -> Option<&ConceptRecord> {
        self.concepts.get(&id).and_then(|versions| versions.last())
    }

    fn concept_version(&self, key: ConceptRef) -> Option<&ConceptRecord> {
        self.concepts
            .get(&key.concept_id)?
            .iter()
            .find(|r| r.concept.history_id == key.history_id)
    }

    fn concept_is_published(&self, concept_id: i64) -> bool {
        self.publications
            .iter()
            .filter(|r| r.status == ApprovalStatus::Approved)
            .filter_map(|r| {
                self.phenotypes
                    .get(&r.entity_id)?
                    .iter()
                    .find(|v| v.phenotype.history_id == r.entity_history_id)
            })
            .any(|v| {
                template_concepts(&v.phenotype.template_data, CONCEPT_KEY)
                    .iter()
                    .any(|(id, _)| *id == concept_id)
            })
    }
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Inner {
            ontology_types: default_ontology_types(),
            ..Inner::default()
        };
        Self {
            inner: RwLock::new(inner),
            available: AtomicBool::new(true),
        }
    }

    pub fn from_seed(seed: Seed) -> Result<Self> {
        let mut inner = Inner {
            users: seed.users.into_iter().map(|u| (u.id, u)).collect(),
            brands: seed.brands,
            templates: seed.templates,
            data_sources: seed.data_sources.into_iter().map(|d| (d.id, d)).collect(),
            tags: seed.tags.into_iter().map(|t| (t.id, t)).collect(),
            coding_systems: seed.coding_systems.into_iter().map(|c| (c.id, c)).collect(),
            codes: seed.codes,
            ontology_types: if seed.ontology_types.is_empty() {
                default_ontology_types()
            } else {
                seed.ontology_types
            },
            ..Inner::default()
        };

        for node in seed.ontology_nodes {
            inner.ontology.add_node(node);
        }
        for (parent, child) in seed.ontology_edges {
            inner.ontology.add_edge(parent, child)?;
        }

        let mut rows = seed.phenotypes;
        rows.sort_by(|a, b| a.id.cmp(&b.id).then(a.history_id.cmp(&b.history_id)));
        for row in rows {
            inner.phenotype_serial = inner.phenotype_serial.max(id_serial(&row.id).unwrap_or(0));
            let stored = inner.store_phenotype(row);
            inner
                .phenotypes
                .entry(stored.phenotype.id.clone())
                .or_default()
                .push(stored);
        }

        for record in &seed.publications {
            let exists = inner
                .phenotypes
                .get(&record.entity_id)
                .is_some_and(|v| {
                    v.iter()
                        .any(|p| p.phenotype.history_id == record.entity_history_id)
                });
            if !exists {
                return Err(Error::Validation(format!(
                    "publication {} references unknown version {}/{}",
                    record.id, record.entity_id, record.entity_history_id
                )));
            }
            inner.publication_serial = inner.publication_serial.max(record.id);
        }
        inner.publications = seed.publications;

        let mut concepts = seed.concepts;
        concepts.sort_by_key(|r| (r.concept.id, r.concept.history_id));
        for record in concepts {
            inner.concept_serial = inner.concept_serial.max(record.concept.id);
            let max_component = record.components.iter().map(|c| c.id).max().unwrap_or(0);
            inner.component_serial = inner.component_serial.max(max_component);
            inner
                .concepts
                .entry(record.concept.id)
                .or_default()
                .push(record);
        }

        Ok(Self {
            inner: RwLock::new(inner),
            available: AtomicBool::new(true),
        })
    }

    /// Simulate an outage: every call fails with `DependencyUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(Error::DependencyUnavailable("memory store is offline".into()))
        }
    }

    /// Audit events recorded so far.
    pub async fn request_events(&self) -> Vec<RequestEvent> {
        self.inner.read().await.request_events.clone()
    }

    pub async fn add_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id, user);
    }
}

fn summary(
    stored: &StoredPhenotype,
    status: Option<ApprovalStatus>,
    score: Option<f64>,
) -> PhenotypeSummary {
    let p = &stored.phenotype;
    PhenotypeSummary {
        id: p.id.clone(),
        history_id: p.history_id,
        name: p.name.clone(),
        author: p.author.clone(),
        template_id: p.template_id,
        publish_status: status,
        created: p.created,
        updated: p.updated,
        score,
    }
}

fn sort_key(stored: &StoredPhenotype, score: Option<f64>) -> SortKey<'_> {
    SortKey {
        score: score.unwrap_or(0.0),
        name: &stored.phenotype.name,
        created: stored.phenotype.created,
        updated: stored.phenotype.updated,
        serial: id_serial(&stored.phenotype.id).unwrap_or(i64::MAX),
    }
}

fn phenotype_row(
    id: String,
    history_id: i64,
    version: NewPhenotypeVersion,
    created: DateTime<Utc>,
    created_by: Option<i64>,
    now: DateTime<Utc>,
) -> Phenotype {
    Phenotype {
        id,
        history_id,
        name: version.name,
        author: version.author,
        definition: version.definition,
        implementation: version.implementation,
        validation: version.validation,
        template_id: version.template_id,
        template_version: version.template_version,
        template_data: version.template_data,
        owner_id: version.owner_id,
        group_id: version.group_id,
        owner_access: version.owner_access,
        group_access: version.group_access,
        world_access: version.world_access,
        brands: version.brands,
        is_deleted: version.is_deleted,
        created,
        updated: now,
        created_by,
        updated_by: version.user_id,
    }
}

#[async_trait]
impl PhenotypeStore for MemoryStore {
    async fn create_phenotype(&self, version: NewPhenotypeVersion) -> Result<Phenotype> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        inner.phenotype_serial += 1;
        let id = format!("PH{}", inner.phenotype_serial);
        let now = Utc::now();
        let created_by = version.user_id;
        let row = phenotype_row(id.clone(), 1, version, now, created_by, now);
        let stored = inner.store_phenotype(row);
        let phenotype = stored.phenotype.clone();
        inner.phenotypes.insert(id, vec![stored]);
        Ok(phenotype)
    }

    async fn append_phenotype_version(
        &self,
        id: &str,
        version: NewPhenotypeVersion,
    ) -> Result<Phenotype> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let (history_id, created, created_by) = {
            let versions = inner
                .phenotypes
                .get(id)
                .ok_or_else(|| Error::NotFound(format!("phenotype {id}")))?;
            let first = &versions[0].phenotype;
            let last = versions.last().map_or(0, |v| v.phenotype.history_id);
            (last + 1, first.created, first.created_by)
        };
        let row = phenotype_row(
            id.to_string(),
            history_id,
            version,
            created,
            created_by,
            Utc::now(),
        );
        let stored = inner.store_phenotype(row);
        let phenotype = stored.phenotype.clone();
        inner
            .phenotypes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("phenotype {id}")))?
            .push(stored);
        Ok(phenotype)
    }

    async fn get_phenotype(&self, id: &str) -> Result<Option<Phenotype>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .phenotypes
            .get(id)
            .and_then(|v| v.last())
            .map(|s| s.phenotype.clone()))
    }

    async fn get_phenotype_version(&self, id: &str, history_id: i64) -> Result<Option<Phenotype>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .phenotypes
            .get(id)
            .and_then(|v| v.iter().find(|s| s.phenotype.history_id == history_id))
            .map(|s| s.phenotype.clone()))
    }

    async fn list_phenotype_versions(&self, id: &str) -> Result<Vec<Phenotype>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .phenotypes
            .get(id)
            .map(|v| v.iter().map(|s| s.phenotype.clone()).collect())
            .unwrap_or_default())
    }

    async fn phenotype_search_vector(&self, id: &str, history_id: i64) -> Result<Option<String>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .phenotypes
            .get(id)
            .and_then(|v| v.iter().find(|s| s.phenotype.history_id == history_id))
            .map(|s| s.vector.to_string()))
    }

    async fn search_phenotypes(&self, request: &SearchRequest) -> Result<SearchPage> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let scorer = request
            .text
            .as_deref()
            .and_then(|t| TextScorer::new(t, request.weights));

        let mut hits: Vec<(&StoredPhenotype, Option<ApprovalStatus>, Option<f64>)> = Vec::new();
        for versions in inner.phenotypes.values() {
            let Some(stored) = inner.visible_version(versions, &request.subject, request.brand_id)
            else {
                continue;
            };
            let p = &stored.phenotype;
            let status = inner.status_of(&p.id, p.history_id);
            let facets = p.facets();
            if !request
                .filters
                .matches(&facets.view(p, status), &request.ontology_scope)
            {
                continue;
            }
            let score = match &scorer {
                Some(scorer) => {
                    let fields = [p.name.as_str(), p.author.as_str(), p.definition.as_str()];
                    match scorer.score(&stored.vector, &fields) {
                        Some(m) => Some(m.score),
                        None => continue,
                    }
                }
                None => None,
            };
            hits.push((stored, status, score));
        }

        hits.sort_by(|a, b| {
            compare(&sort_key(a.0, a.2), &sort_key(b.0, b.2), request.ordering)
        });

        let window = paginate(hits.len() as u64, request.page, request.page_size);
        let data = window
            .slice(hits)
            .into_iter()
            .map(|(stored, status, score)| summary(stored, status, score))
            .collect();
        Ok(SearchPage { window, data })
    }

    async fn published_phenotypes(&self, brand_id: Option<i32>) -> Result<Vec<(String, i64)>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .phenotypes
            .iter()
            .filter_map(|(id, versions)| {
                let head = &versions.last()?.phenotype;
                if head.is_deleted || !in_brand_scope(&head.brands, brand_id) {
                    return None;
                }
                inner.latest_approved(id).map(|h| (id.clone(), h))
            })
            .collect())
    }
}

#[async_trait]
impl PublicationStore for MemoryStore {
    async fn publication_records(
        &self,
        entity_id: &str,
        history_id: i64,
    ) -> Result<Vec<PublicationRecord>> {
        self.check_available()?;
        Ok(self.inner.read().await.records_for(entity_id, history_id))
    }

    async fn entity_publications(&self, entity_id: &str) -> Result<Vec<PublicationRecord>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .publications
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn transition_publication(
        &self,
        entity_id: &str,
        history_id: i64,
        transition: Transition,
        actor: &Actor<'_>,
        comment: Option<String>,
    ) -> Result<TransitionOutcome> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let version_exists = inner
            .phenotypes
            .get(entity_id)
            .is_some_and(|v| v.iter().any(|s| s.phenotype.history_id == history_id));
        if !version_exists {
            return Err(Error::NotFound(format!("phenotype {entity_id} version {history_id}")));
        }

        let records = inner.records_for(entity_id, history_id);
        let plan = publication::plan(&records, transition, actor)?;
        let now = Utc::now();
        let user_id = actor.subject.user_id;

        let record = match plan {
            Plan::NoOp(_) => None,
            Plan::Create(status) => {
                inner.publication_serial += 1;
                let record = PublicationRecord {
                    id: inner.publication_serial,
                    entity_id: entity_id.to_string(),
                    entity_history_id: history_id,
                    status,
                    created_by: user_id,
                    moderator_id: None,
                    created: now,
                    modified: now,
                    decided_at: None,
                    comment,
                };
                inner.publications.push(record.clone());
                Some(record)
            }
            Plan::Advance { record_id, to, .. } => {
                let record = inner
                    .publications
                    .iter_mut()
                    .find(|r| r.id == record_id)
                    .ok_or_else(|| Error::Internal(format!("publication {record_id} vanished")))?;
                record.status = to;
                record.moderator_id = user_id;
                record.modified = now;
                if !to.is_open() {
                    record.decided_at = Some(now);
                }
                if comment.is_some() {
                    record.comment = comment;
                }
                Some(record.clone())
            }
            Plan::Remove { record_id, .. } => {
                let index = inner
                    .publications
                    .iter()
                    .position(|r| r.id == record_id)
                    .ok_or_else(|| Error::Internal(format!("publication {record_id} vanished")))?;
                Some(inner.publications.remove(index))
            }
        };
        Ok(TransitionOutcome { plan, record })
    }

    async fn moderation_queue(
        &self,
        brands: Option<&BTreeSet<i32>>,
    ) -> Result<Vec<PublicationView>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut queue: Vec<PublicationView> = inner
            .publications
            .iter()
            .filter(|r| r.status.is_open())
            .filter_map(|r| {
                let versions = inner.phenotypes.get(&r.entity_id)?;
                let head = &versions.last()?.phenotype;
                if let Some(brands) = brands {
                    if !head.brands.iter().any(|b| brands.contains(b)) {
                        return None;
                    }
                }
                let name = versions
                    .iter()
                    .find(|v| v.phenotype.history_id == r.entity_history_id)
                    .map(|v| v.phenotype.name.clone());
                let mut view = PublicationView::from(r.clone());
                view.name = name;
                Some(view)
            })
            .collect();
        queue.sort_by_key(|v| (v.created, v.id));
        Ok(queue)
    }
}

#[async_trait]
impl ConceptStore for MemoryStore {
    async fn get_concept(&self, id: i64) -> Result<Option<ConceptRecord>> {
        self.check_available()?;
        Ok(self.inner.read().await.concept_head(id).cloned())
    }

    async fn get_concept_version(&self, id: i64, history_id: i64) -> Result<Option<ConceptRecord>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .concept_version(ConceptRef {
                concept_id: id,
                history_id,
            })
            .cloned())
    }

    async fn list_concept_versions(&self, id: i64) -> Result<Vec<Concept>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .concepts
            .get(&id)
            .map(|v| v.iter().map(|r| r.concept.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_concepts(&self, query: &ConceptQuery) -> Result<(u64, Vec<Concept>)> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let needle = query
            .text
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());
        let rows: Vec<Concept> = inner
            .concepts
            .keys()
            .filter_map(|id| inner.concept_head(*id))
            .map(|r| &r.concept)
            .filter(|c| {
                let published = inner.concept_is_published(c.id);
                can_read(&query.subject, &c.ownership(), None, published)
            })
            .filter(|c| {
                needle.as_ref().map_or(true, |n| {
                    c.name.to_lowercase().contains(n.as_str())
                        || c.public_id().to_lowercase() == *n
                })
            })
            .cloned()
            .collect();
        let window = paginate(rows.len() as u64, query.page, query.page_size);
        Ok((window.total, window.slice(rows)))
    }

    async fn concept_graph(&self, root: ConceptRef) -> Result<Vec<ConceptVersion>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root]);
        let mut out = Vec::new();
        while let Some(key) = queue.pop_front() {
            if !seen.insert(key) {
                continue;
            }
            let Some(record) = inner.concept_version(key) else {
                continue;
            };
            let version = record.version();
            queue.extend(version.child_refs());
            out.push(version);
        }
        Ok(out)
    }

    async fn insert_concept_version(&self, write: ConceptWrite) -> Result<Concept> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let (id, history_id, created) = match write.id {
            Some(id) => {
                let head = inner
                    .concept_head(id)
                    .ok_or_else(|| Error::NotFound(format!("concept C{id}")))?;
                let first = inner.concepts[&id][0].concept.created;
                (id, head.concept.history_id + 1, first)
            }
            None => {
                inner.concept_serial += 1;
                (inner.concept_serial, 1, now)
            }
        };

        let catalogue = write
            .coding_system_id
            .and_then(|cs| inner.coding_systems.get(&cs))
            .and_then(|cs| inner.codes.get(&cs.table_name))
            .cloned()
            .unwrap_or_default();

        let mut components = Vec::with_capacity(write.components.len());
        for mut component in write.components {
            inner.component_serial += 1;
            component.id = inner.component_serial;
            if component.component_type.is_expression() {
                if let Some(regex) = &component.code_regex {
                    component.codes = regex.materialize(&catalogue)?;
                }
            }
            components.push(component);
        }

        let concept = Concept {
            id,
            history_id,
            name: write.name,
            description: write.description,
            author: write.author,
            coding_system_id: write.coding_system_id,
            owner_id: write.owner_id,
            group_id: write.group_id,
            owner_access: write.owner_access,
            group_access: write.group_access,
            world_access: write.world_access,
            is_deleted: false,
            created,
            updated: now,
        };
        inner.concepts.entry(id).or_default().push(ConceptRecord {
            concept: concept.clone(),
            components,
        });
        Ok(concept)
    }

    async fn concept_is_published(&self, concept_id: i64) -> Result<bool> {
        self.check_available()?;
        Ok(self.inner.read().await.concept_is_published(concept_id))
    }
}

#[async_trait]
impl OntologyStore for MemoryStore {
    async fn ontology_node(&self, id: i64) -> Result<Option<OntologyNode>> {
        self.check_available()?;
        Ok(self.inner.read().await.ontology.get_node(id).ok().cloned())
    }

    async fn ontology_nodes(&self, ids: &BTreeSet<i64>) -> Result<Vec<OntologyNode>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.ontology.get_node(*id).ok().cloned())
            .collect())
    }

    async fn ontology_parents(&self, id: i64) -> Result<Vec<OntologyNode>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .ontology
            .parents_of(id)
            .filter_map(|p| inner.ontology.get_node(p).ok().cloned())
            .collect())
    }

    async fn ontology_children(&self, id: i64) -> Result<Vec<OntologyNode>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .ontology
            .children_of(id)
            .filter_map(|c| inner.ontology.get_node(c).ok().cloned())
            .collect())
    }

    async fn ontology_expand(&self, ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>> {
        self.check_available()?;
        Ok(self.inner.read().await.ontology.expand(ids))
    }

    async fn ontology_ancestors(&self, id: i64) -> Result<BTreeSet<i64>> {
        self.check_available()?;
        Ok(self.inner.read().await.ontology.ancestors(id).collect())
    }

    async fn ontology_is_descendant(
        &self,
        parents: &BTreeSet<i64>,
        candidates: &BTreeSet<i64>,
    ) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .await
            .ontology
            .is_descendant(parents, candidates))
    }

    async fn ontology_types(&self) -> Result<Vec<OntologyType>> {
        self.check_available()?;
        Ok(self.inner.read().await.ontology_types.clone())
    }

    async fn ontology_roots(&self, type_id: i32) -> Result<Vec<OntologyNode>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.ontology.roots(type_id).into_iter().cloned().collect())
    }

    async fn search_ontology(
        &self,
        query: &str,
        type_id: Option<i32>,
        weights: &SearchWeights,
        limit: u32,
    ) -> Result<Vec<(OntologyNode, f64)>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .ontology
            .search(query, type_id, weights)
            .into_iter()
            .take(limit as usize)
            .filter_map(|(id, score)| inner.ontology.get_node(id).ok().map(|n| (n.clone(), score)))
            .collect())
    }

    async fn add_ontology_node(&self, mut node: OntologyNode) -> Result<OntologyNode> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if !inner.ontology_types.iter().any(|t| t.id == node.type_id) {
            return Err(Error::Validation(format!("unknown ontology type {}", node.type_id)));
        }
        if node.id <= 0 {
            node.id = inner.ontology.nodes().map(|n| n.id).max().unwrap_or(0) + 1;
        }
        inner.ontology.add_node(node.clone());
        Ok(node)
    }

    async fn add_ontology_edge(&self, parent: i64, child: i64) -> Result<bool> {
        self.check_available()?;
        Ok(self.inner.write().await.ontology.add_edge(parent, child)?)
    }
}

#[async_trait]
impl CatalogueStore for MemoryStore {
    async fn brands(&self) -> Result<Vec<Brand>> {
        self.check_available()?;
        Ok(self.inner.read().await.brands.clone())
    }

    async fn templates(&self) -> Result<Vec<Template>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut latest: BTreeMap<i64, &Template> = BTreeMap::new();
        for t in &inner.templates {
            let entry = latest.entry(t.id).or_insert(t);
            if t.version_id > entry.version_id {
                *entry = t;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn template_version(&self, id: i64, version: Option<i64>) -> Result<Option<Template>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let candidates = inner.templates.iter().filter(|t| t.id == id);
        let found = match version {
            Some(v) => candidates.filter(|t| t.version_id == v).last(),
            None => candidates.max_by_key(|t| t.version_id),
        };
        Ok(found.cloned())
    }

    async fn template_versions(&self, id: i64) -> Result<Vec<Template>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut versions: Vec<Template> =
            inner.templates.iter().filter(|t| t.id == id).cloned().collect();
        versions.sort_by_key(|t| t.version_id);
        Ok(versions)
    }

    async fn data_sources(&self) -> Result<Vec<DataSource>> {
        self.check_available()?;
        Ok(self.inner.read().await.data_sources.values().cloned().collect())
    }

    async fn data_source(&self, id: i64) -> Result<Option<DataSource>> {
        self.check_available()?;
        Ok(self.inner.read().await.data_sources.get(&id).cloned())
    }

    async fn tags(&self, tag_type: TagType, brand_id: Option<i32>) -> Result<Vec<Tag>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .tags
            .values()
            .filter(|t| t.tag_type == tag_type)
            .filter(|t| match brand_id {
                None => true,
                Some(b) => t.collection_brand.map_or(true, |cb| cb == b),
            })
            .cloned()
            .collect())
    }

    async fn tag(&self, id: i64) -> Result<Option<Tag>> {
        self.check_available()?;
        Ok(self.inner.read().await.tags.get(&id).cloned())
    }

    async fn coding_systems(&self) -> Result<Vec<CodingSystem>> {
        self.check_available()?;
        Ok(self.inner.read().await.coding_systems.values().cloned().collect())
    }

    async fn coding_system(&self, id: i64) -> Result<Option<CodingSystem>> {
        self.check_available()?;
        Ok(self.inner.read().await.coding_systems.get(&id).cloned())
    }

    async fn search_codes(
        &self,
        system: &CodingSystem,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CodeEntry>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let Some(rows) = inner.codes.get(&system.table_name) else {
            return Ok(Vec::new());
        };
        let query = query.trim();
        let prefix = query.to_lowercase();
        let mut hits: Vec<(bool, f64, &CodeRow)> = rows
            .iter()
            .filter_map(|row| {
                let is_prefix = !prefix.is_empty() && row.code.to_lowercase().starts_with(&prefix);
                let score = trigram::similarity(&row.code, query)
                    .max(trigram::similarity(&row.description, query));
                (is_prefix || score >= trigram::DEFAULT_THRESHOLD)
                    .then_some((is_prefix, score, row))
            })
            .collect();
        hits.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.total_cmp(&a.1))
                .then(a.2.code.cmp(&b.2.code))
        });
        Ok(hits
            .into_iter()
            .take(limit as usize)
            .map(|(_, score, row)| CodeEntry {
                code: row.code.clone(),
                description: row.description.clone(),
                score: Some(score),
            })
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: SessionRecord) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.key_hash.clone(), session);
        Ok(())
    }

    async fn find_session(&self, key_hash: &str) -> Result<Option<SessionRecord>> {
        self.check_available()?;
        Ok(self.inner.read().await.sessions.get(key_hash).cloned())
    }

    async fn touch_session(&self, key_hash: &str, at: DateTime<Utc>) -> Result<()> {
        self.check_available()?;
        if let Some(session) = self.inner.write().await.sessions.get_mut(key_hash) {
            session.last_request = at;
        }
        Ok(())
    }

    async fn delete_session(&self, key_hash: &str) -> Result<()> {
        self.check_available()?;
        self.inner.write().await.sessions.remove(key_hash);
        Ok(())
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.check_available()?;
        Ok(self.inner.read().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn record_request(&self, event: RequestEvent) -> Result<()> {
        self.check_available()?;
        self.inner.write().await.request_events.push(event);
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phenolib_core::concept::{CodeRegex, ColumnSearch, Component, ComponentType, LogicalType};
    use phenolib_core::search::{Ordering, SearchFilters};
    use serde_json::json;
    use std::time::Duration;

    fn owner() -> Subject {
        Subject {
            user_id: Some(1),
            username: Some("owner".into()),
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

    fn version(name: &str) -> NewPhenotypeVersion {
        NewPhenotypeVersion {
            name: name.into(),
            author: String::new(),
            definition: String::new(),
            implementation: String::new(),
            validation: String::new(),
            template_id: Some(1),
            template_version: Some(1),
            template_data: json!({}),
            owner_id: Some(1),
            group_id: None,
            owner_access: AccessLevel::Edit,
            group_access: AccessLevel::None,
            world_access: AccessLevel::None,
            brands: vec![],
            is_deleted: false,
            user_id: Some(1),
        }
    }

    fn request(subject: Subject, text: Option<&str>) -> SearchRequest {
        SearchRequest {
            text: text.map(str::to_string),
            filters: SearchFilters::default(),
            ontology_scope: BTreeSet::new(),
            brand_id: None,
            subject,
            ordering: Ordering::parse(None, text.is_some()),
            page: None,
            page_size: 20,
            weights: SearchWeights::default(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn versions_are_appended() {
        let store = MemoryStore::new();
        let created = store.create_phenotype(version("Asthma")).await.unwrap();
        assert_eq!(created.id, "PH1");
        assert_eq!(created.history_id, 1);

        let updated = store
            .append_phenotype_version("PH1", version("Asthma (revised)"))
            .await
            .unwrap();
        assert_eq!(updated.history_id, 2);
        assert_eq!(updated.created, created.created);

        let first = store.get_phenotype_version("PH1", 1).await.unwrap().unwrap();
        assert_eq!(first.name, "Asthma");
        let head = store.get_phenotype("PH1").await.unwrap().unwrap();
        assert_eq!(head.name, "Asthma (revised)");
        assert_eq!(store.list_phenotype_versions("PH1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn search_vector_includes_ontology_terms() {
        let mut seed = Seed::default();
        seed.ontology_nodes.push(OntologyNode {
            id: 5,
            type_id: 0,
            name: "Lung".into(),
            properties: json!({"code": "J45"}),
        });
        let store = MemoryStore::from_seed(seed).unwrap();
        let mut v = version("Asthma");
        v.template_data = json!({"ontology": [5]});
        store.create_phenotype(v).await.unwrap();

        let vector = store.phenotype_search_vector("PH1", 1).await.unwrap().unwrap();
        assert!(vector.contains("'lung':3A"));
        assert!(vector.contains("'j45':4A"));
    }

    #[tokio::test]
    async fn anonymous_search_sees_only_published() {
        let store = MemoryStore::new();
        store.create_phenotype(version("Asthma")).await.unwrap();
        store.create_phenotype(version("Asthma in children")).await.unwrap();

        let subject = owner();
        let actor = Actor {
            subject: &subject,
            can_edit: true,
            is_brand_admin: false,
        };
        store
            .transition_publication("PH1", 1, Transition::Request, &actor, None)
            .await
            .unwrap();
        let moderator = moderator();
        let actor = Actor {
            subject: &moderator,
            can_edit: false,
            is_brand_admin: false,
        };
        store
            .transition_publication("PH1", 1, Transition::Approve, &actor, None)
            .await
            .unwrap();

        let page = store
            .search_phenotypes(&request(Subject::anonymous(), Some("asthma")))
            .await
            .unwrap();
        assert_eq!(page.window.total, 1);
        assert_eq!(page.data[0].id, "PH1");
        assert_eq!(page.data[0].publish_status, Some(ApprovalStatus::Approved));

        let page = store
            .search_phenotypes(&request(owner(), Some("asthma")))
            .await
            .unwrap();
        assert_eq!(page.window.total, 2);
    }

    #[tokio::test]
    async fn second_request_is_a_noop() {
        let store = MemoryStore::new();
        store.create_phenotype(version("Asthma")).await.unwrap();
        let subject = owner();
        let actor = Actor {
            subject: &subject,
            can_edit: true,
            is_brand_admin: false,
        };
        let first = store
            .transition_publication("PH1", 1, Transition::Request, &actor, None)
            .await
            .unwrap();
        assert_eq!(first.plan, Plan::Create(ApprovalStatus::Requested));
        let second = store
            .transition_publication("PH1", 1, Transition::Request, &actor, None)
            .await
            .unwrap();
        assert_eq!(second.plan, Plan::NoOp(Some(ApprovalStatus::Requested)));
        assert_eq!(store.publication_records("PH1", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transition_on_missing_version_is_not_found() {
        let store = MemoryStore::new();
        let subject = owner();
        let actor = Actor {
            subject: &subject,
            can_edit: true,
            is_brand_admin: false,
        };
        let err = store
            .transition_publication("PH7", 1, Transition::Request, &actor, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn expression_components_are_materialised() {
        let mut seed = Seed::default();
        seed.coding_systems.push(CodingSystem {
            id: 4,
            name: "ICD10 codes".into(),
            description: String::new(),
            link: None,
            table_name: "icd10_codes".into(),
            code_column_name: "code".into(),
            desc_column_name: "description".into(),
        });
        seed.codes.insert(
            "icd10_codes".into(),
            vec![
                CodeRow::new("J45.0", "Predominantly allergic asthma"),
                CodeRow::new("J45.1", "Nonallergic asthma"),
                CodeRow::new("E11", "Type 2 diabetes mellitus"),
            ],
        );
        let store = MemoryStore::from_seed(seed).unwrap();
        let concept = store
            .insert_concept_version(ConceptWrite {
                id: None,
                name: "Asthma codes".into(),
                description: String::new(),
                author: String::new(),
                coding_system_id: Some(4),
                owner_id: Some(1),
                group_id: None,
                owner_access: AccessLevel::Edit,
                group_access: AccessLevel::None,
                world_access: AccessLevel::None,
                components: vec![Component {
                    id: 0,
                    name: "J45".into(),
                    component_type: ComponentType::Expression,
                    logical_type: LogicalType::Include,
                    codes: vec![],
                    code_regex: Some(CodeRegex {
                        regex: "^J45".into(),
                        column_search: ColumnSearch::Code,
                    }),
                    concept_ref: None,
                }],
                user_id: Some(1),
            })
            .await
            .unwrap();
        let record = store.get_concept(concept.id).await.unwrap().unwrap();
        assert_eq!(record.components[0].codes.len(), 2);
        assert!(record.components[0].id > 0);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(Error::DependencyUnavailable(_))));
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
