//! Concept reads, tree resolution and code export.
//!
//! Resolutions are cached per `(concept_id, history_id)`; history rows are
//! immutable so entries never go stale.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use phenolib_core::access::{can_edit, can_read, Subject};
use phenolib_core::concept::{resolve_tree, ConceptRef, ConceptVersion, Resolution};
use phenolib_core::search::paginate;
use tokio::sync::Mutex;

use crate::db::{ConceptQuery, Store};
use crate::metrics::CONCEPT_RESOLUTIONS_TOTAL;
use crate::models::{ConceptComponentView, ConceptDetail, ConceptPage, ConceptRecord, ExportedCode};
use crate::services::hidden;
use crate::{Error, Result};

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Accepts `C123` and `123`.
pub fn parse_concept_id(raw: &str) -> Result<i64> {
    let digits = raw
        .trim()
        .strip_prefix(['C', 'c'])
        .unwrap_or(raw.trim());
    digits
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| Error::NotFound(format!("concept {raw}")))
}

pub struct ConceptService {
    store: Arc<dyn Store>,
    cache: Mutex<LruCache<ConceptRef, Arc<Resolution>>>,
}

impl ConceptService {
    pub fn new(store: Arc<dyn Store>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resolve the component tree of one concept version.
    pub async fn resolve(&self, root: ConceptRef) -> Result<Arc<Resolution>> {
        if let Some(hit) = self.cache.lock().await.get(&root) {
            CONCEPT_RESOLUTIONS_TOTAL.with_label_values(&["hit"]).inc();
            return Ok(hit.clone());
        }
        CONCEPT_RESOLUTIONS_TOTAL.with_label_values(&["miss"]).inc();

        let graph: HashMap<ConceptRef, ConceptVersion> = self
            .store
            .concept_graph(root)
            .await?
            .into_iter()
            .map(|v| (v.key(), v))
            .collect();
        let resolution = Arc::new(resolve_tree(&graph, root)?);
        tracing::debug!(
            concept_id = root.concept_id,
            history_id = root.history_id,
            concepts = graph.len(),
            rows = resolution.rows.len(),
            codes = resolution.codes.len(),
            "Resolved concept tree"
        );
        self.cache.lock().await.put(root, resolution.clone());
        Ok(resolution)
    }

    /// Load a version the subject may read. `None` selects the head.
    async fn readable(
        &self,
        id: i64,
        version: Option<i64>,
        subject: &Subject,
    ) -> Result<(ConceptRecord, bool)> {
        let head = self
            .store
            .get_concept(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("concept C{id}")))?;
        let published = self.store.concept_is_published(id).await?;
        if !can_read(subject, &head.concept.ownership(), None, published) {
            return Err(hidden(subject, &format!("concept C{id}")));
        }

        let record = match version {
            None => head.clone(),
            Some(v) if v == head.concept.history_id => head.clone(),
            Some(v) => self
                .store
                .get_concept_version(id, v)
                .await?
                .ok_or_else(|| Error::NotFound(format!("concept C{id} version {v}")))?,
        };
        let is_latest = record.concept.history_id == head.concept.history_id;
        Ok((record, is_latest))
    }

    async fn coding_system_name(&self, id: Option<i64>) -> Result<Option<String>> {
        match id {
            Some(id) => Ok(self.store.coding_system(id).await?.map(|s| s.name)),
            None => Ok(None),
        }
    }

    pub async fn detail(
        &self,
        id: i64,
        version: Option<i64>,
        subject: &Subject,
    ) -> Result<ConceptDetail> {
        let (record, is_latest) = self.readable(id, version, subject).await?;
        let coding_system = self.coding_system_name(record.concept.coding_system_id).await?;
        Ok(ConceptDetail {
            concept_id: record.concept.public_id(),
            components: record.components.iter().map(ConceptComponentView::from).collect(),
            concept: record.concept,
            coding_system,
            is_latest,
        })
    }

    pub async fn list(
        &self,
        text: Option<String>,
        subject: &Subject,
        page: Option<i64>,
        page_size: u32,
    ) -> Result<ConceptPage> {
        let query = ConceptQuery {
            text,
            subject: subject.clone(),
            page,
            page_size,
        };
        let (total, data) = self.store.list_concepts(&query).await?;
        Ok(ConceptPage {
            window: paginate(total, page, page_size),
            data,
        })
    }

    pub async fn versions(&self, id: i64, subject: &Subject) -> Result<Vec<serde_json::Value>> {
        let (head, _) = self.readable(id, None, subject).await?;
        let editable = can_edit(subject, &head.concept.ownership(), None);
        let versions = self.store.list_concept_versions(id).await?;
        Ok(versions
            .into_iter()
            .filter(|v| editable || !v.is_deleted)
            .map(|v| {
                serde_json::json!({
                    "version_id": v.history_id,
                    "name": v.name,
                    "updated": v.updated,
                    "is_latest": v.history_id == head.concept.history_id,
                })
            })
            .collect())
    }

    /// Final code list of one concept version.
    pub async fn export_codes(
        &self,
        id: i64,
        version: Option<i64>,
        subject: &Subject,
    ) -> Result<Vec<ExportedCode>> {
        let (record, _) = self.readable(id, version, subject).await?;
        self.codes_of(&record).await
    }

    /// Codes of a concept version without a visibility check; callers
    /// establish access through the phenotype that references it.
    pub async fn export_version(&self, key: ConceptRef) -> Result<Vec<ExportedCode>> {
        let record = self
            .store
            .get_concept_version(key.concept_id, key.history_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("concept C{} version {}", key.concept_id, key.history_id))
            })?;
        self.codes_of(&record).await
    }

    async fn codes_of(&self, record: &ConceptRecord) -> Result<Vec<ExportedCode>> {
        let concept = &record.concept;
        let resolution = self
            .resolve(ConceptRef {
                concept_id: concept.id,
                history_id: concept.history_id,
            })
            .await?;
        let coding_system = self.coding_system_name(concept.coding_system_id).await?;
        Ok(resolution
            .codes
            .iter()
            .map(|code| ExportedCode {
                code: code.code.clone(),
                description: code.description.clone(),
                concept_id: concept.public_id(),
                concept_version_id: concept.history_id,
                concept_name: concept.name.clone(),
                coding_system: coding_system.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConceptStore, MemoryStore};
    use crate::models::ConceptWrite;
    use phenolib_core::access::AccessLevel;
    use phenolib_core::concept::{CodeRow, Component, ComponentType, LogicalType};

    fn codes(name: &str, include: bool, rows: &[&str]) -> Component {
        Component {
            id: 0,
            name: name.into(),
            component_type: ComponentType::Codelist,
            logical_type: if include {
                LogicalType::Include
            } else {
                LogicalType::Exclude
            },
            codes: rows.iter().map(|c| CodeRow::new(*c, format!("{c} desc"))).collect(),
            code_regex: None,
            concept_ref: None,
        }
    }

    fn write(name: &str, world: AccessLevel, components: Vec<Component>) -> ConceptWrite {
        ConceptWrite {
            id: None,
            name: name.into(),
            description: String::new(),
            author: "tester".into(),
            coding_system_id: None,
            owner_id: Some(1),
            group_id: None,
            owner_access: AccessLevel::Edit,
            group_access: AccessLevel::None,
            world_access: world,
            components,
            user_id: Some(1),
        }
    }

    fn owner() -> Subject {
        Subject {
            user_id: Some(1),
            ..Subject::default()
        }
    }

    #[test]
    fn concept_ids_accept_prefix() {
        assert_eq!(parse_concept_id("C12").unwrap(), 12);
        assert_eq!(parse_concept_id("c7").unwrap(), 7);
        assert_eq!(parse_concept_id("44").unwrap(), 44);
        assert!(parse_concept_id("PH1").is_err());
        assert!(parse_concept_id("C0").is_err());
    }

    #[tokio::test]
    async fn export_applies_exclusions() {
        let store = Arc::new(MemoryStore::new());
        let concept = store
            .insert_concept_version(write(
                "Asthma",
                AccessLevel::None,
                vec![codes("inc", true, &["J45", "J46"]), codes("exc", false, &["J46"])],
            ))
            .await
            .unwrap();
        let svc = ConceptService::new(store, 8);

        let rows = svc.export_codes(concept.id, None, &owner()).await.unwrap();
        let codes: Vec<_> = rows.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["J45"]);
        assert_eq!(rows[0].concept_id, format!("C{}", concept.id));
    }

    #[tokio::test]
    async fn private_concepts_are_hidden_from_guests() {
        let store = Arc::new(MemoryStore::new());
        let concept = store
            .insert_concept_version(write("Private", AccessLevel::None, vec![]))
            .await
            .unwrap();
        let svc = ConceptService::new(store, 8);

        let err = svc
            .detail(concept.id, None, &Subject::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let stranger = Subject {
            user_id: Some(99),
            ..Subject::default()
        };
        let err = svc.detail(concept.id, None, &stranger).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let detail = svc.detail(concept.id, None, &owner()).await.unwrap();
        assert!(detail.is_latest);
    }

    #[tokio::test]
    async fn resolutions_are_cached() {
        let store = Arc::new(MemoryStore::new());
        let concept = store
            .insert_concept_version(write(
                "Cached",
                AccessLevel::View,
                vec![codes("inc", true, &["A1"])],
            ))
            .await
            .unwrap();
        let svc = ConceptService::new(store.clone(), 8);
        let key = ConceptRef {
            concept_id: concept.id,
            history_id: concept.history_id,
        };
        let first = svc.resolve(key).await.unwrap();

        store.set_available(false);
        let second = svc.resolve(key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
