//! Ontology browsing, search and edge administration.

use std::collections::BTreeSet;
use std::sync::Arc;

use phenolib_core::access::Subject;
use phenolib_core::search::SearchWeights;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::Store;
use crate::models::{NodeRef, OntologyNodeView, OntologyType};
use crate::{Error, Result};

pub const DEFAULT_SEARCH_LIMIT: u32 = 50;
pub const MAX_SEARCH_LIMIT: u32 = 500;

/// An ontology type with its root nodes.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OntologyTypeView {
    pub id: i32,
    pub name: String,
    pub roots: Vec<OntologyNodeView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AddedEdge {
    pub parent: NodeRef,
    pub child: NodeRef,
    pub inserted: bool,
}

pub struct OntologyService {
    store: Arc<dyn Store>,
    weights: SearchWeights,
}

impl OntologyService {
    pub fn new(store: Arc<dyn Store>, weights: SearchWeights) -> Self {
        Self { store, weights }
    }

    pub async fn types(&self) -> Result<Vec<OntologyType>> {
        self.store.ontology_types().await
    }

    /// Roots of a type, each with its direct children.
    pub async fn type_roots(&self, type_id: i32) -> Result<OntologyTypeView> {
        let kind = self
            .store
            .ontology_types()
            .await?
            .into_iter()
            .find(|t| t.id == type_id)
            .ok_or_else(|| Error::NotFound(format!("ontology type {type_id}")))?;

        let mut roots = Vec::new();
        for root in self.store.ontology_roots(type_id).await? {
            let children = self.store.ontology_children(root.id).await?;
            roots.push(OntologyNodeView::new(&root, &[], &children));
        }
        Ok(OntologyTypeView {
            id: kind.id,
            name: kind.name,
            roots,
        })
    }

    /// A node with its direct parents and children.
    pub async fn node(&self, id: i64) -> Result<OntologyNodeView> {
        let node = self
            .store
            .ontology_node(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("ontology node {id}")))?;
        let parents = self.store.ontology_parents(id).await?;
        let children = self.store.ontology_children(id).await?;
        Ok(OntologyNodeView::new(&node, &parents, &children))
    }

    /// Ranked search, or every root when `query` is blank.
    pub async fn search(
        &self,
        query: Option<&str>,
        type_id: Option<i32>,
        limit: Option<u32>,
    ) -> Result<Vec<OntologyNodeView>> {
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
            let types = match type_id {
                Some(id) => vec![id],
                None => self.store.ontology_types().await?.iter().map(|t| t.id).collect(),
            };
            let mut roots = Vec::new();
            for id in types {
                roots.extend(
                    self.store
                        .ontology_roots(id)
                        .await?
                        .iter()
                        .map(|n| OntologyNodeView::new(n, &[], &[])),
                );
            }
            roots.truncate(limit as usize);
            return Ok(roots);
        };

        let hits = self
            .store
            .search_ontology(query, type_id, &self.weights, limit)
            .await?;
        Ok(hits
            .into_iter()
            .map(|(node, score)| OntologyNodeView {
                score: Some(score),
                ..OntologyNodeView::new(&node, &[], &[])
            })
            .collect())
    }

    /// Every node above `id`, ordered by name.
    pub async fn ancestors(&self, id: i64) -> Result<Vec<NodeRef>> {
        self.node_ref(id).await?;
        let ids = self.store.ontology_ancestors(id).await?;
        let mut nodes: Vec<NodeRef> = self
            .store
            .ontology_nodes(&ids)
            .await?
            .iter()
            .map(NodeRef::from)
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }

    /// True iff some candidate lies strictly below one of `parents`.
    pub async fn is_descendant(
        &self,
        parents: &BTreeSet<i64>,
        candidates: &BTreeSet<i64>,
    ) -> Result<bool> {
        if parents.is_empty() || candidates.is_empty() {
            return Ok(false);
        }
        self.store.ontology_is_descendant(parents, candidates).await
    }

    /// Superuser only. An edge that already exists is reported with
    /// `inserted: false`.
    pub async fn add_edge(&self, parent: i64, child: i64, subject: &Subject) -> Result<AddedEdge> {
        if !subject.is_authenticated() {
            return Err(Error::Unauthenticated);
        }
        if !subject.is_superuser {
            return Err(Error::PermissionDenied(
                "ontology edges can only be added by superusers".into(),
            ));
        }
        let inserted = self.store.add_ontology_edge(parent, child).await?;
        let parent = self.node_ref(parent).await?;
        let child = self.node_ref(child).await?;
        tracing::info!(
            parent = parent.id,
            child = child.id,
            inserted,
            user_id = ?subject.user_id,
            "Ontology edge added"
        );
        Ok(AddedEdge {
            parent,
            child,
            inserted,
        })
    }

    async fn node_ref(&self, id: i64) -> Result<NodeRef> {
        self.store
            .ontology_node(id)
            .await?
            .map(|node| NodeRef::from(&node))
            .ok_or_else(|| Error::NotFound(format!("ontology node {id}")))
    }
}
