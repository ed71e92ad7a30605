//! Ontology tag DAG.
//!
//! Nodes carry a type, a name and opaque properties. Edges point from parent
//! to child and never form a cycle: [`OntologyDag::add_edge`] refuses any
//! edge whose parent is already reachable from the child.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use phenolib_textsearch::TsVector;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::documents::ontology_vector;
use crate::search::{SearchWeights, TextScorer};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyNode {
    pub id: i64,
    pub type_id: i32,
    pub name: String,
    #[serde(default)]
    pub properties: Value,
}

impl OntologyNode {
    /// `properties.code` rendered as text, if present.
    pub fn code(&self) -> Option<String> {
        match self.properties.get("code")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OntologyDag {
    nodes: BTreeMap<i64, OntologyNode>,
    vectors: BTreeMap<i64, TsVector>,
    children: BTreeMap<i64, BTreeSet<i64>>,
    parents: BTreeMap<i64, BTreeSet<i64>>,
}

impl OntologyDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node and recompute its search vector.
    pub fn add_node(&mut self, node: OntologyNode) {
        self.vectors
            .insert(node.id, ontology_vector(&node.name, node.code().as_deref()));
        self.nodes.insert(node.id, node);
    }

    pub fn get_node(&self, id: i64) -> Result<&OntologyNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("ontology node {id}")))
    }

    pub fn contains(&self, id: i64) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &OntologyNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn search_vector(&self, id: i64) -> Option<&TsVector> {
        self.vectors.get(&id)
    }

    /// Add `parent -> child`. Returns `false` when the edge already exists.
    pub fn add_edge(&mut self, parent: i64, child: i64) -> Result<bool> {
        self.get_node(parent)?;
        self.get_node(child)?;
        if parent == child || self.descendants(child).any(|id| id == parent) {
            return Err(Error::Cycle { parent, child });
        }
        let inserted = self.children.entry(parent).or_default().insert(child);
        self.parents.entry(child).or_default().insert(parent);
        Ok(inserted)
    }

    pub fn edges(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.children
            .iter()
            .flat_map(|(parent, children)| children.iter().map(move |child| (*parent, *child)))
    }

    pub fn children_of(&self, id: i64) -> impl Iterator<Item = i64> + '_ {
        self.children.get(&id).into_iter().flatten().copied()
    }

    pub fn parents_of(&self, id: i64) -> impl Iterator<Item = i64> + '_ {
        self.parents.get(&id).into_iter().flatten().copied()
    }

    /// Lazy breadth-first walk over everything below `id`, excluding `id`.
    pub fn descendants(&self, id: i64) -> Walk<'_> {
        Walk::new(&self.children, id)
    }

    /// Lazy breadth-first walk over everything above `id`, excluding `id`.
    pub fn ancestors(&self, id: i64) -> Walk<'_> {
        Walk::new(&self.parents, id)
    }

    /// True iff some candidate has some element of `parents` as an ancestor.
    pub fn is_descendant(&self, parents: &BTreeSet<i64>, candidates: &BTreeSet<i64>) -> bool {
        if parents.is_empty() {
            return false;
        }
        candidates
            .iter()
            .any(|candidate| self.ancestors(*candidate).any(|a| parents.contains(&a)))
    }

    /// `ids` together with all of their descendants.
    pub fn expand(&self, ids: &BTreeSet<i64>) -> BTreeSet<i64> {
        let mut out = ids.clone();
        for id in ids {
            out.extend(self.descendants(*id));
        }
        out
    }

    /// Nodes of `type_id` without parents, ordered by name.
    pub fn roots(&self, type_id: i32) -> Vec<&OntologyNode> {
        let mut roots: Vec<&OntologyNode> = self
            .nodes
            .values()
            .filter(|n| n.type_id == type_id)
            .filter(|n| self.parents.get(&n.id).map_or(true, BTreeSet::is_empty))
            .collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        roots
    }

    /// Rank nodes against `query`, optionally restricted to one type.
    /// Results are ordered by score descending then id.
    pub fn search(
        &self,
        query: &str,
        type_id: Option<i32>,
        weights: &SearchWeights,
    ) -> Vec<(i64, f64)> {
        let Some(scorer) = TextScorer::new(query, *weights) else {
            return Vec::new();
        };
        let mut hits: Vec<(i64, f64)> = self
            .nodes
            .values()
            .filter(|n| type_id.map_or(true, |t| n.type_id == t))
            .filter_map(|n| {
                let vector = self.vectors.get(&n.id)?;
                let code = n.code().unwrap_or_default();
                scorer
                    .score(vector, &[n.name.as_str(), code.as_str()])
                    .map(|m| (n.id, m.score))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits
    }
}

/// Breadth-first traversal that visits each node at most once.
pub struct Walk<'a> {
    edges: &'a BTreeMap<i64, BTreeSet<i64>>,
    queue: VecDeque<i64>,
    seen: HashSet<i64>,
}

impl<'a> Walk<'a> {
    fn new(edges: &'a BTreeMap<i64, BTreeSet<i64>>, start: i64) -> Self {
        let mut walk = Self {
            edges,
            queue: VecDeque::new(),
            seen: HashSet::from([start]),
        };
        walk.enqueue_from(start);
        walk
    }

    fn enqueue_from(&mut self, id: i64) {
        if let Some(next) = self.edges.get(&id) {
            for n in next {
                if self.seen.insert(*n) {
                    self.queue.push_back(*n);
                }
            }
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let id = self.queue.pop_front()?;
        self.enqueue_from(id);
        Some(id)
    }
}
