use phenolib_core::ontology::OntologyNode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Ontology node types seeded by the initial migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OntologyType {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct NodeRef {
    pub id: i64,
    pub name: String,
}

impl From<&OntologyNode> for NodeRef {
    fn from(node: &OntologyNode) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OntologyNodeView {
    pub id: i64,
    pub name: String,
    pub type_id: i32,
    pub code: Option<String>,
    #[schema(value_type = Object)]
    pub properties: Value,
    pub parents: Vec<NodeRef>,
    pub children: Vec<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl OntologyNodeView {
    pub fn new(node: &OntologyNode, parents: &[OntologyNode], children: &[OntologyNode]) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            type_id: node.type_id,
            code: node.code(),
            properties: node.properties.clone(),
            parents: parents.iter().map(NodeRef::from).collect(),
            children: children.iter().map(NodeRef::from).collect(),
            score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct NewEdge {
    pub parent_id: i64,
    pub child_id: i64,
}
