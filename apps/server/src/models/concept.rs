use chrono::{DateTime, Utc};
use phenolib_core::access::{AccessLevel, Ownership};
use phenolib_core::concept::{CodeRegex, Component, ConceptVersion};
use phenolib_core::search::PageWindow;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Metadata of one concept version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Concept {
    pub id: i64,
    pub history_id: i64,
    pub name: String,
    pub description: String,
    pub author: String,
    pub coding_system_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub group_id: Option<i64>,
    #[schema(value_type = String)]
    pub owner_access: AccessLevel,
    #[schema(value_type = String)]
    pub group_access: AccessLevel,
    #[schema(value_type = String)]
    pub world_access: AccessLevel,
    pub is_deleted: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Concept {
    /// Concepts are not Brand-scoped.
    pub fn ownership(&self) -> Ownership {
        Ownership {
            owner_id: self.owner_id,
            group_id: self.group_id,
            owner_access: self.owner_access,
            group_access: self.group_access,
            world_access: self.world_access,
            brands: Vec::new(),
            is_deleted: self.is_deleted,
        }
    }

    /// Public identifier, `C123`.
    pub fn public_id(&self) -> String {
        format!("C{}", self.id)
    }
}

/// A component as listed on the concept detail endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ConceptComponentView {
    pub id: i64,
    pub name: String,
    pub component_type: String,
    pub logical_type: String,
    pub code_count: usize,
    #[schema(value_type = Option<Object>)]
    pub code_regex: Option<CodeRegex>,
    pub concept_ref_id: Option<i64>,
    pub concept_ref_history_id: Option<i64>,
}

impl From<&Component> for ConceptComponentView {
    fn from(c: &Component) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            component_type: format!("{:?}", c.component_type).to_ascii_uppercase(),
            logical_type: format!("{:?}", c.logical_type).to_ascii_uppercase(),
            code_count: c.codes.len(),
            code_regex: c.code_regex.clone(),
            concept_ref_id: c.concept_ref.map(|r| r.concept_id),
            concept_ref_history_id: c.concept_ref.map(|r| r.history_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConceptDetail {
    pub concept_id: String,
    #[serde(flatten)]
    pub concept: Concept,
    pub coding_system: Option<String>,
    pub components: Vec<ConceptComponentView>,
    pub is_latest: bool,
}

/// A new concept version. Expression components carry only their pattern;
/// the store materialises their codes from the coding system.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptWrite {
    /// `None` creates a new concept.
    pub id: Option<i64>,
    pub name: String,
    pub description: String,
    pub author: String,
    pub coding_system_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub group_id: Option<i64>,
    pub owner_access: AccessLevel,
    pub group_access: AccessLevel,
    pub world_access: AccessLevel,
    pub components: Vec<Component>,
    pub user_id: Option<i64>,
}

/// A resolved code row in an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ExportedCode {
    pub code: String,
    pub description: String,
    pub concept_id: String,
    pub concept_version_id: i64,
    pub concept_name: String,
    pub coding_system: Option<String>,
}

/// A stored concept version with its components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub concept: Concept,
    pub components: Vec<Component>,
}

impl ConceptRecord {
    pub fn version(&self) -> ConceptVersion {
        ConceptVersion {
            id: self.concept.id,
            history_id: self.concept.history_id,
            name: self.concept.name.clone(),
            coding_system_id: self.concept.coding_system_id,
            is_deleted: self.concept.is_deleted,
            components: self.components.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConceptPage {
    #[serde(flatten)]
    pub window: PageWindow,
    pub data: Vec<Concept>,
}
