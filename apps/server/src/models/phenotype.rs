use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use phenolib_core::access::{AccessLevel, Ownership, Subject};
use phenolib_core::documents::template_ids;
use phenolib_core::publication::{ApprovalStatus, PublicationRecord};
use phenolib_core::search::{FacetView, Ordering, PageWindow, SearchFilters, SearchWeights};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

/// `template_data` keys holding facet ids.
pub const CODING_SYSTEM_KEY: &str = "coding_system";
pub const DATA_SOURCE_KEY: &str = "data_sources";
pub const TAG_KEY: &str = "tags";
pub const COLLECTION_KEY: &str = "collections";
pub const ONTOLOGY_KEY: &str = "ontology";
pub const CONCEPT_KEY: &str = "concept_information";

/// One version of a phenotype, either the current head or a history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Phenotype {
    pub id: String,
    pub history_id: i64,
    pub name: String,
    pub author: String,
    pub definition: String,
    pub implementation: String,
    pub validation: String,
    pub template_id: Option<i64>,
    pub template_version: Option<i64>,
    #[schema(value_type = Object)]
    pub template_data: Value,
    pub owner_id: Option<i64>,
    pub group_id: Option<i64>,
    #[schema(value_type = String)]
    pub owner_access: AccessLevel,
    #[schema(value_type = String)]
    pub group_access: AccessLevel,
    #[schema(value_type = String)]
    pub world_access: AccessLevel,
    pub brands: Vec<i32>,
    pub is_deleted: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
}

impl Phenotype {
    pub fn ownership(&self) -> Ownership {
        Ownership {
            owner_id: self.owner_id,
            group_id: self.group_id,
            owner_access: self.owner_access,
            group_access: self.group_access,
            world_access: self.world_access,
            brands: self.brands.clone(),
            is_deleted: self.is_deleted,
        }
    }

    pub fn facets(&self) -> Facets {
        Facets {
            coding_systems: template_ids(&self.template_data, CODING_SYSTEM_KEY),
            data_sources: template_ids(&self.template_data, DATA_SOURCE_KEY),
            tags: template_ids(&self.template_data, TAG_KEY),
            collections: template_ids(&self.template_data, COLLECTION_KEY),
            ontology: template_ids(&self.template_data, ONTOLOGY_KEY),
        }
    }
}

/// Facet ids extracted from `template_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facets {
    pub coding_systems: Vec<i64>,
    pub data_sources: Vec<i64>,
    pub tags: Vec<i64>,
    pub collections: Vec<i64>,
    pub ontology: Vec<i64>,
}

impl Facets {
    pub fn view<'a>(
        &'a self,
        phenotype: &'a Phenotype,
        publish_status: Option<ApprovalStatus>,
    ) -> FacetView<'a> {
        FacetView {
            coding_systems: &self.coding_systems,
            data_sources: &self.data_sources,
            tags: &self.tags,
            collections: &self.collections,
            ontology: &self.ontology,
            template_id: phenotype.template_id,
            publish_status,
            author: &phenotype.author,
            owner_id: phenotype.owner_id,
            created: phenotype.created,
        }
    }
}

fn validate_template_data(value: &Value) -> Result<(), ValidationError> {
    match value {
        Value::Null | Value::Object(_) => Ok(()),
        _ => Err(ValidationError::new("template_data must be an object")),
    }
}

/// Editable fields of a phenotype, as submitted by clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct PhenotypeInput {
    #[validate(length(min = 1, max = 250))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub author: String,
    #[validate(length(max = 50000))]
    pub definition: String,
    #[validate(length(max = 50000))]
    pub implementation: String,
    #[validate(length(max = 50000))]
    pub validation: String,
    pub template_id: Option<i64>,
    #[validate(custom(function = "validate_template_data"))]
    #[schema(value_type = Object)]
    pub template_data: Value,
    pub group_id: Option<i64>,
    #[schema(value_type = Option<String>)]
    pub group_access: Option<AccessLevel>,
    #[schema(value_type = Option<String>)]
    pub world_access: Option<AccessLevel>,
    pub brands: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdatePhenotypeRequest {
    #[validate(length(min = 3, max = 50))]
    pub id: String,
    #[serde(flatten)]
    #[validate(nested)]
    pub fields: PhenotypeInput,
}

/// A fully-resolved version ready to be appended to the history log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPhenotypeVersion {
    pub name: String,
    pub author: String,
    pub definition: String,
    pub implementation: String,
    pub validation: String,
    pub template_id: Option<i64>,
    pub template_version: Option<i64>,
    pub template_data: Value,
    pub owner_id: Option<i64>,
    pub group_id: Option<i64>,
    pub owner_access: AccessLevel,
    pub group_access: AccessLevel,
    pub world_access: AccessLevel,
    pub brands: Vec<i32>,
    pub is_deleted: bool,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PhenotypeDetail {
    #[serde(flatten)]
    pub phenotype: Phenotype,
    #[schema(value_type = Option<String>)]
    pub publish_status: Option<ApprovalStatus>,
    pub is_latest: bool,
    pub can_edit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PhenotypeSummary {
    pub id: String,
    pub history_id: i64,
    pub name: String,
    pub author: String,
    pub template_id: Option<i64>,
    #[schema(value_type = Option<String>)]
    pub publish_status: Option<ApprovalStatus>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct VersionInfo {
    pub version_id: i64,
    pub name: String,
    pub updated: DateTime<Utc>,
    pub updated_by: Option<i64>,
    pub is_latest: bool,
    #[schema(value_type = Option<String>)]
    pub publish_status: Option<ApprovalStatus>,
}

/// A publication attempt as shown to moderators and owners.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PublicationView {
    pub id: i64,
    pub entity_id: String,
    pub entity_history_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[schema(value_type = String)]
    pub status: ApprovalStatus,
    pub created_by: Option<i64>,
    pub moderator_id: Option<i64>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

impl From<PublicationRecord> for PublicationView {
    fn from(r: PublicationRecord) -> Self {
        Self {
            id: r.id,
            entity_id: r.entity_id,
            entity_history_id: r.entity_history_id,
            name: None,
            status: r.status,
            created_by: r.created_by,
            moderator_id: r.moderator_id,
            created: r.created,
            modified: r.modified,
            decided_at: r.decided_at,
            comment: r.comment,
        }
    }
}

/// Fully-resolved search, built by the search service.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub text: Option<String>,
    pub filters: SearchFilters,
    /// `filters.ontology` expanded with every descendant.
    pub ontology_scope: BTreeSet<i64>,
    pub brand_id: Option<i32>,
    pub subject: Subject,
    pub ordering: Ordering,
    pub page: Option<i64>,
    pub page_size: u32,
    pub weights: SearchWeights,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    #[serde(flatten)]
    pub window: PageWindow,
    pub data: Vec<PhenotypeSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn facets_come_from_template_data() {
        let phenotype = Phenotype {
            id: "PH1".into(),
            history_id: 1,
            name: "Asthma".into(),
            author: String::new(),
            definition: String::new(),
            implementation: String::new(),
            validation: String::new(),
            template_id: Some(1),
            template_version: Some(1),
            template_data: json!({
                "coding_system": [4, "5"],
                "ontology": [{"id": 12}],
                "collections": [],
            }),
            owner_id: None,
            group_id: None,
            owner_access: AccessLevel::Edit,
            group_access: AccessLevel::None,
            world_access: AccessLevel::None,
            brands: vec![],
            is_deleted: false,
            created: Utc::now(),
            updated: Utc::now(),
            created_by: None,
            updated_by: None,
        };
        let facets = phenotype.facets();
        assert_eq!(facets.coding_systems, vec![4, 5]);
        assert_eq!(facets.ontology, vec![12]);
        assert!(facets.collections.is_empty());
    }

    #[test]
    fn template_data_must_be_an_object() {
        let input = PhenotypeInput {
            name: "Asthma".into(),
            template_data: json!([1, 2]),
            ..Default::default()
        };
        assert!(input.validate().is_err());

        let input = PhenotypeInput {
            name: "Asthma".into(),
            template_data: json!({"ontology": [1]}),
            ..Default::default()
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn empty_name_is_rejected() {
        let input = PhenotypeInput::default();
        assert!(input.validate().is_err());
    }

    #[test]
    fn update_request_flattens_fields() {
        let req: UpdatePhenotypeRequest =
            serde_json::from_value(json!({"id": "PH3", "name": "COPD"})).unwrap();
        assert_eq!(req.id, "PH3");
        assert_eq!(req.fields.name, "COPD");
        assert!(req.validate().is_ok());
    }
}
