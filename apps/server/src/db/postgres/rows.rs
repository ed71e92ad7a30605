//! Column lists and row mappers shared by the PostgreSQL repositories.

use phenolib_core::access::AccessLevel;
use phenolib_core::concept::{
    CodeRegex, CodeRow, ColumnSearch, Component, ComponentType, ConceptRef, LogicalType,
};
use phenolib_core::ontology::OntologyNode;
use phenolib_core::publication::{ApprovalStatus, PublicationRecord};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::models::{
    Brand, CodingSystem, Concept, DataSource, Phenotype, SessionRecord, Tag, TagType, Template,
};
use crate::{Error, Result};

pub const PHENOTYPE_COLUMNS: &[&str] = &[
    "id",
    "history_id",
    "name",
    "author",
    "definition",
    "implementation",
    "validation",
    "template_id",
    "template_version",
    "template_data",
    "owner_id",
    "group_id",
    "owner_access",
    "group_access",
    "world_access",
    "brands",
    "is_deleted",
    "created",
    "updated",
    "created_by",
    "updated_by",
];

pub const CONCEPT_COLUMNS: &str = "h.id, h.history_id, h.name, h.description, h.author, \
h.coding_system_id, h.owner_id, h.group_id, h.owner_access, h.group_access, h.world_access, \
h.is_deleted, h.created, h.updated";

pub const PUBLICATION_COLUMNS: &str = "id, entity_id, entity_history_id, approval_status, \
created_by, moderator_id, created, modified, decided_at, comment";

pub const ONTOLOGY_COLUMNS: &str = "t.id, t.type_id, t.name, t.properties";

/// `PHENOTYPE_COLUMNS` qualified with a table alias.
pub fn phenotype_columns(alias: &str) -> String {
    PHENOTYPE_COLUMNS
        .iter()
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn access(row: &PgRow, column: &str) -> Result<AccessLevel> {
    let code: i16 = row.get(column);
    AccessLevel::from_code(code)
        .ok_or_else(|| Error::Internal(format!("invalid {column} code {code}")))
}

pub fn phenotype(row: &PgRow) -> Result<Phenotype> {
    Ok(Phenotype {
        id: row.get("id"),
        history_id: row.get("history_id"),
        name: row.get("name"),
        author: row.get("author"),
        definition: row.get("definition"),
        implementation: row.get("implementation"),
        validation: row.get("validation"),
        template_id: row.get("template_id"),
        template_version: row.get("template_version"),
        template_data: row.get("template_data"),
        owner_id: row.get("owner_id"),
        group_id: row.get("group_id"),
        owner_access: access(row, "owner_access")?,
        group_access: access(row, "group_access")?,
        world_access: access(row, "world_access")?,
        brands: row.get("brands"),
        is_deleted: row.get("is_deleted"),
        created: row.get("created"),
        updated: row.get("updated"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
    })
}

pub fn approval_status(code: i16) -> Result<ApprovalStatus> {
    ApprovalStatus::from_code(code)
        .ok_or_else(|| Error::Internal(format!("invalid approval status {code}")))
}

pub fn publication(row: &PgRow) -> Result<PublicationRecord> {
    Ok(PublicationRecord {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        entity_history_id: row.get("entity_history_id"),
        status: approval_status(row.get("approval_status"))?,
        created_by: row.get("created_by"),
        moderator_id: row.get("moderator_id"),
        created: row.get("created"),
        modified: row.get("modified"),
        decided_at: row.get("decided_at"),
        comment: row.get("comment"),
    })
}

pub fn concept(row: &PgRow) -> Result<Concept> {
    Ok(Concept {
        id: row.get("id"),
        history_id: row.get("history_id"),
        name: row.get("name"),
        description: row.get("description"),
        author: row.get("author"),
        coding_system_id: row.get("coding_system_id"),
        owner_id: row.get("owner_id"),
        group_id: row.get("group_id"),
        owner_access: access(row, "owner_access")?,
        group_access: access(row, "group_access")?,
        world_access: access(row, "world_access")?,
        is_deleted: row.get("is_deleted"),
        created: row.get("created"),
        updated: row.get("updated"),
    })
}

/// A component row; `codes` is a JSON array of `{code, description}`.
pub fn component(row: &PgRow) -> Result<Component> {
    let type_code: i16 = row.get("component_type");
    let logical_code: i16 = row.get("logical_type");
    let component_type = ComponentType::from_code(type_code)
        .ok_or_else(|| Error::Internal(format!("invalid component type {type_code}")))?;
    let logical_type = LogicalType::from_code(logical_code)
        .ok_or_else(|| Error::Internal(format!("invalid logical type {logical_code}")))?;

    let regex: Option<String> = row.get("regex");
    let column_search: Option<i16> = row.get("column_search");
    let code_regex = regex.map(|regex| CodeRegex {
        regex,
        column_search: column_search
            .and_then(ColumnSearch::from_code)
            .unwrap_or_default(),
    });

    let ref_id: Option<i64> = row.get("concept_ref_id");
    let ref_history: Option<i64> = row.get("concept_ref_history_id");
    let concept_ref = ref_id.zip(ref_history).map(|(concept_id, history_id)| ConceptRef {
        concept_id,
        history_id,
    });

    let codes: Value = row.get("codes");
    let codes: Vec<CodeRow> = serde_json::from_value(codes)
        .map_err(|e| Error::Internal(format!("invalid component codes: {e}")))?;

    Ok(Component {
        id: row.get("id"),
        name: row.get("name"),
        component_type,
        logical_type,
        codes,
        code_regex,
        concept_ref,
    })
}

pub fn ontology_node(row: &PgRow) -> OntologyNode {
    OntologyNode {
        id: row.get("id"),
        type_id: row.get("type_id"),
        name: row.get("name"),
        properties: row.get("properties"),
    }
}

pub fn brand(row: &PgRow) -> Brand {
    Brand {
        id: row.get("id"),
        name: row.get("name"),
        site_title: row.get("site_title"),
        description: row.get("description"),
        logo_path: row.get("logo_path"),
        swagger_title: row.get("swagger_title"),
        admins: row.get("admins"),
        map_rules: row.get("map_rules"),
    }
}

pub fn template(row: &PgRow) -> Template {
    Template {
        id: row.get("id"),
        version_id: row.get("version_id"),
        name: row.get("name"),
        description: row.get("description"),
        definition: row.get("definition"),
        created: row.get("created"),
    }
}

pub fn data_source(row: &PgRow) -> DataSource {
    DataSource {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        description: row.get("description"),
        source: row.get("source"),
    }
}

pub fn tag(row: &PgRow) -> Result<Tag> {
    let code: i16 = row.get("tag_type");
    Ok(Tag {
        id: row.get("id"),
        description: row.get("description"),
        display: row.get("display"),
        tag_type: TagType::from_code(code)
            .ok_or_else(|| Error::Internal(format!("invalid tag type {code}")))?,
        collection_brand: row.get("collection_brand"),
    })
}

pub fn coding_system(row: &PgRow) -> CodingSystem {
    CodingSystem {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        link: row.get("link"),
        table_name: row.get("table_name"),
        code_column_name: row.get("code_column_name"),
        desc_column_name: row.get("desc_column_name"),
    }
}

pub fn session(row: &PgRow) -> SessionRecord {
    SessionRecord {
        key_hash: row.get("key_hash"),
        user_id: row.get("user_id"),
        created: row.get("created"),
        last_request: row.get("last_request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_columns_keep_order() {
        let columns = phenotype_columns("h");
        assert!(columns.starts_with("h.id, h.history_id, h.name"));
        assert!(columns.ends_with("h.updated_by"));
        assert_eq!(columns.matches("h.").count(), PHENOTYPE_COLUMNS.len());
    }
}
