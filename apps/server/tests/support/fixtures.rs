use axum::body::Bytes;
use phenolib_server::db::Seed;
use serde_json::{json, Value};

pub const OWNER: i64 = 1;
pub const OTHER_USER: i64 = 2;
pub const MODERATOR: i64 = 3;
pub const SUPERUSER: i64 = 4;

pub const HDRUK: i32 = 1;
pub const ADP: i32 = 2;

pub const HDRUK_SWAGGER_TITLE: &str = "HDR UK Phenotype Library API";

const CREATED: &str = "2024-01-10T09:00:00Z";

pub fn to_json_body(value: &Value) -> anyhow::Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

fn phenotype(
    id: &str,
    name: &str,
    definition: &str,
    brands: &[i32],
    template_data: Value,
) -> Value {
    json!({
        "id": id,
        "history_id": 1,
        "name": name,
        "author": "Kuan V, Denaxas S",
        "definition": definition,
        "implementation": "",
        "validation": "",
        "template_id": null,
        "template_version": null,
        "template_data": template_data,
        "owner_id": OWNER,
        "group_id": null,
        "owner_access": "EDIT",
        "group_access": "NONE",
        "world_access": "NONE",
        "brands": brands,
        "is_deleted": false,
        "created": CREATED,
        "updated": CREATED,
        "created_by": OWNER,
        "updated_by": OWNER,
    })
}

fn approval(id: i64, entity_id: &str) -> Value {
    json!({
        "id": id,
        "entity_id": entity_id,
        "entity_history_id": 1,
        "status": "APPROVED",
        "created_by": OWNER,
        "moderator_id": MODERATOR,
        "created": CREATED,
        "modified": CREATED,
        "decided_at": CREATED,
        "comment": null,
    })
}

fn codelist(id: i64, codes: &[(&str, &str)]) -> Value {
    let codes: Vec<Value> = codes
        .iter()
        .map(|(code, description)| json!({ "code": code, "description": description }))
        .collect();
    json!({
        "id": id,
        "name": format!("codes {id}"),
        "component_type": "CODELIST",
        "logical_type": "INCLUDE",
        "codes": codes,
    })
}

fn child_concept(id: i64, concept_id: i64) -> Value {
    json!({
        "id": id,
        "name": format!("child C{concept_id}"),
        "component_type": "CHILD_CONCEPT",
        "logical_type": "INCLUDE",
        "concept_ref": { "concept_id": concept_id, "history_id": 1 },
    })
}

fn concept(id: i64, name: &str, components: Vec<Value>) -> Value {
    json!({
        "concept": {
            "id": id,
            "history_id": 1,
            "name": name,
            "description": "",
            "author": "Kuan V",
            "coding_system_id": 4,
            "owner_id": OWNER,
            "group_id": null,
            "owner_access": "EDIT",
            "group_access": "NONE",
            "world_access": "NONE",
            "is_deleted": false,
            "created": CREATED,
            "updated": CREATED,
        },
        "components": components,
    })
}

/// Standard catalogue shared by the integration tests.
///
/// - PH1 (diabetes), PH2 (asthma) and PH3 (COPD, mentions asthma in its
///   definition) are approved under HDRUK.
/// - PH41 is an unpublished ADP draft, so the next created id is PH42.
/// - Concepts C1 -> C2 -> C3 -> C1 form a cycle; PH1 uses C1.
/// - Ontology edges 1->2, 2->3, 2->4; PH2 is tagged with node 3.
pub fn seed_value() -> Value {
    json!({
        "users": [
            { "id": OWNER, "username": "owner" },
            { "id": OTHER_USER, "username": "reader" },
            { "id": MODERATOR, "username": "moderator", "is_moderator": true },
            { "id": SUPERUSER, "username": "admin", "is_superuser": true },
        ],
        "brands": [
            {
                "id": HDRUK,
                "name": "HDRUK",
                "site_title": "HDR UK Phenotype Library",
                "swagger_title": HDRUK_SWAGGER_TITLE,
            },
            { "id": ADP, "name": "ADP", "site_title": "Alzheimer's Disease Phenotypes" },
        ],
        "data_sources": [
            { "id": 5, "name": "Hospital Episode Statistics", "url": "https://digital.nhs.uk" },
        ],
        "tags": [
            { "id": 1, "description": "Clinically reviewed", "tag_type": "tag" },
            { "id": 18, "description": "HDR UK Collection", "tag_type": "collection", "collection_brand": HDRUK },
            { "id": 19, "description": "ADP Collection", "tag_type": "collection", "collection_brand": ADP },
        ],
        "ontology_nodes": [
            { "id": 1, "type_id": 1, "name": "Respiratory" },
            { "id": 2, "type_id": 1, "name": "Asthma" },
            { "id": 3, "type_id": 1, "name": "Severe asthma" },
            { "id": 4, "type_id": 1, "name": "Childhood asthma" },
        ],
        "ontology_edges": [[1, 2], [2, 3], [2, 4]],
        "phenotypes": [
            phenotype(
                "PH1",
                "Type 2 diabetes",
                "Adults with a recorded diagnosis of type 2 diabetes mellitus.",
                &[HDRUK],
                json!({ "concept_information": [{ "concept_id": 1, "concept_version_id": 1 }] }),
            ),
            phenotype(
                "PH2",
                "Asthma",
                "Recorded diagnosis in primary care.",
                &[HDRUK],
                json!({ "ontology": [3] }),
            ),
            phenotype(
                "PH3",
                "Chronic obstructive pulmonary disease",
                "Excludes patients whose only respiratory diagnosis is asthma.",
                &[HDRUK],
                json!({}),
            ),
            phenotype("PH41", "Dementia draft", "Work in progress.", &[ADP], json!({})),
        ],
        "publications": [approval(1, "PH1"), approval(2, "PH2"), approval(3, "PH3")],
        "concepts": [
            concept(1, "Diabetes", vec![
                codelist(11, &[("E11", "Type 2 diabetes mellitus")]),
                child_concept(12, 2),
            ]),
            concept(2, "Diabetes without complications", vec![
                codelist(21, &[("E11.9", "Type 2 diabetes mellitus without complications")]),
                child_concept(22, 3),
            ]),
            concept(3, "Diabetes with hyperglycaemia", vec![
                codelist(31, &[("E11.65", "Type 2 diabetes mellitus with hyperglycaemia")]),
                child_concept(32, 1),
            ]),
        ],
    })
}

pub fn seed() -> anyhow::Result<Seed> {
    Ok(serde_json::from_value(seed_value())?)
}

pub fn new_phenotype(name: &str) -> Value {
    json!({
        "name": name,
        "author": "Test Author",
        "definition": format!("{name} as recorded in primary care."),
    })
}
