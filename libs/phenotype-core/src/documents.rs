//! Search-vector recomputation for phenotypes and ontology nodes.
//!
//! These functions mirror the database triggers exactly (same fields, same
//! weights, same concatenation order) so both storage backends agree on
//! every stored vector.

use phenolib_textsearch::{TsVector, Weight};
use serde_json::Value;

/// An ontology tag referenced by a phenotype, as used in its search vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntologyTerm {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
}

/// Fields of one phenotype version that feed its search vector.
#[derive(Debug, Clone, Copy)]
pub struct PhenotypeDocument<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub author: &'a str,
    pub definition: &'a str,
    pub implementation: &'a str,
    pub validation: &'a str,
    pub ontology: &'a [OntologyTerm],
}

/// `"name code"` of every referenced tag, ordered by tag id and joined by
/// spaces.
pub fn ontology_text(terms: &[OntologyTerm]) -> String {
    let mut sorted: Vec<&OntologyTerm> = terms.iter().collect();
    sorted.sort_by_key(|t| t.id);
    sorted
        .iter()
        .map(|t| format!("{} {}", t.name, t.code.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A: id, name, ontology text. B: author, definition. D: implementation,
/// validation.
pub fn phenotype_vector(doc: &PhenotypeDocument<'_>) -> TsVector {
    let ontology = ontology_text(doc.ontology);
    TsVector::weighted([
        (doc.id, Weight::A),
        (doc.name, Weight::A),
        (ontology.as_str(), Weight::A),
        (doc.author, Weight::B),
        (doc.definition, Weight::B),
        (doc.implementation, Weight::D),
        (doc.validation, Weight::D),
    ])
}

/// A: name. B: `properties.code`.
pub fn ontology_vector(name: &str, code: Option<&str>) -> TsVector {
    TsVector::weighted([(name, Weight::A), (code.unwrap_or(""), Weight::B)])
}

/// Integer ids stored under `key` in a phenotype's `template_data`.
///
/// Accepts numbers, numeric strings and objects carrying an `id` or `value`
/// field; anything else is skipped.
pub fn template_ids(template_data: &Value, key: &str) -> Vec<i64> {
    let Some(Value::Array(items)) = template_data.get(key) else {
        return Vec::new();
    };
    items.iter().filter_map(value_id).collect()
}

fn value_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => map.get("id").or_else(|| map.get("value")).and_then(value_id),
        _ => None,
    }
}

/// Concept references stored under `key`: objects with `concept_id` and
/// `concept_version_id`.
pub fn template_concepts(template_data: &Value, key: &str) -> Vec<(i64, i64)> {
    let Some(Value::Array(items)) = template_data.get(key) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("concept_id").and_then(value_id)?;
            let version = item.get("concept_version_id").and_then(value_id)?;
            Some((id, version))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phenotype_fields_are_weighted() {
        let terms = vec![OntologyTerm {
            id: 7,
            name: "Endocrine".into(),
            code: Some("E00-E90".into()),
        }];
        let doc = PhenotypeDocument {
            id: "PH1",
            name: "Diabetes",
            author: "Smith",
            definition: "",
            implementation: "Uses primary care records",
            validation: "",
            ontology: &terms,
        };
        let v = phenotype_vector(&doc);
        assert_eq!(v.positions("ph1")[0].weight, Weight::A);
        assert_eq!(v.positions("endocrin")[0].weight, Weight::A);
        assert_eq!(v.positions("smith")[0].weight, Weight::B);
        assert_eq!(v.positions("primari")[0].weight, Weight::D);
    }

    #[test]
    fn ontology_text_is_ordered_by_id() {
        let terms = vec![
            OntologyTerm {
                id: 9,
                name: "B".into(),
                code: None,
            },
            OntologyTerm {
                id: 2,
                name: "A".into(),
                code: Some("x1".into()),
            },
        ];
        assert_eq!(ontology_text(&terms), "A x1 B ");
    }

    #[test]
    fn node_vector_puts_code_at_weight_b() {
        let v = ontology_vector("Asthma", Some("J45"));
        assert_eq!(v.to_string(), "'asthma':1A 'j45':2B");
    }

    #[test]
    fn template_ids_accept_mixed_shapes() {
        let data = json!({"ontology": [1, "2", {"id": 3}, {"value": "4"}, null, "x"]});
        assert_eq!(template_ids(&data, "ontology"), vec![1, 2, 3, 4]);
        assert!(template_ids(&data, "missing").is_empty());
    }

    #[test]
    fn concept_references_need_both_ids() {
        let data = json!({"concept_information": [
            {"concept_id": 5, "concept_version_id": 12},
            {"concept_id": 6}
        ]});
        assert_eq!(template_concepts(&data, "concept_information"), vec![(5, 12)]);
    }
}
