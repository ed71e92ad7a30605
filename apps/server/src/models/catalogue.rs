//! Reference data: Brands, templates, data sources, tags and coding systems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Brand {
    pub id: i32,
    /// Upper-case URL segment, e.g. `HDRUK`.
    pub name: String,
    #[serde(default)]
    pub site_title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub logo_path: Option<String>,
    #[serde(default)]
    pub swagger_title: Option<String>,
    #[serde(default)]
    pub admins: Vec<i64>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub map_rules: Value,
}

/// Template version. `definition` is opaque to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Template {
    pub id: i64,
    pub version_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub definition: Value,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Tag,
    Collection,
}

impl TagType {
    pub fn code(self) -> i16 {
        match self {
            TagType::Tag => 1,
            TagType::Collection => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(TagType::Tag),
            2 => Some(TagType::Collection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Tag {
    pub id: i64,
    pub description: String,
    #[serde(default)]
    pub display: Option<String>,
    #[schema(value_type = String)]
    pub tag_type: TagType,
    /// Brand a collection belongs to.
    #[serde(default)]
    pub collection_brand: Option<i32>,
}

/// Registry entry of a clinical terminology and the table holding its codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CodingSystem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(skip_serializing)]
    pub table_name: String,
    #[serde(skip_serializing)]
    pub code_column_name: String,
    #[serde(skip_serializing)]
    pub desc_column_name: String,
}

impl CodingSystem {
    /// Table and column names are interpolated into SQL, so they must be
    /// plain lower-case identifiers.
    pub fn has_safe_identifiers(&self) -> bool {
        [&self.table_name, &self.code_column_name, &self.desc_column_name]
            .iter()
            .all(|name| is_identifier(name))
    }
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}

/// A code matched by a catalogue look-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CodeEntry {
    pub code: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        assert!(is_identifier("icd10_codes"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("Codes"));
        assert!(!is_identifier("codes; drop table users"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1codes"));
    }

    #[test]
    fn unsafe_coding_system_is_flagged() {
        let system = CodingSystem {
            id: 1,
            name: "ICD10".into(),
            description: String::new(),
            link: None,
            table_name: "icd10_codes".into(),
            code_column_name: "code".into(),
            desc_column_name: "description\"".into(),
        };
        assert!(!system.has_safe_identifiers());
    }
}
