//! Concept tree resolution.
//!
//! A concept version owns ordered components. Code-list and expression
//! components contribute codes; child-concept components pull in another
//! concept version. [`resolve_tree`] walks the structure depth first and
//! produces every row through which a code enters the tree, then folds the
//! rows into the final code list.
//!
//! Loops are broken with the set of concepts on the current path: a child
//! concept already on the path is listed but not expanded.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentType {
    ChildConcept,
    Codelist,
    Expression,
    ExpressionSelect,
}

impl ComponentType {
    pub fn code(self) -> i16 {
        match self {
            ComponentType::ChildConcept => 1,
            ComponentType::Codelist => 2,
            ComponentType::Expression => 3,
            ComponentType::ExpressionSelect => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(ComponentType::ChildConcept),
            2 => Some(ComponentType::Codelist),
            3 => Some(ComponentType::Expression),
            4 => Some(ComponentType::ExpressionSelect),
            _ => None,
        }
    }

    pub fn is_expression(self) -> bool {
        matches!(self, ComponentType::Expression | ComponentType::ExpressionSelect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalType {
    Include,
    Exclude,
}

impl LogicalType {
    pub fn code(self) -> i16 {
        match self {
            LogicalType::Include => 1,
            LogicalType::Exclude => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(LogicalType::Include),
            2 => Some(LogicalType::Exclude),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRow {
    pub code: String,
    pub description: String,
}

impl CodeRow {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }
}

/// Which column of a coding system an expression is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnSearch {
    #[default]
    Code,
    Description,
    Both,
}

impl ColumnSearch {
    pub fn code(self) -> i16 {
        match self {
            ColumnSearch::Code => 1,
            ColumnSearch::Description => 2,
            ColumnSearch::Both => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(ColumnSearch::Code),
            2 => Some(ColumnSearch::Description),
            3 => Some(ColumnSearch::Both),
            _ => None,
        }
    }
}

/// Pattern of an expression component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRegex {
    pub regex: String,
    #[serde(default)]
    pub column_search: ColumnSearch,
}

impl CodeRegex {
    /// Select the rows of `catalogue` matched by the pattern, in catalogue order.
    /// Matching is case-insensitive and unanchored, like `~*` in PostgreSQL.
    pub fn materialize(&self, catalogue: &[CodeRow]) -> Result<Vec<CodeRow>> {
        let re = RegexBuilder::new(&self.regex)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Validation(format!("invalid code regex: {e}")))?;
        Ok(catalogue
            .iter()
            .filter(|row| match self.column_search {
                ColumnSearch::Code => re.is_match(&row.code),
                ColumnSearch::Description => re.is_match(&row.description),
                ColumnSearch::Both => re.is_match(&row.code) || re.is_match(&row.description),
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptRef {
    pub concept_id: i64,
    pub history_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: i64,
    pub name: String,
    pub component_type: ComponentType,
    pub logical_type: LogicalType,
    /// Stored or materialised codes. Empty for child-concept components.
    #[serde(default)]
    pub codes: Vec<CodeRow>,
    #[serde(default)]
    pub code_regex: Option<CodeRegex>,
    #[serde(default)]
    pub concept_ref: Option<ConceptRef>,
}

/// One immutable version of a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptVersion {
    pub id: i64,
    pub history_id: i64,
    pub name: String,
    pub coding_system_id: Option<i64>,
    pub is_deleted: bool,
    pub components: Vec<Component>,
}

impl ConceptVersion {
    pub fn key(&self) -> ConceptRef {
        ConceptRef {
            concept_id: self.id,
            history_id: self.history_id,
        }
    }

    /// Child concepts referenced directly by this version.
    pub fn child_refs(&self) -> impl Iterator<Item = ConceptRef> + '_ {
        self.components
            .iter()
            .filter(|c| c.component_type == ComponentType::ChildConcept)
            .filter_map(|c| c.concept_ref)
    }
}

/// Read access to concept versions during a resolution.
pub trait ConceptSource {
    fn concept_version(&self, key: ConceptRef) -> Option<&ConceptVersion>;
}

impl ConceptSource for HashMap<ConceptRef, ConceptVersion> {
    fn concept_version(&self, key: ConceptRef) -> Option<&ConceptVersion> {
        self.get(&key)
    }
}

impl ConceptSource for BTreeMap<ConceptRef, ConceptVersion> {
    fn concept_version(&self, key: ConceptRef) -> Option<&ConceptVersion> {
        self.get(&key)
    }
}

/// A row of the component structure tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRow {
    pub code: String,
    pub description: String,
    /// Set on the marker row of a child-concept component.
    pub concept_ref_id: Option<i64>,
    pub concept_ref_history_id: Option<i64>,
    /// Concept that owns the component.
    pub concept_id: i64,
    pub component_id: i64,
    pub logical_type: LogicalType,
    pub component_type: ComponentType,
    /// Root components are at depth 1.
    pub level_depth: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub rows: Vec<TreeRow>,
    /// Included codes minus excluded codes, sorted by code.
    pub codes: Vec<CodeRow>,
}

/// Resolve `root` against `source`.
///
/// A deleted root resolves to an empty result. Children that are deleted
/// or missing from `source` are listed but contribute nothing.
pub fn resolve_tree(source: &dyn ConceptSource, root: ConceptRef) -> Result<Resolution> {
    let concept = source.concept_version(root).ok_or_else(|| {
        Error::NotFound(format!(
            "concept C{} version {}",
            root.concept_id, root.history_id
        ))
    })?;
    if concept.is_deleted {
        return Ok(Resolution::default());
    }

    let mut rows = Vec::new();
    let mut path = BTreeSet::new();
    walk(source, concept, 1, false, &mut path, &mut rows);
    let codes = final_codes(&rows);
    Ok(Resolution { rows, codes })
}

fn walk(
    source: &dyn ConceptSource,
    concept: &ConceptVersion,
    depth: u32,
    excluded: bool,
    path: &mut BTreeSet<i64>,
    rows: &mut Vec<TreeRow>,
) {
    path.insert(concept.id);

    for component in &concept.components {
        // Inside an excluded child only its inclusions matter; they are
        // carried up as exclusions.
        let logical_type = match (excluded, component.logical_type) {
            (false, lt) => lt,
            (true, LogicalType::Include) => LogicalType::Exclude,
            (true, LogicalType::Exclude) => continue,
        };

        match component.component_type {
            ComponentType::ChildConcept => {
                let Some(child_ref) = component.concept_ref else {
                    continue;
                };
                let child = source.concept_version(child_ref);
                rows.push(TreeRow {
                    code: String::new(),
                    description: child.map(|c| c.name.clone()).unwrap_or_default(),
                    concept_ref_id: Some(child_ref.concept_id),
                    concept_ref_history_id: Some(child_ref.history_id),
                    concept_id: concept.id,
                    component_id: component.id,
                    logical_type,
                    component_type: component.component_type,
                    level_depth: depth,
                });
                let Some(child) = child else {
                    continue;
                };
                if child.is_deleted || path.contains(&child.id) {
                    continue;
                }
                let child_excluded = logical_type == LogicalType::Exclude;
                walk(source, child, depth + 1, child_excluded, path, rows);
            }
            _ => {
                rows.extend(component.codes.iter().map(|code| TreeRow {
                    code: code.code.clone(),
                    description: code.description.clone(),
                    concept_ref_id: None,
                    concept_ref_history_id: None,
                    concept_id: concept.id,
                    component_id: component.id,
                    logical_type,
                    component_type: component.component_type,
                    level_depth: depth,
                }));
            }
        }
    }

    path.remove(&concept.id);
}

/// Fold tree rows into the final code list.
pub fn final_codes(rows: &[TreeRow]) -> Vec<CodeRow> {
    let excluded: BTreeSet<&str> = rows
        .iter()
        .filter(|r| r.logical_type == LogicalType::Exclude && !r.code.is_empty())
        .map(|r| r.code.as_str())
        .collect();

    let mut included: BTreeMap<&str, &str> = BTreeMap::new();
    for row in rows {
        if row.logical_type != LogicalType::Include || row.code.trim().is_empty() {
            continue;
        }
        if excluded.contains(row.code.as_str()) {
            continue;
        }
        included
            .entry(row.code.as_str())
            .or_insert(row.description.as_str());
    }

    included
        .into_iter()
        .map(|(code, description)| CodeRow::new(code, description))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codelist(id: i64, lt: LogicalType, codes: &[(&str, &str)]) -> Component {
        Component {
            id,
            name: format!("component {id}"),
            component_type: ComponentType::Codelist,
            logical_type: lt,
            codes: codes.iter().map(|(c, d)| CodeRow::new(*c, *d)).collect(),
            code_regex: None,
            concept_ref: None,
        }
    }

    fn child(id: i64, lt: LogicalType, concept_id: i64) -> Component {
        Component {
            id,
            name: format!("child {concept_id}"),
            component_type: ComponentType::ChildConcept,
            logical_type: lt,
            codes: Vec::new(),
            code_regex: None,
            concept_ref: Some(ConceptRef {
                concept_id,
                history_id: 1,
            }),
        }
    }

    fn concept(id: i64, components: Vec<Component>) -> ConceptVersion {
        ConceptVersion {
            id,
            history_id: 1,
            name: format!("C{id}"),
            coding_system_id: Some(1),
            is_deleted: false,
            components,
        }
    }

    fn source(concepts: Vec<ConceptVersion>) -> HashMap<ConceptRef, ConceptVersion> {
        concepts.into_iter().map(|c| (c.key(), c)).collect()
    }

    fn root(id: i64) -> ConceptRef {
        ConceptRef {
            concept_id: id,
            history_id: 1,
        }
    }

    fn codes(res: &Resolution) -> Vec<&str> {
        res.codes.iter().map(|c| c.code.as_str()).collect()
    }

    #[test]
    fn cyclic_references_terminate() {
        let src = source(vec![
            concept(
                1,
                vec![
                    codelist(10, LogicalType::Include, &[("A01", "a one"), ("A02", "a two")]),
                    child(11, LogicalType::Include, 2),
                ],
            ),
            concept(
                2,
                vec![
                    codelist(20, LogicalType::Include, &[("B01", "b one")]),
                    codelist(21, LogicalType::Exclude, &[("A02", "a two")]),
                    child(22, LogicalType::Include, 3),
                ],
            ),
            concept(
                3,
                vec![
                    codelist(30, LogicalType::Include, &[("C01", "c one")]),
                    child(31, LogicalType::Include, 1),
                ],
            ),
        ]);

        let res = resolve_tree(&src, root(1)).unwrap();
        assert_eq!(codes(&res), vec!["A01", "B01", "C01"]);

        let back_edge = res
            .rows
            .iter()
            .find(|r| r.component_id == 31)
            .unwrap();
        assert_eq!(back_edge.concept_ref_id, Some(1));
        assert_eq!(back_edge.level_depth, 3);
        assert_eq!(res.rows.iter().filter(|r| r.concept_id == 1).count(), 3);
    }

    #[test]
    fn resolution_is_idempotent() {
        let src = source(vec![
            concept(1, vec![child(11, LogicalType::Include, 2)]),
            concept(2, vec![codelist(20, LogicalType::Include, &[("X", "x")])]),
        ]);
        let first = resolve_tree(&src, root(1)).unwrap();
        let second = resolve_tree(&src, root(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.rows[1].level_depth, 2);
    }

    #[test]
    fn excluded_child_removes_its_codes() {
        let src = source(vec![
            concept(
                1,
                vec![
                    codelist(10, LogicalType::Include, &[("E10", "dm1"), ("E11", "dm2")]),
                    child(11, LogicalType::Exclude, 2),
                ],
            ),
            concept(
                2,
                vec![
                    codelist(20, LogicalType::Include, &[("E10", "dm1")]),
                    codelist(21, LogicalType::Exclude, &[("E11", "dm2")]),
                ],
            ),
        ]);
        let res = resolve_tree(&src, root(1)).unwrap();
        assert_eq!(codes(&res), vec!["E11"]);
    }

    #[test]
    fn deleted_root_is_empty_and_deleted_child_contributes_nothing() {
        let mut deleted = concept(1, vec![codelist(10, LogicalType::Include, &[("A", "a")])]);
        deleted.is_deleted = true;
        let src = source(vec![deleted]);
        assert_eq!(resolve_tree(&src, root(1)).unwrap(), Resolution::default());

        let mut gone = concept(2, vec![codelist(20, LogicalType::Include, &[("B", "b")])]);
        gone.is_deleted = true;
        let src = source(vec![
            concept(
                1,
                vec![
                    codelist(10, LogicalType::Include, &[("A", "a")]),
                    child(11, LogicalType::Include, 2),
                ],
            ),
            gone,
        ]);
        assert_eq!(codes(&resolve_tree(&src, root(1)).unwrap()), vec!["A"]);
    }

    #[test]
    fn missing_root_is_not_found() {
        let src = source(vec![]);
        assert!(matches!(resolve_tree(&src, root(5)), Err(Error::NotFound(_))));
    }

    #[test]
    fn first_description_wins_and_empty_codes_are_dropped() {
        let src = source(vec![concept(
            1,
            vec![
                codelist(10, LogicalType::Include, &[("B2", "first"), ("", "blank"), ("A1", "a")]),
                codelist(11, LogicalType::Include, &[("B2", "second")]),
            ],
        )]);
        let res = resolve_tree(&src, root(1)).unwrap();
        assert_eq!(
            res.codes,
            vec![CodeRow::new("A1", "a"), CodeRow::new("B2", "first")]
        );
        assert_eq!(res.rows.len(), 4);
    }

    #[test]
    fn expression_materialises_matching_rows() {
        let catalogue = vec![
            CodeRow::new("E10", "Type 1 diabetes mellitus"),
            CodeRow::new("E11", "Type 2 diabetes mellitus"),
            CodeRow::new("I10", "Essential hypertension"),
        ];
        let by_code = CodeRegex {
            regex: "^E1".into(),
            column_search: ColumnSearch::Code,
        };
        assert_eq!(by_code.materialize(&catalogue).unwrap().len(), 2);

        let by_description = CodeRegex {
            regex: "HYPERTENSION".into(),
            column_search: ColumnSearch::Description,
        };
        assert_eq!(
            by_description.materialize(&catalogue).unwrap(),
            vec![CodeRow::new("I10", "Essential hypertension")]
        );

        let bad = CodeRegex {
            regex: "(".into(),
            column_search: ColumnSearch::Both,
        };
        assert!(matches!(bad.materialize(&catalogue), Err(Error::Validation(_))));
    }
}
