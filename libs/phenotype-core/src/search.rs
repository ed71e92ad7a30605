//! Text scoring, facet filters, ordering and pagination for phenotype search.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use phenolib_textsearch::{rank_cd, trigram, TsQuery, TsVector, DEFAULT_WEIGHTS};
use serde::{Deserialize, Serialize};

use crate::publication::ApprovalStatus;
use crate::{Error, Result};

/// Queries shorter than this (in characters) skip trigram matching.
pub const MIN_TRIGRAM_QUERY_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWeights {
    pub lexical: f64,
    pub trigram: f64,
    /// Minimum trigram similarity that admits a row without a lexical match.
    pub trigram_floor: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            lexical: 1.0,
            trigram: 0.1,
            trigram_floor: trigram::DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextMatch {
    pub lexical: f64,
    pub trigram: f64,
    pub score: f64,
}

/// Scores rows against one parsed text query.
#[derive(Debug, Clone)]
pub struct TextScorer {
    query: Option<TsQuery>,
    raw: String,
    use_trigram: bool,
    weights: SearchWeights,
}

impl TextScorer {
    /// `None` when the input is blank. Input that only contains stop words
    /// still scores through trigram similarity.
    pub fn new(raw: &str, weights: SearchWeights) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(Self {
            query: TsQuery::parse(raw),
            raw: raw.to_string(),
            use_trigram: raw.chars().count() >= MIN_TRIGRAM_QUERY_CHARS,
            weights,
        })
    }

    pub fn query(&self) -> Option<&TsQuery> {
        self.query.as_ref()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn uses_trigram(&self) -> bool {
        self.use_trigram
    }

    pub fn weights(&self) -> &SearchWeights {
        &self.weights
    }

    /// Score a row. `fields` are compared with trigram similarity and the
    /// best one counts. Returns `None` when the row is not admitted.
    pub fn score(&self, vector: &TsVector, fields: &[&str]) -> Option<TextMatch> {
        let lexical = self
            .query
            .as_ref()
            .map_or(0.0, |q| rank_cd(vector, q, &DEFAULT_WEIGHTS));
        let trigram = if self.use_trigram {
            fields
                .iter()
                .map(|f| trigram::similarity(f, &self.raw))
                .fold(0.0, f64::max)
        } else {
            0.0
        };
        let admitted = lexical > 0.0 || (self.use_trigram && trigram >= self.weights.trigram_floor);
        admitted.then(|| TextMatch {
            lexical,
            trigram,
            score: lexical * self.weights.lexical + trigram * self.weights.trigram,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Relevance,
    Name,
    Created,
    Updated,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    pub field: SortField,
    pub descending: bool,
}

impl Ordering {
    pub const RELEVANCE: Ordering = Ordering {
        field: SortField::Relevance,
        descending: true,
    };
    pub const RECENTLY_UPDATED: Ordering = Ordering {
        field: SortField::Updated,
        descending: true,
    };

    /// Parse `name`, `-name`, `created`, `updated`, `id` or `relevance`.
    /// Missing, unknown or text-less relevance orderings fall back to the
    /// default: relevance with text, most recently updated without.
    pub fn parse(value: Option<&str>, has_text: bool) -> Self {
        let default = if has_text {
            Self::RELEVANCE
        } else {
            Self::RECENTLY_UPDATED
        };
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return default;
        };
        let (descending, name) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        let field = match name.to_ascii_lowercase().as_str() {
            "relevance" if has_text => return Self::RELEVANCE,
            "name" => SortField::Name,
            "created" => SortField::Created,
            "updated" | "modified" => SortField::Updated,
            "id" => SortField::Id,
            _ => return default,
        };
        Self { field, descending }
    }

    pub fn as_param(&self) -> String {
        let name = match self.field {
            SortField::Relevance => return "relevance".into(),
            SortField::Name => "name",
            SortField::Created => "created",
            SortField::Updated => "updated",
            SortField::Id => "id",
        };
        if self.descending {
            format!("-{name}")
        } else {
            name.to_string()
        }
    }
}

/// Values a row is ordered by. `serial` is the numeric part of the id.
#[derive(Debug, Clone, Copy)]
pub struct SortKey<'a> {
    pub score: f64,
    pub name: &'a str,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub serial: i64,
}

/// Total order for search results; ties always end on `serial` ascending.
pub fn compare(a: &SortKey<'_>, b: &SortKey<'_>, ordering: Ordering) -> CmpOrdering {
    let directed = |o: CmpOrdering| if ordering.descending { o.reverse() } else { o };
    match ordering.field {
        SortField::Relevance => b
            .score
            .total_cmp(&a.score)
            .then(b.updated.cmp(&a.updated))
            .then(a.serial.cmp(&b.serial)),
        SortField::Name => directed(a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then(a.serial.cmp(&b.serial)),
        SortField::Created => directed(a.created.cmp(&b.created)).then(a.serial.cmp(&b.serial)),
        SortField::Updated => directed(a.updated.cmp(&b.updated)).then(a.serial.cmp(&b.serial)),
        SortField::Id => directed(a.serial.cmp(&b.serial)),
    }
}

/// Inclusive creation-date range; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Parse `start,end` with ISO dates; either side may be empty.
    pub fn parse(value: &str) -> Option<Self> {
        let (start, end) = value.split_once(',').unwrap_or((value, ""));
        let parse = |s: &str| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok();
        let range = Self {
            start: parse(start),
            end: parse(end),
        };
        (range.start.is_some() || range.end.is_some()).then_some(range)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.start.map_or(true, |s| day >= s) && self.end.map_or(true, |e| day <= e)
    }
}

/// Recognised facet filters. Values within one facet are OR-ed; facets are
/// AND-ed together. Unknown facets and unparsable values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub coding_system: BTreeSet<i64>,
    pub data_source: BTreeSet<i64>,
    pub tag: BTreeSet<i64>,
    pub collection: BTreeSet<i64>,
    pub ontology: BTreeSet<i64>,
    pub template: BTreeSet<i64>,
    pub publish_status: BTreeSet<i16>,
    pub author_contains: Option<String>,
    pub owner: BTreeSet<i64>,
    pub date_range: Option<DateRange>,
}

impl SearchFilters {
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filters = Self::default();
        for (key, value) in pairs {
            let ids = || {
                value
                    .split(',')
                    .filter_map(|v| v.trim().parse::<i64>().ok())
                    .collect::<Vec<_>>()
            };
            match key {
                "coding_system" => filters.coding_system.extend(ids()),
                "data_source" => filters.data_source.extend(ids()),
                "tag" | "tags" => filters.tag.extend(ids()),
                "collection" | "collections" => filters.collection.extend(ids()),
                "ontology" => filters.ontology.extend(ids()),
                "template" => filters.template.extend(ids()),
                "owner" => filters.owner.extend(ids()),
                "publish_status" => filters.publish_status.extend(
                    value
                        .split(',')
                        .filter_map(ApprovalStatus::parse)
                        .map(ApprovalStatus::code),
                ),
                "author_contains" | "author" => {
                    let v = value.trim();
                    if !v.is_empty() {
                        filters.author_contains = Some(v.to_string());
                    }
                }
                "date_range" => filters.date_range = DateRange::parse(value),
                _ => {}
            }
        }
        filters
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Evaluate every facet against a row. `ontology_scope` is the ontology
    /// filter expanded with its descendants.
    pub fn matches(&self, row: &FacetView<'_>, ontology_scope: &BTreeSet<i64>) -> bool {
        any_of(&self.coding_system, row.coding_systems)
            && any_of(&self.data_source, row.data_sources)
            && any_of(&self.tag, row.tags)
            && any_of(&self.collection, row.collections)
            && (self.ontology.is_empty()
                || row.ontology.iter().any(|id| ontology_scope.contains(id)))
            && (self.template.is_empty()
                || row.template_id.is_some_and(|t| self.template.contains(&t)))
            && (self.publish_status.is_empty()
                || row
                    .publish_status
                    .is_some_and(|s| self.publish_status.contains(&s.code())))
            && self.author_contains.as_ref().map_or(true, |needle| {
                row.author.to_lowercase().contains(&needle.to_lowercase())
            })
            && (self.owner.is_empty() || row.owner_id.is_some_and(|o| self.owner.contains(&o)))
            && self.date_range.map_or(true, |r| r.contains(row.created))
    }
}

fn any_of(wanted: &BTreeSet<i64>, have: &[i64]) -> bool {
    wanted.is_empty() || have.iter().any(|id| wanted.contains(id))
}

/// Facet-relevant fields of one phenotype row.
#[derive(Debug, Clone, Copy)]
pub struct FacetView<'a> {
    pub coding_systems: &'a [i64],
    pub data_sources: &'a [i64],
    pub tags: &'a [i64],
    pub collections: &'a [i64],
    pub ontology: &'a [i64],
    pub template_id: Option<i64>,
    pub publish_status: Option<ApprovalStatus>,
    pub author: &'a str,
    pub owner_id: Option<i64>,
    pub created: DateTime<Utc>,
}

/// The enumerated page sizes a client may ask for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSizes {
    allowed: Vec<u32>,
    default: u32,
}

impl PageSizes {
    pub fn new(allowed: Vec<u32>, default: u32) -> Result<Self> {
        if allowed.is_empty() || allowed.contains(&0) {
            return Err(Error::Validation("page sizes must be positive".into()));
        }
        if !allowed.contains(&default) {
            return Err(Error::Validation(format!(
                "default page size {default} is not one of {allowed:?}"
            )));
        }
        Ok(Self { allowed, default })
    }

    pub fn allowed(&self) -> &[u32] {
        &self.allowed
    }

    /// The requested size if it is allowed, the default otherwise.
    pub fn resolve(&self, requested: Option<u32>) -> u32 {
        requested
            .filter(|r| self.allowed.contains(r))
            .unwrap_or(self.default)
    }
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            allowed: vec![20, 50, 100],
            default: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub page: u64,
    pub page_size: u32,
    pub total: u64,
    pub last_page: u64,
    #[serde(skip)]
    pub offset: u64,
}

/// Clamp `requested` into `1..=last_page`. An empty result has one empty page.
pub fn paginate(total: u64, requested: Option<i64>, page_size: u32) -> PageWindow {
    let size = u64::from(page_size.max(1));
    let last_page = total.div_ceil(size).max(1);
    let page = requested
        .map_or(1, |p| u64::try_from(p).unwrap_or(1))
        .clamp(1, last_page);
    PageWindow {
        page,
        page_size,
        total,
        last_page,
        offset: (page - 1) * size,
    }
}

impl PageWindow {
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        items
            .into_iter()
            .skip(offset)
            .take(self.page_size as usize)
            .collect()
    }
}

/// Statement timeout for a search returning `page_size` rows.
pub fn statement_timeout(base: Duration, per_row: Duration, page_size: u32) -> Duration {
    base + per_row * page_size
}

/// Numeric part of an entity id such as `PH123`.
pub fn id_serial(id: &str) -> Option<i64> {
    id.trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phenolib_textsearch::Weight;

    fn scorer(q: &str) -> TextScorer {
        TextScorer::new(q, SearchWeights::default()).unwrap()
    }

    #[test]
    fn name_match_outranks_definition_match() {
        let name = "Diabetes Mellitus Type 2";
        let e1 = TsVector::weighted([("PH1", Weight::A), (name, Weight::A)]);
        let definition = "type 2 diabetes";
        let e2 = TsVector::weighted([
            ("PH2", Weight::A),
            ("Blood pressure monitoring", Weight::A),
            (definition, Weight::B),
        ]);
        let s = scorer("type 2 diabetes");
        let m1 = s.score(&e1, &[name]).unwrap();
        let m2 = s
            .score(&e2, &["Blood pressure monitoring", definition])
            .unwrap();
        assert!((m1.lexical - 0.5).abs() < 1e-9);
        assert!((m2.lexical - 0.4).abs() < 1e-9);
        assert!(m1.score > m2.score);
    }

    #[test]
    fn short_queries_skip_trigram() {
        let s = scorer("ab");
        assert!(!s.uses_trigram());
        let doc = TsVector::from_text("abc");
        assert!(s.score(&doc, &["ab"]).is_none());
    }

    #[test]
    fn typo_is_admitted_by_trigram_alone() {
        let s = scorer("astma");
        let doc = TsVector::from_text("asthma");
        let m = s.score(&doc, &["asthma"]).unwrap();
        assert_eq!(m.lexical, 0.0);
        assert!(m.trigram >= 0.3);
        assert!(s.score(&TsVector::from_text("fracture"), &["fracture"]).is_none());
    }

    #[test]
    fn blank_query_has_no_scorer() {
        assert!(TextScorer::new("   ", SearchWeights::default()).is_none());
    }

    #[test]
    fn ordering_defaults_follow_text_presence() {
        assert_eq!(Ordering::parse(None, true), Ordering::RELEVANCE);
        assert_eq!(Ordering::parse(None, false), Ordering::RECENTLY_UPDATED);
        assert_eq!(Ordering::parse(Some("relevance"), false), Ordering::RECENTLY_UPDATED);
        assert_eq!(Ordering::parse(Some("bogus"), true), Ordering::RELEVANCE);
        let by_name = Ordering::parse(Some("-name"), true);
        assert_eq!(by_name.field, SortField::Name);
        assert!(by_name.descending);
        assert_eq!(by_name.as_param(), "-name");
    }

    #[test]
    fn ties_break_on_serial() {
        let now = Utc::now();
        let key = |serial, score| SortKey {
            score,
            name: "same",
            created: now,
            updated: now,
            serial,
        };
        let mut keys = vec![key(3, 1.0), key(1, 1.0), key(2, 2.0)];
        keys.sort_by(|a, b| compare(a, b, Ordering::RELEVANCE));
        let serials: Vec<i64> = keys.iter().map(|k| k.serial).collect();
        assert_eq!(serials, vec![2, 1, 3]);

        let ordering = Ordering::parse(Some("-name"), false);
        keys.sort_by(|a, b| compare(a, b, ordering));
        let serials: Vec<i64> = keys.iter().map(|k| k.serial).collect();
        assert_eq!(serials, vec![1, 2, 3]);
    }

    #[test]
    fn page_beyond_last_is_clamped() {
        let w = paginate(45, Some(9), 20);
        assert_eq!(w.page, 3);
        assert_eq!(w.last_page, 3);
        assert_eq!(w.offset, 40);
        assert_eq!(w.slice((0..45).collect()), vec![40, 41, 42, 43, 44]);

        let empty = paginate(0, Some(4), 20);
        assert_eq!((empty.page, empty.last_page), (1, 1));
        assert_eq!(paginate(10, Some(-2), 20).page, 1);
    }

    #[test]
    fn consecutive_pages_do_not_overlap() {
        let items: Vec<u32> = (0..130).collect();
        let first = paginate(130, Some(1), 50).slice(items.clone());
        let second = paginate(130, Some(2), 50).slice(items);
        assert!(first.iter().all(|i| !second.contains(i)));
    }

    #[test]
    fn page_sizes_are_enumerated() {
        let sizes = PageSizes::default();
        assert_eq!(sizes.resolve(Some(50)), 50);
        assert_eq!(sizes.resolve(Some(37)), 20);
        assert_eq!(sizes.resolve(None), 20);
        assert!(PageSizes::new(vec![10], 20).is_err());
        assert!(PageSizes::new(vec![], 20).is_err());
    }

    #[test]
    fn filters_parse_known_facets_only() {
        let f = SearchFilters::from_pairs([
            ("tag", "1,2,x"),
            ("ontology", "5"),
            ("publish_status", "approved,bogus"),
            ("author_contains", " smith "),
            ("date_range", "2020-01-01,"),
            ("colour", "blue"),
        ]);
        assert_eq!(f.tag, [1, 2].into_iter().collect());
        assert_eq!(f.publish_status, [2].into_iter().collect());
        assert_eq!(f.author_contains.as_deref(), Some("smith"));
        assert!(f.date_range.unwrap().end.is_none());
        assert!(SearchFilters::from_pairs([("colour", "blue")]).is_empty());
    }

    #[test]
    fn facets_are_anded_and_values_ored() {
        let f = SearchFilters::from_pairs([("tag", "1,2"), ("author_contains", "SMI")]);
        let created = Utc::now();
        let row = FacetView {
            coding_systems: &[],
            data_sources: &[],
            tags: &[2, 9],
            collections: &[],
            ontology: &[],
            template_id: Some(1),
            publish_status: None,
            author: "J. Smith",
            owner_id: None,
            created,
        };
        assert!(f.matches(&row, &BTreeSet::new()));
        let other = FacetView { tags: &[3], ..row };
        assert!(!f.matches(&other, &BTreeSet::new()));
    }

    #[test]
    fn statement_timeout_scales_with_page_size() {
        let t = statement_timeout(Duration::from_millis(1000), Duration::from_millis(10), 50);
        assert_eq!(t, Duration::from_millis(1500));
    }

    #[test]
    fn serial_is_numeric_suffix() {
        assert_eq!(id_serial("PH123"), Some(123));
        assert_eq!(id_serial("C7"), Some(7));
        assert_eq!(id_serial("PH"), None);
    }
}
