//! SQL builders for phenotype, concept and ontology searches.
//!
//! Each builder renders a `(sql, binds)` pair for the page query and a
//! matching count query. Visibility, Brand scope, facet filters, text
//! scoring and ordering are all rendered here so the generated SQL can be
//! unit tested without a database.

use chrono::NaiveDate;
use phenolib_core::access::Subject;
use phenolib_core::search::{Ordering, SearchWeights, SortField, MIN_TRIGRAM_QUERY_CHARS};
use phenolib_textsearch::{QueryExpr, TsQuery};

use crate::models::phenotype::{
    CODING_SYSTEM_KEY, COLLECTION_KEY, DATA_SOURCE_KEY, ONTOLOGY_KEY, TAG_KEY,
};
use crate::models::SearchRequest;

/// Bind values for `sqlx` queries.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    BigInt(i64),
    BigIntArray(Vec<i64>),
    Int(i32),
    SmallIntArray(Vec<i16>),
    Float(f64),
    Date(NaiveDate),
}

/// Collects bind values and hands out their `$n` placeholders.
#[derive(Debug, Default)]
pub(crate) struct Binds {
    values: Vec<BindValue>,
}

impl Binds {
    pub(crate) fn push(&mut self, value: BindValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    pub(crate) fn into_values(self) -> Vec<BindValue> {
        self.values
    }
}

/// Access predicates for one subject against an entity table alias.
///
/// Anonymous subjects never match; world access only applies to signed-in
/// users. Moderators, and Brand administrators inside their Brand, always
/// have at least VIEW.
pub(crate) struct AccessSql<'a> {
    alias: &'a str,
    subject: &'a Subject,
    brand_id: Option<i32>,
}

impl<'a> AccessSql<'a> {
    pub(crate) fn new(alias: &'a str, subject: &'a Subject, brand_id: Option<i32>) -> Self {
        Self {
            alias,
            subject,
            brand_id,
        }
    }

    /// `effective_access >= level`, with level 2 = VIEW and 3 = EDIT.
    fn at_least(&self, level: i16, binds: &mut Binds) -> String {
        let Some(user_id) = self.subject.user_id else {
            return "FALSE".to_string();
        };
        let a = self.alias;
        if level <= 2
            && (self.subject.can_moderate() || self.subject.is_brand_admin(self.brand_id))
        {
            return "TRUE".to_string();
        }
        let user = binds.push(BindValue::BigInt(user_id));
        let mut parts = vec![
            format!("{a}.world_access >= {level}"),
            format!("({a}.owner_id = {user} AND {a}.owner_access >= {level})"),
        ];
        if !self.subject.groups.is_empty() {
            let groups = binds.push(BindValue::BigIntArray(
                self.subject.groups.iter().copied().collect(),
            ));
            parts.push(format!(
                "({a}.group_id = ANY({groups}::bigint[]) AND {a}.group_access >= {level})"
            ));
        }
        format!("({})", parts.join(" OR "))
    }

    pub(crate) fn can_view(&self, binds: &mut Binds) -> String {
        self.at_least(2, binds)
    }

    pub(crate) fn can_edit(&self, binds: &mut Binds) -> String {
        self.at_least(3, binds)
    }
}

/// Render a parsed text query as a PostgreSQL `tsquery` expression.
pub(crate) fn compile_tsquery(expr: &QueryExpr, binds: &mut Binds) -> String {
    match expr {
        QueryExpr::Term { raw, .. } => {
            let p = binds.push(BindValue::Text(raw.clone()));
            format!("plainto_tsquery('english', {p})")
        }
        QueryExpr::Phrase { raw, .. } => {
            let p = binds.push(BindValue::Text(raw.clone()));
            format!("phraseto_tsquery('english', {p})")
        }
        QueryExpr::And(a, b) => format!(
            "({} && {})",
            compile_tsquery(a, binds),
            compile_tsquery(b, binds)
        ),
        QueryExpr::Or(a, b) => format!(
            "({} || {})",
            compile_tsquery(a, binds),
            compile_tsquery(b, binds)
        ),
        QueryExpr::Not(inner) => format!("!!({})", compile_tsquery(inner, binds)),
    }
}

/// Score and admission predicate of a text query against one row.
pub(crate) struct TextSql {
    pub score: String,
    pub admits: String,
}

/// `None` for blank input. `vector` is the search-vector column and
/// `fields` the columns compared by trigram similarity.
pub(crate) fn text_sql(
    raw: &str,
    weights: &SearchWeights,
    vector: &str,
    fields: &[&str],
    binds: &mut Binds,
) -> Option<TextSql> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lexical = TsQuery::parse(raw).map(|q| {
        let tsquery = compile_tsquery(q.expr(), binds);
        (
            format!("ts_rank_cd({vector}, {tsquery})"),
            format!("{vector} @@ {tsquery}"),
        )
    });
    let trigram = (raw.chars().count() >= MIN_TRIGRAM_QUERY_CHARS).then(|| {
        let q = binds.push(BindValue::Text(raw.to_string()));
        let sims: Vec<String> = fields
            .iter()
            .map(|f| format!("similarity(coalesce({f}, ''), {q})"))
            .collect();
        format!("GREATEST({})", sims.join(", "))
    });

    let wl = binds.push(BindValue::Float(weights.lexical));
    let wt = binds.push(BindValue::Float(weights.trigram));
    let (score, admits) = match (lexical, trigram) {
        (Some((rank, matches)), Some(sim)) => {
            let floor = binds.push(BindValue::Float(weights.trigram_floor));
            (
                format!("({rank} * {wl} + {sim} * {wt})"),
                format!("({matches} OR {sim} >= {floor})"),
            )
        }
        (Some((rank, matches)), None) => (format!("({rank} * {wl})"), matches),
        (None, Some(sim)) => {
            let floor = binds.push(BindValue::Float(weights.trigram_floor));
            (format!("({sim} * {wt})"), format!("{sim} >= {floor}"))
        }
        (None, None) => return None,
    };
    Some(TextSql { score, admits })
}

/// Phenotype search over the version each caller may see: the head for
/// callers with VIEW access, the newest approved version otherwise.
pub struct PhenotypeSearchQuery<'a> {
    request: &'a SearchRequest,
}

impl<'a> PhenotypeSearchQuery<'a> {
    pub fn new(request: &'a SearchRequest) -> Self {
        Self { request }
    }

    fn has_text(&self) -> bool {
        self.request
            .text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// FROM and WHERE clauses shared by the page and count queries.
    /// Returns `(from_where, score_expr)`.
    fn body(&self, binds: &mut Binds) -> (String, Option<String>) {
        let req = self.request;
        let access = AccessSql::new("p", &req.subject, req.brand_id);
        let can_view = access.can_view(binds);
        let can_edit = access.can_edit(binds);

        let mut sql = format!(
            "FROM phenotypes p
LEFT JOIN LATERAL (
    SELECT max(pp.entity_history_id) AS history_id
    FROM published_phenotypes pp
    WHERE pp.entity_id = p.id AND pp.approval_status = 2
) pub ON TRUE
JOIN phenotype_history v
  ON v.id = p.id
 AND v.history_id = CASE WHEN {can_view} THEN p.history_id ELSE pub.history_id END
LEFT JOIN LATERAL (
    SELECT pp.approval_status
    FROM published_phenotypes pp
    WHERE pp.entity_id = v.id AND pp.entity_history_id = v.history_id
    ORDER BY pp.approval_status IN (0, 1) DESC, pp.approval_status = 2 DESC, pp.id DESC
    LIMIT 1
) ps ON TRUE
WHERE (NOT p.is_deleted OR {can_edit})"
        );

        if let Some(brand) = req.brand_id {
            let b = binds.push(BindValue::Int(brand));
            sql.push_str(&format!("\n  AND {b} = ANY(p.brands)"));
        }

        for clause in self.facet_clauses(binds) {
            sql.push_str("\n  AND ");
            sql.push_str(&clause);
        }

        let text = req.text.as_deref().and_then(|raw| {
            text_sql(
                raw,
                &req.weights,
                "v.search_vector",
                &["v.name", "v.author", "v.definition"],
                binds,
            )
        });
        let score = match text {
            Some(text) => {
                sql.push_str("\n  AND ");
                sql.push_str(&text.admits);
                Some(text.score)
            }
            None if self.has_text() => {
                sql.push_str("\n  AND FALSE");
                None
            }
            None => None,
        };
        (sql, score)
    }

    fn facet_clauses(&self, binds: &mut Binds) -> Vec<String> {
        let f = &self.request.filters;
        let mut clauses = Vec::new();
        let mut overlap = |key: &str, ids: Vec<i64>, binds: &mut Binds| {
            let p = binds.push(BindValue::BigIntArray(ids));
            format!("template_ids(v.template_data, '{key}') && {p}::bigint[]")
        };

        if !f.coding_system.is_empty() {
            clauses.push(overlap(
                CODING_SYSTEM_KEY,
                f.coding_system.iter().copied().collect(),
                binds,
            ));
        }
        if !f.data_source.is_empty() {
            clauses.push(overlap(DATA_SOURCE_KEY, f.data_source.iter().copied().collect(), binds));
        }
        if !f.tag.is_empty() {
            clauses.push(overlap(TAG_KEY, f.tag.iter().copied().collect(), binds));
        }
        if !f.collection.is_empty() {
            clauses.push(overlap(COLLECTION_KEY, f.collection.iter().copied().collect(), binds));
        }
        if !f.ontology.is_empty() {
            let scope = self.request.ontology_scope.iter().copied().collect();
            clauses.push(overlap(ONTOLOGY_KEY, scope, binds));
        }
        if !f.template.is_empty() {
            let p = binds.push(BindValue::BigIntArray(f.template.iter().copied().collect()));
            clauses.push(format!("v.template_id = ANY({p}::bigint[])"));
        }
        if !f.publish_status.is_empty() {
            let p = binds.push(BindValue::SmallIntArray(
                f.publish_status.iter().copied().collect(),
            ));
            clauses.push(format!("ps.approval_status = ANY({p}::smallint[])"));
        }
        if let Some(needle) = &f.author_contains {
            let p = binds.push(BindValue::Text(needle.clone()));
            clauses.push(format!("strpos(lower(v.author), lower({p})) > 0"));
        }
        if !f.owner.is_empty() {
            let p = binds.push(BindValue::BigIntArray(f.owner.iter().copied().collect()));
            clauses.push(format!("v.owner_id = ANY({p}::bigint[])"));
        }
        if let Some(range) = f.date_range {
            if let Some(start) = range.start {
                let p = binds.push(BindValue::Date(start));
                clauses.push(format!("v.created::date >= {p}"));
            }
            if let Some(end) = range.end {
                let p = binds.push(BindValue::Date(end));
                clauses.push(format!("v.created::date <= {p}"));
            }
        }
        clauses
    }

    fn order_by(&self) -> String {
        let ordering: Ordering = self.request.ordering;
        let dir = if ordering.descending { "DESC" } else { "ASC" };
        match ordering.field {
            SortField::Relevance => "score DESC NULLS LAST, v.updated DESC, v.serial ASC".into(),
            SortField::Name => format!("lower(v.name) {dir}, v.serial ASC"),
            SortField::Created => format!("v.created {dir}, v.serial ASC"),
            SortField::Updated => format!("v.updated {dir}, v.serial ASC"),
            SortField::Id => format!("v.serial {dir}"),
        }
    }

    pub fn build_sql(&self, offset: u64, limit: u32) -> (String, Vec<BindValue>) {
        let mut binds = Binds::default();
        let (body, score) = self.body(&mut binds);
        let score = score.unwrap_or_else(|| "NULL::float8".to_string());
        let limit = binds.push(BindValue::BigInt(i64::from(limit)));
        let offset = binds.push(BindValue::BigInt(i64::try_from(offset).unwrap_or(i64::MAX)));
        let sql = format!(
            "SELECT v.id, v.history_id, v.name, v.author, v.template_id, v.created, v.updated,
       ps.approval_status AS publish_status,
       {score}::float8 AS score
{body}
ORDER BY {order}
LIMIT {limit} OFFSET {offset}",
            order = self.order_by(),
        );
        (sql, binds.into_values())
    }

    pub fn build_count_sql(&self) -> (String, Vec<BindValue>) {
        let mut binds = Binds::default();
        let (body, _) = self.body(&mut binds);
        (format!("SELECT COUNT(*) {body}"), binds.into_values())
    }
}

/// Concept listing: heads visible to the caller, optionally filtered by name
/// or public id.
pub struct ConceptListQuery<'a> {
    subject: &'a Subject,
    text: Option<&'a str>,
}

impl<'a> ConceptListQuery<'a> {
    pub fn new(subject: &'a Subject, text: Option<&'a str>) -> Self {
        Self {
            subject,
            text: text.map(str::trim).filter(|t| !t.is_empty()),
        }
    }

    fn body(&self, binds: &mut Binds) -> String {
        let access = AccessSql::new("h", self.subject, None);
        let can_view = access.can_view(binds);
        let can_edit = access.can_edit(binds);
        let mut sql = format!(
            "FROM concepts c
JOIN concept_history h ON h.id = c.id AND h.history_id = c.history_id
WHERE (NOT h.is_deleted OR {can_edit})
  AND ({can_view} OR {published})",
            published = concept_published_sql("h.id"),
        );
        if let Some(text) = self.text {
            let p = binds.push(BindValue::Text(text.to_string()));
            sql.push_str(&format!(
                "\n  AND (strpos(lower(h.name), lower({p})) > 0 OR 'c' || h.id::text = lower({p}))"
            ));
        }
        sql
    }

    pub fn build_sql(&self, offset: u64, limit: u32) -> (String, Vec<BindValue>) {
        let mut binds = Binds::default();
        let body = self.body(&mut binds);
        let limit = binds.push(BindValue::BigInt(i64::from(limit)));
        let offset = binds.push(BindValue::BigInt(i64::try_from(offset).unwrap_or(i64::MAX)));
        let sql = format!(
            "SELECT {columns}
{body}
ORDER BY h.id
LIMIT {limit} OFFSET {offset}",
            columns = super::rows::CONCEPT_COLUMNS,
        );
        (sql, binds.into_values())
    }

    pub fn build_count_sql(&self) -> (String, Vec<BindValue>) {
        let mut binds = Binds::default();
        let body = self.body(&mut binds);
        (format!("SELECT COUNT(*) {body}"), binds.into_values())
    }
}

/// True when an approved phenotype version references the concept in
/// `concept_id_expr`.
pub(crate) fn concept_published_sql(concept_id_expr: &str) -> String {
    format!(
        "EXISTS (
    SELECT 1
    FROM published_phenotypes pp
    JOIN phenotype_history ph
      ON ph.id = pp.entity_id AND ph.history_id = pp.entity_history_id
    CROSS JOIN LATERAL jsonb_array_elements(
        CASE WHEN jsonb_typeof(ph.template_data -> 'concept_information') = 'array'
             THEN ph.template_data -> 'concept_information'
             ELSE '[]'::jsonb END
    ) AS ci(item)
    WHERE pp.approval_status = 2
      AND btrim(ci.item ->> 'concept_id') = {concept_id_expr}::text
)"
    )
}

/// Ranked ontology node search over `name` (A) and `properties.code` (B).
pub struct OntologySearchQuery<'a> {
    pub query: &'a str,
    pub type_id: Option<i32>,
    pub weights: &'a SearchWeights,
    pub limit: u32,
}

impl OntologySearchQuery<'_> {
    /// `None` when the query has nothing searchable.
    pub fn build_sql(&self) -> Option<(String, Vec<BindValue>)> {
        let mut binds = Binds::default();
        let text = text_sql(
            self.query,
            self.weights,
            "t.search_vector",
            &["t.name", "t.properties ->> 'code'"],
            &mut binds,
        )?;
        let mut sql = format!(
            "SELECT t.id, t.type_id, t.name, t.properties, {score}::float8 AS score
FROM ontology_tags t
WHERE {admits}",
            score = text.score,
            admits = text.admits,
        );
        if let Some(type_id) = self.type_id {
            let p = binds.push(BindValue::Int(type_id));
            sql.push_str(&format!("\n  AND t.type_id = {p}"));
        }
        let limit = binds.push(BindValue::BigInt(i64::from(self.limit)));
        sql.push_str(&format!("\nORDER BY score DESC, t.id ASC\nLIMIT {limit}"));
        Some((sql, binds.into_values()))
    }
}
