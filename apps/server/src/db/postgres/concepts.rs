//! Concept versions, their components and the child-concept graph.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use phenolib_core::concept::{CodeRegex, CodeRow, ColumnSearch, ConceptRef, ConceptVersion};
use phenolib_core::search::paginate;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};

use super::rows::{self, CONCEPT_COLUMNS};
use super::search::{concept_published_sql, ConceptListQuery};
use super::{bind_all, bind_all_scalar, PgStore};
use crate::db::traits::{ConceptQuery, ConceptStore};
use crate::models::{CodingSystem, Concept, ConceptRecord, ConceptWrite};
use crate::{Error, Result};

const COMPONENTS_SQL: &str = "SELECT cc.id, cc.concept_id, cc.concept_history_id, cc.name,
        cc.component_type, cc.logical_type, cc.concept_ref_id, cc.concept_ref_history_id,
        cc.regex, cc.column_search,
        coalesce((
            SELECT jsonb_agg(jsonb_build_object('code', k.code, 'description', k.description)
                             ORDER BY k.position)
            FROM concept_codes k
            WHERE k.component_id = cc.id
        ), '[]'::jsonb) AS codes
    FROM concept_components cc
    JOIN unnest($1::bigint[], $2::bigint[]) AS wanted(id, history_id)
      ON cc.concept_id = wanted.id AND cc.concept_history_id = wanted.history_id
    ORDER BY cc.concept_id, cc.concept_history_id, cc.position";

/// SQL selecting the codes of `system` matched by `regex`.
fn expression_sql(system: &CodingSystem, column_search: ColumnSearch) -> Result<String> {
    if !system.has_safe_identifiers() {
        return Err(Error::Internal(format!(
            "coding system {} has unsafe identifiers",
            system.id
        )));
    }
    let code = &system.code_column_name;
    let desc = &system.desc_column_name;
    let predicate = match column_search {
        ColumnSearch::Code => format!("{code} ~* $1"),
        ColumnSearch::Description => format!("{desc} ~* $1"),
        ColumnSearch::Both => format!("({code} ~* $1 OR {desc} ~* $1)"),
    };
    Ok(format!(
        "SELECT {code}::text AS code, coalesce({desc}::text, '') AS description
         FROM {table}
         WHERE {predicate}
         ORDER BY {code}",
        table = system.table_name,
    ))
}

impl PgStore {
    /// Load `keys` with their components; missing versions are skipped.
    async fn load_concepts(&self, keys: &[ConceptRef]) -> Result<Vec<ConceptRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = keys.iter().map(|k| k.concept_id).collect();
        let history_ids: Vec<i64> = keys.iter().map(|k| k.history_id).collect();

        let sql = format!(
            "SELECT {CONCEPT_COLUMNS}
             FROM concept_history h
             JOIN unnest($1::bigint[], $2::bigint[]) AS wanted(id, history_id)
               ON h.id = wanted.id AND h.history_id = wanted.history_id"
        );
        let heads = sqlx::query(&sql)
            .bind(&ids)
            .bind(&history_ids)
            .fetch_all(&self.pool)
            .await?;
        let components = sqlx::query(COMPONENTS_SQL)
            .bind(&ids)
            .bind(&history_ids)
            .fetch_all(&self.pool)
            .await?;

        let mut by_version: BTreeMap<(i64, i64), Vec<_>> = BTreeMap::new();
        for row in &components {
            let key = (row.get("concept_id"), row.get("concept_history_id"));
            by_version.entry(key).or_default().push(rows::component(row)?);
        }

        let mut records = BTreeMap::new();
        for row in &heads {
            let concept = rows::concept(row)?;
            let components = by_version
                .remove(&(concept.id, concept.history_id))
                .unwrap_or_default();
            records.insert(
                (concept.id, concept.history_id),
                ConceptRecord {
                    concept,
                    components,
                },
            );
        }
        Ok(keys
            .iter()
            .filter_map(|k| records.remove(&(k.concept_id, k.history_id)))
            .collect())
    }

    async fn materialize(
        tx: &mut Transaction<'_, Postgres>,
        system: &CodingSystem,
        regex: &CodeRegex,
    ) -> Result<Vec<CodeRow>> {
        // Reject patterns the in-process matcher cannot compile.
        regex.materialize(&[])?;
        let sql = expression_sql(system, regex.column_search)?;
        let found = sqlx::query(&sql)
            .bind(&regex.regex)
            .fetch_all(&mut **tx)
            .await?;
        Ok(found
            .iter()
            .map(|row| {
                CodeRow::new(
                    row.get::<String, _>("code"),
                    row.get::<String, _>("description"),
                )
            })
            .collect())
    }

    async fn coding_system_in(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> Result<Option<CodingSystem>> {
        let row = sqlx::query(
            "SELECT id, name, description, link, table_name, code_column_name, desc_column_name
             FROM coding_systems WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.as_ref().map(rows::coding_system))
    }
}

fn concept_ref(row: &PgRow) -> ConceptRef {
    ConceptRef {
        concept_id: row.get("id"),
        history_id: row.get("history_id"),
    }
}

#[async_trait]
impl ConceptStore for PgStore {
    async fn get_concept(&self, id: i64) -> Result<Option<ConceptRecord>> {
        let head = sqlx::query("SELECT id, history_id FROM concepts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(head) = head else {
            return Ok(None);
        };
        Ok(self
            .load_concepts(&[concept_ref(&head)])
            .await?
            .pop())
    }

    async fn get_concept_version(&self, id: i64, history_id: i64) -> Result<Option<ConceptRecord>> {
        let key = ConceptRef {
            concept_id: id,
            history_id,
        };
        Ok(self.load_concepts(&[key]).await?.pop())
    }

    async fn list_concept_versions(&self, id: i64) -> Result<Vec<Concept>> {
        let sql = format!(
            "SELECT {CONCEPT_COLUMNS} FROM concept_history h WHERE h.id = $1 ORDER BY h.history_id"
        );
        let found = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        found.iter().map(rows::concept).collect()
    }

    async fn list_concepts(&self, query: &ConceptQuery) -> Result<(u64, Vec<Concept>)> {
        let listing = ConceptListQuery::new(&query.subject, query.text.as_deref());

        let (count_sql, count_binds) = listing.build_count_sql();
        let total = bind_all_scalar(sqlx::query_scalar::<_, i64>(&count_sql), &count_binds)
            .fetch_one(&self.pool)
            .await?;
        let window = paginate(u64::try_from(total).unwrap_or(0), query.page, query.page_size);

        let (sql, binds) = listing.build_sql(window.offset, window.page_size);
        let found = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;
        let concepts = found.iter().map(rows::concept).collect::<Result<Vec<_>>>()?;
        Ok((window.total, concepts))
    }

    async fn concept_graph(&self, root: ConceptRef) -> Result<Vec<ConceptVersion>> {
        let found = sqlx::query(
            "WITH RECURSIVE graph(id, history_id, path) AS (
                 SELECT $1::bigint, $2::bigint, ARRAY[$1::bigint]
                 UNION ALL
                 SELECT cc.concept_ref_id, cc.concept_ref_history_id, g.path || cc.concept_ref_id
                 FROM graph g
                 JOIN concept_components cc
                   ON cc.concept_id = g.id AND cc.concept_history_id = g.history_id
                 WHERE cc.component_type = 1
                   AND cc.concept_ref_id IS NOT NULL
                   AND cc.concept_ref_history_id IS NOT NULL
                   AND NOT cc.concept_ref_id = ANY(g.path)
             )
             SELECT DISTINCT id, history_id FROM graph ORDER BY id, history_id",
        )
        .bind(root.concept_id)
        .bind(root.history_id)
        .fetch_all(&self.pool)
        .await?;

        let keys: Vec<ConceptRef> = found.iter().map(concept_ref).collect();
        let records = self.load_concepts(&keys).await?;
        tracing::debug!(
            concept_id = root.concept_id,
            history_id = root.history_id,
            versions = records.len(),
            "Loaded concept graph"
        );
        Ok(records.iter().map(ConceptRecord::version).collect())
    }

    async fn insert_concept_version(&self, write: ConceptWrite) -> Result<Concept> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let (id, history_id, created) = match write.id {
            Some(id) => {
                let head = sqlx::query(
                    "SELECT c.history_id,
                            (SELECT min(h.created) FROM concept_history h WHERE h.id = c.id) AS created
                     FROM concepts c WHERE c.id = $1 FOR UPDATE",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| Error::NotFound(format!("concept C{id}")))?;
                (id, head.get::<i64, _>("history_id") + 1, head.get("created"))
            }
            None => {
                let serial: i64 = sqlx::query_scalar("SELECT nextval('concept_serial')")
                    .fetch_one(&mut *tx)
                    .await?;
                (serial, 1, now)
            }
        };

        let system = match write.coding_system_id {
            Some(cs) => Self::coding_system_in(&mut tx, cs).await?,
            None => None,
        };

        let mut components = write.components;
        for component in &mut components {
            if !component.component_type.is_expression() {
                continue;
            }
            if let (Some(regex), Some(system)) = (&component.code_regex, &system) {
                component.codes = Self::materialize(&mut tx, system, regex).await?;
            }
        }

        let sql = format!(
            "INSERT INTO concept_history AS h (
                 id, history_id, name, description, author, coding_system_id,
                 owner_id, group_id, owner_access, group_access, world_access,
                 is_deleted, created, updated, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE, $12, $13, $14)
             RETURNING {CONCEPT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(history_id)
            .bind(&write.name)
            .bind(&write.description)
            .bind(&write.author)
            .bind(write.coding_system_id)
            .bind(write.owner_id)
            .bind(write.group_id)
            .bind(write.owner_access.code())
            .bind(write.group_access.code())
            .bind(write.world_access.code())
            .bind(created)
            .bind(now)
            .bind(write.user_id)
            .fetch_one(&mut *tx)
            .await?;
        let concept = rows::concept(&row)?;

        sqlx::query(
            "INSERT INTO concepts (id, history_id) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET history_id = EXCLUDED.history_id",
        )
        .bind(id)
        .bind(history_id)
        .execute(&mut *tx)
        .await?;

        for (position, component) in components.iter().enumerate() {
            let component_id: i64 = sqlx::query_scalar(
                "INSERT INTO concept_components (
                     concept_id, concept_history_id, position, name, component_type,
                     logical_type, concept_ref_id, concept_ref_history_id, regex, column_search)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 RETURNING id",
            )
            .bind(id)
            .bind(history_id)
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .bind(&component.name)
            .bind(component.component_type.code())
            .bind(component.logical_type.code())
            .bind(component.concept_ref.map(|r| r.concept_id))
            .bind(component.concept_ref.map(|r| r.history_id))
            .bind(component.code_regex.as_ref().map(|r| r.regex.clone()))
            .bind(component.code_regex.as_ref().map(|r| r.column_search.code()))
            .fetch_one(&mut *tx)
            .await?;

            if component.codes.is_empty() {
                continue;
            }
            let codes: Vec<String> = component.codes.iter().map(|c| c.code.clone()).collect();
            let descriptions: Vec<String> = component
                .codes
                .iter()
                .map(|c| c.description.clone())
                .collect();
            sqlx::query(
                "INSERT INTO concept_codes (component_id, position, code, description)
                 SELECT $1, c.ord::integer, c.code, c.description
                 FROM unnest($2::text[], $3::text[]) WITH ORDINALITY AS c(code, description, ord)",
            )
            .bind(component_id)
            .bind(&codes)
            .bind(&descriptions)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            concept_id = concept.id,
            history_id = concept.history_id,
            "Wrote concept version"
        );
        Ok(concept)
    }

    async fn concept_is_published(&self, concept_id: i64) -> Result<bool> {
        let sql = format!("SELECT {}", concept_published_sql("$1::bigint"));
        let published: bool = sqlx::query_scalar(&sql)
            .bind(concept_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(published)
    }
}
