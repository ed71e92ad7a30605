//! Ontology tags and their parent/child edges.

use std::collections::BTreeSet;

use async_trait::async_trait;
use phenolib_core::ontology::OntologyNode;
use phenolib_core::search::SearchWeights;
use sqlx::Row;

use super::rows::{self, ONTOLOGY_COLUMNS};
use super::search::OntologySearchQuery;
use super::{bind_all, PgStore};
use crate::db::traits::OntologyStore;
use crate::models::OntologyType;
use crate::{Error, Result};

fn id_array(ids: &BTreeSet<i64>) -> Vec<i64> {
    ids.iter().copied().collect()
}

#[async_trait]
impl OntologyStore for PgStore {
    async fn ontology_node(&self, id: i64) -> Result<Option<OntologyNode>> {
        let sql = format!("SELECT {ONTOLOGY_COLUMNS} FROM ontology_tags t WHERE t.id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(rows::ontology_node))
    }

    async fn ontology_nodes(&self, ids: &BTreeSet<i64>) -> Result<Vec<OntologyNode>> {
        let sql = format!(
            "SELECT {ONTOLOGY_COLUMNS} FROM ontology_tags t WHERE t.id = ANY($1) ORDER BY t.id"
        );
        let found = sqlx::query(&sql)
            .bind(id_array(ids))
            .fetch_all(&self.pool)
            .await?;
        Ok(found.iter().map(rows::ontology_node).collect())
    }

    async fn ontology_parents(&self, id: i64) -> Result<Vec<OntologyNode>> {
        let sql = format!(
            "SELECT {ONTOLOGY_COLUMNS}
             FROM ontology_edges e JOIN ontology_tags t ON t.id = e.parent_id
             WHERE e.child_id = $1
             ORDER BY t.id"
        );
        let found = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        Ok(found.iter().map(rows::ontology_node).collect())
    }

    async fn ontology_children(&self, id: i64) -> Result<Vec<OntologyNode>> {
        let sql = format!(
            "SELECT {ONTOLOGY_COLUMNS}
             FROM ontology_edges e JOIN ontology_tags t ON t.id = e.child_id
             WHERE e.parent_id = $1
             ORDER BY t.id"
        );
        let found = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        Ok(found.iter().map(rows::ontology_node).collect())
    }

    async fn ontology_expand(&self, ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let expanded: Vec<i64> = sqlx::query_scalar(
            "WITH RECURSIVE below(id) AS (
                 SELECT t.id FROM ontology_tags t WHERE t.id = ANY($1)
                 UNION
                 SELECT e.child_id FROM ontology_edges e JOIN below b ON e.parent_id = b.id
             )
             SELECT id FROM below",
        )
        .bind(id_array(ids))
        .fetch_all(&self.pool)
        .await?;
        // Unknown ids still count as themselves.
        Ok(expanded.into_iter().chain(ids.iter().copied()).collect())
    }

    async fn ontology_ancestors(&self, id: i64) -> Result<BTreeSet<i64>> {
        let ancestors: Vec<i64> = sqlx::query_scalar(
            "WITH RECURSIVE above(id) AS (
                 SELECT e.parent_id FROM ontology_edges e WHERE e.child_id = $1
                 UNION
                 SELECT e.parent_id FROM ontology_edges e JOIN above a ON e.child_id = a.id
             )
             SELECT id FROM above",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ancestors.into_iter().collect())
    }

    async fn ontology_is_descendant(
        &self,
        parents: &BTreeSet<i64>,
        candidates: &BTreeSet<i64>,
    ) -> Result<bool> {
        if parents.is_empty() || candidates.is_empty() {
            return Ok(false);
        }
        let found: bool = sqlx::query_scalar(
            "WITH RECURSIVE above(id) AS (
                 SELECT e.parent_id FROM ontology_edges e WHERE e.child_id = ANY($1)
                 UNION
                 SELECT e.parent_id FROM ontology_edges e JOIN above a ON e.child_id = a.id
             )
             SELECT EXISTS (SELECT 1 FROM above WHERE id = ANY($2))",
        )
        .bind(id_array(candidates))
        .bind(id_array(parents))
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn ontology_types(&self) -> Result<Vec<OntologyType>> {
        let found = sqlx::query("SELECT id, name FROM ontology_tag_types ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(found
            .iter()
            .map(|row| OntologyType {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn ontology_roots(&self, type_id: i32) -> Result<Vec<OntologyNode>> {
        let sql = format!(
            "SELECT {ONTOLOGY_COLUMNS}
             FROM ontology_tags t
             WHERE t.type_id = $1
               AND NOT EXISTS (SELECT 1 FROM ontology_edges e WHERE e.child_id = t.id)
             ORDER BY t.name, t.id"
        );
        let found = sqlx::query(&sql).bind(type_id).fetch_all(&self.pool).await?;
        Ok(found.iter().map(rows::ontology_node).collect())
    }

    async fn search_ontology(
        &self,
        query: &str,
        type_id: Option<i32>,
        weights: &SearchWeights,
        limit: u32,
    ) -> Result<Vec<(OntologyNode, f64)>> {
        let search = OntologySearchQuery {
            query,
            type_id,
            weights,
            limit,
        };
        let Some((sql, binds)) = search.build_sql() else {
            return Ok(Vec::new());
        };
        let found = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;
        Ok(found
            .iter()
            .map(|row| (rows::ontology_node(row), row.get::<f64, _>("score")))
            .collect())
    }

    async fn add_ontology_node(&self, node: OntologyNode) -> Result<OntologyNode> {
        let known: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM ontology_tag_types WHERE id = $1)")
                .bind(node.type_id)
                .fetch_one(&self.pool)
                .await?;
        if !known {
            return Err(Error::Validation(format!(
                "unknown ontology type {}",
                node.type_id
            )));
        }

        let mut tx = self.pool.begin().await?;
        let row = if node.id > 0 {
            let row = sqlx::query(&format!(
                "INSERT INTO ontology_tags AS t (id, type_id, name, properties)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (id) DO UPDATE
                     SET type_id = EXCLUDED.type_id, name = EXCLUDED.name,
                         properties = EXCLUDED.properties
                 RETURNING {ONTOLOGY_COLUMNS}"
            ))
            .bind(node.id)
            .bind(node.type_id)
            .bind(&node.name)
            .bind(&node.properties)
            .fetch_one(&mut *tx)
            .await?;
            // Keep generated ids above explicitly assigned ones.
            sqlx::query(
                "SELECT setval(pg_get_serial_sequence('ontology_tags', 'id'),
                               GREATEST((SELECT max(id) FROM ontology_tags), 1))",
            )
            .execute(&mut *tx)
            .await?;
            row
        } else {
            sqlx::query(&format!(
                "INSERT INTO ontology_tags AS t (type_id, name, properties)
                 VALUES ($1, $2, $3)
                 RETURNING {ONTOLOGY_COLUMNS}"
            ))
            .bind(node.type_id)
            .bind(&node.name)
            .bind(&node.properties)
            .fetch_one(&mut *tx)
            .await?
        };
        tx.commit().await?;
        Ok(rows::ontology_node(&row))
    }

    async fn add_ontology_edge(&self, parent: i64, child: i64) -> Result<bool> {
        if parent == child {
            return Err(Error::Cycle { parent, child });
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("LOCK TABLE ontology_edges IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let present: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ontology_tags WHERE id = ANY($1)")
                .bind(vec![parent, child])
                .fetch_one(&mut *tx)
                .await?;
        if present < 2 {
            return Err(Error::NotFound(format!("ontology node {parent} or {child}")));
        }

        let creates_cycle: bool = sqlx::query_scalar(
            "WITH RECURSIVE below(id) AS (
                 SELECT e.child_id FROM ontology_edges e WHERE e.parent_id = $1
                 UNION
                 SELECT e.child_id FROM ontology_edges e JOIN below b ON e.parent_id = b.id
             )
             SELECT EXISTS (SELECT 1 FROM below WHERE id = $2)",
        )
        .bind(child)
        .bind(parent)
        .fetch_one(&mut *tx)
        .await?;
        if creates_cycle {
            return Err(Error::Cycle { parent, child });
        }

        let inserted = sqlx::query(
            "INSERT INTO ontology_edges (parent_id, child_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(parent)
        .bind(child)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;
        tx.commit().await?;

        if inserted {
            tracing::info!(parent, child, "Added ontology edge");
        }
        Ok(inserted)
    }
}
