//! Phenotype versions, search and the publication workflow.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use phenolib_core::publication::{self, Actor, Plan, PublicationRecord, Transition};
use phenolib_core::search::paginate;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};

use super::rows::{self, phenotype_columns, PHENOTYPE_COLUMNS, PUBLICATION_COLUMNS};
use super::search::PhenotypeSearchQuery;
use super::{bind_all, bind_all_scalar, statement_timeout_sql, PgStore};
use crate::db::retry_once;
use crate::db::traits::{PhenotypeStore, PublicationStore, TransitionOutcome};
use crate::models::{
    NewPhenotypeVersion, Phenotype, PhenotypeSummary, PublicationView, SearchPage, SearchRequest,
};
use crate::{Error, Result};

const INSERT_VERSION: &str = "INSERT INTO phenotype_history (
        id, history_id, serial, name, author, definition, implementation, validation,
        template_id, template_version, template_data, owner_id, group_id,
        owner_access, group_access, world_access, brands, is_deleted,
        created, updated, created_by, updated_by)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, $21, $22)";

/// Fields of a head row that survive across versions.
struct HeadState {
    history_id: i64,
    serial: i64,
    created: chrono::DateTime<Utc>,
    created_by: Option<i64>,
}

fn summary(row: &PgRow) -> Result<PhenotypeSummary> {
    let status: Option<i16> = row.get("publish_status");
    Ok(PhenotypeSummary {
        id: row.get("id"),
        history_id: row.get("history_id"),
        name: row.get("name"),
        author: row.get("author"),
        template_id: row.get("template_id"),
        publish_status: status.map(rows::approval_status).transpose()?,
        created: row.get("created"),
        updated: row.get("updated"),
        score: row.get("score"),
    })
}

impl PgStore {
    async fn insert_version(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
        head: &HeadState,
        version: &NewPhenotypeVersion,
    ) -> Result<Phenotype> {
        let now = Utc::now();
        sqlx::query(INSERT_VERSION)
            .bind(id)
            .bind(head.history_id)
            .bind(head.serial)
            .bind(&version.name)
            .bind(&version.author)
            .bind(&version.definition)
            .bind(&version.implementation)
            .bind(&version.validation)
            .bind(version.template_id)
            .bind(version.template_version)
            .bind(&version.template_data)
            .bind(version.owner_id)
            .bind(version.group_id)
            .bind(version.owner_access.code())
            .bind(version.group_access.code())
            .bind(version.world_access.code())
            .bind(&version.brands)
            .bind(version.is_deleted)
            .bind(head.created)
            .bind(now)
            .bind(head.created_by)
            .bind(version.user_id)
            .execute(&mut **tx)
            .await?;

        let sql = format!(
            "SELECT {} FROM phenotype_history WHERE id = $1 AND history_id = $2",
            PHENOTYPE_COLUMNS.join(", ")
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(head.history_id)
            .fetch_one(&mut **tx)
            .await?;
        rows::phenotype(&row)
    }

    async fn run_search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let query = PhenotypeSearchQuery::new(request);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&statement_timeout_sql(request.timeout))
            .execute(&mut *tx)
            .await?;

        let (count_sql, count_binds) = query.build_count_sql();
        let total = bind_all_scalar(sqlx::query_scalar::<_, i64>(&count_sql), &count_binds)
            .fetch_one(&mut *tx)
            .await?;

        let window = paginate(
            u64::try_from(total).unwrap_or(0),
            request.page,
            request.page_size,
        );
        let (sql, binds) = query.build_sql(window.offset, window.page_size);
        let page = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let data = page.iter().map(summary).collect::<Result<Vec<_>>>()?;
        Ok(SearchPage { window, data })
    }

    async fn load_records(
        tx: &mut Transaction<'_, Postgres>,
        entity_id: &str,
        history_id: i64,
    ) -> Result<Vec<PublicationRecord>> {
        let sql = format!(
            "SELECT {PUBLICATION_COLUMNS} FROM published_phenotypes
             WHERE entity_id = $1 AND entity_history_id = $2
             ORDER BY id"
        );
        let found = sqlx::query(&sql)
            .bind(entity_id)
            .bind(history_id)
            .fetch_all(&mut **tx)
            .await?;
        found.iter().map(rows::publication).collect()
    }
}

#[async_trait]
impl PhenotypeStore for PgStore {
    async fn create_phenotype(&self, version: NewPhenotypeVersion) -> Result<Phenotype> {
        let mut tx = self.pool.begin().await?;
        let serial: i64 = sqlx::query_scalar("SELECT nextval('phenotype_serial')")
            .fetch_one(&mut *tx)
            .await?;
        let id = format!("PH{serial}");
        let head = HeadState {
            history_id: 1,
            serial,
            created: Utc::now(),
            created_by: version.user_id,
        };
        let phenotype = Self::insert_version(&mut tx, &id, &head, &version).await?;
        sqlx::query(
            "INSERT INTO phenotypes
             SELECT * FROM phenotype_history WHERE id = $1 AND history_id = $2",
        )
        .bind(&id)
        .bind(head.history_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(id = %phenotype.id, "Created phenotype");
        Ok(phenotype)
    }

    async fn append_phenotype_version(
        &self,
        id: &str,
        version: NewPhenotypeVersion,
    ) -> Result<Phenotype> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT history_id, serial, created, created_by FROM phenotypes WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("phenotype {id}")))?;

        let head = HeadState {
            history_id: row.get::<i64, _>("history_id") + 1,
            serial: row.get("serial"),
            created: row.get("created"),
            created_by: row.get("created_by"),
        };
        let phenotype = Self::insert_version(&mut tx, id, &head, &version).await?;

        let assignments = PHENOTYPE_COLUMNS
            .iter()
            .filter(|c| **c != "id")
            .map(|c| format!("{c} = h.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE phenotypes p SET {assignments}
             FROM phenotype_history h
             WHERE p.id = h.id AND h.id = $1 AND h.history_id = $2"
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(head.history_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(id, history_id = phenotype.history_id, "Appended phenotype version");
        Ok(phenotype)
    }

    async fn get_phenotype(&self, id: &str) -> Result<Option<Phenotype>> {
        let sql = format!("SELECT {} FROM phenotypes p WHERE p.id = $1", phenotype_columns("p"));
        let row = retry_once("get_phenotype", || async {
            Ok(sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?)
        })
        .await?;
        row.as_ref().map(rows::phenotype).transpose()
    }

    async fn get_phenotype_version(&self, id: &str, history_id: i64) -> Result<Option<Phenotype>> {
        let sql = format!(
            "SELECT {} FROM phenotype_history h WHERE h.id = $1 AND h.history_id = $2",
            phenotype_columns("h")
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(history_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rows::phenotype).transpose()
    }

    async fn list_phenotype_versions(&self, id: &str) -> Result<Vec<Phenotype>> {
        let sql = format!(
            "SELECT {} FROM phenotype_history h WHERE h.id = $1 ORDER BY h.history_id",
            phenotype_columns("h")
        );
        let found = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        found.iter().map(rows::phenotype).collect()
    }

    async fn phenotype_search_vector(&self, id: &str, history_id: i64) -> Result<Option<String>> {
        let vector: Option<Option<String>> = sqlx::query_scalar(
            "SELECT search_vector::text FROM phenotype_history WHERE id = $1 AND history_id = $2",
        )
        .bind(id)
        .bind(history_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(vector.flatten())
    }

    async fn search_phenotypes(&self, request: &SearchRequest) -> Result<SearchPage> {
        retry_once("search_phenotypes", || self.run_search(request)).await
    }

    async fn published_phenotypes(&self, brand_id: Option<i32>) -> Result<Vec<(String, i64)>> {
        let found = sqlx::query(
            "SELECT p.id, max(pp.entity_history_id) AS history_id
             FROM phenotypes p
             JOIN published_phenotypes pp
               ON pp.entity_id = p.id AND pp.approval_status = 2
             WHERE NOT p.is_deleted
               AND ($1::integer IS NULL OR $1 = ANY(p.brands))
             GROUP BY p.id
             ORDER BY p.id",
        )
        .bind(brand_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(found
            .iter()
            .map(|row| (row.get("id"), row.get("history_id")))
            .collect())
    }
}

#[async_trait]
impl PublicationStore for PgStore {
    async fn publication_records(
        &self,
        entity_id: &str,
        history_id: i64,
    ) -> Result<Vec<PublicationRecord>> {
        let sql = format!(
            "SELECT {PUBLICATION_COLUMNS} FROM published_phenotypes
             WHERE entity_id = $1 AND entity_history_id = $2
             ORDER BY id"
        );
        let found = sqlx::query(&sql)
            .bind(entity_id)
            .bind(history_id)
            .fetch_all(&self.pool)
            .await?;
        found.iter().map(rows::publication).collect()
    }

    async fn entity_publications(&self, entity_id: &str) -> Result<Vec<PublicationRecord>> {
        let sql = format!(
            "SELECT {PUBLICATION_COLUMNS} FROM published_phenotypes
             WHERE entity_id = $1
             ORDER BY id"
        );
        let found = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        found.iter().map(rows::publication).collect()
    }

    async fn transition_publication(
        &self,
        entity_id: &str,
        history_id: i64,
        transition: Transition,
        actor: &Actor<'_>,
        comment: Option<String>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("publication:{entity_id}:{history_id}"))
            .execute(&mut *tx)
            .await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM phenotype_history WHERE id = $1 AND history_id = $2)",
        )
        .bind(entity_id)
        .bind(history_id)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            return Err(Error::NotFound(format!(
                "phenotype {entity_id} version {history_id}"
            )));
        }

        let records = Self::load_records(&mut tx, entity_id, history_id).await?;
        let plan = publication::plan(&records, transition, actor)?;
        let now = Utc::now();
        let user_id = actor.subject.user_id;

        let row = match plan {
            Plan::NoOp(_) => None,
            Plan::Create(status) => Some(
                sqlx::query(&format!(
                    "INSERT INTO published_phenotypes
                         (entity_id, entity_history_id, approval_status, created_by,
                          created, modified, comment)
                     VALUES ($1, $2, $3, $4, $5, $5, $6)
                     RETURNING {PUBLICATION_COLUMNS}"
                ))
                .bind(entity_id)
                .bind(history_id)
                .bind(status.code())
                .bind(user_id)
                .bind(now)
                .bind(&comment)
                .fetch_one(&mut *tx)
                .await?,
            ),
            Plan::Advance { record_id, to, .. } => Some(
                sqlx::query(&format!(
                    "UPDATE published_phenotypes
                     SET approval_status = $2,
                         moderator_id = $3,
                         modified = $4,
                         decided_at = CASE WHEN $5 THEN $4 ELSE decided_at END,
                         comment = coalesce($6, comment)
                     WHERE id = $1
                     RETURNING {PUBLICATION_COLUMNS}"
                ))
                .bind(record_id)
                .bind(to.code())
                .bind(user_id)
                .bind(now)
                .bind(!to.is_open())
                .bind(&comment)
                .fetch_one(&mut *tx)
                .await?,
            ),
            Plan::Remove { record_id, .. } => Some(
                sqlx::query(&format!(
                    "DELETE FROM published_phenotypes WHERE id = $1 RETURNING {PUBLICATION_COLUMNS}"
                ))
                .bind(record_id)
                .fetch_one(&mut *tx)
                .await?,
            ),
        };
        let record = row.as_ref().map(rows::publication).transpose()?;
        tx.commit().await?;

        Ok(TransitionOutcome { plan, record })
    }

    async fn moderation_queue(
        &self,
        brands: Option<&BTreeSet<i32>>,
    ) -> Result<Vec<PublicationView>> {
        let brands: Option<Vec<i32>> = brands.map(|b| b.iter().copied().collect());
        let found = sqlx::query(
            "SELECT pp.id, pp.entity_id, pp.entity_history_id, pp.approval_status,
                    pp.created_by, pp.moderator_id, pp.created, pp.modified,
                    pp.decided_at, pp.comment, h.name AS version_name
             FROM published_phenotypes pp
             JOIN phenotypes p ON p.id = pp.entity_id
             LEFT JOIN phenotype_history h
               ON h.id = pp.entity_id AND h.history_id = pp.entity_history_id
             WHERE pp.approval_status IN (0, 1)
               AND ($1::integer[] IS NULL OR p.brands && $1)
             ORDER BY pp.created, pp.id",
        )
        .bind(brands)
        .fetch_all(&self.pool)
        .await?;

        found
            .iter()
            .map(|row| {
                let mut view = PublicationView::from(rows::publication(row)?);
                view.name = row.get("version_name");
                Ok(view)
            })
            .collect()
    }
}
