//! Reference data: Brands, templates, data sources, tags, coding systems and
//! code look-ups.

use async_trait::async_trait;
use phenolib_textsearch::trigram;
use sqlx::Row;

use super::rows;
use super::PgStore;
use crate::db::traits::CatalogueStore;
use crate::models::{Brand, CodeEntry, CodingSystem, DataSource, Tag, TagType, Template};
use crate::{Error, Result};

const CODING_SYSTEM_COLUMNS: &str =
    "id, name, description, link, table_name, code_column_name, desc_column_name";

const TEMPLATE_COLUMNS: &str = "id, version_id, name, description, definition, created";

/// `LIKE` pattern matching values starting with `prefix`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Prefix or trigram match over the code table of `system`.
/// Binds: `$1` query, `$2` lower-case prefix pattern, `$3` similarity floor,
/// `$4` limit.
fn code_search_sql(system: &CodingSystem) -> Result<String> {
    if !system.has_safe_identifiers() {
        return Err(Error::Internal(format!(
            "coding system {} has unsafe identifiers",
            system.id
        )));
    }
    let code = &system.code_column_name;
    let desc = &system.desc_column_name;
    Ok(format!(
        "SELECT code, description, score
         FROM (
             SELECT {code}::text AS code,
                    coalesce({desc}::text, '') AS description,
                    GREATEST(similarity({code}::text, $1),
                             similarity(coalesce({desc}::text, ''), $1))::float8 AS score,
                    lower({code}::text) LIKE $2 ESCAPE '\\' AS is_prefix
             FROM {table}
         ) matched
         WHERE is_prefix OR score >= $3
         ORDER BY is_prefix DESC, score DESC, code ASC
         LIMIT $4",
        table = system.table_name,
    ))
}

#[async_trait]
impl CatalogueStore for PgStore {
    async fn brands(&self) -> Result<Vec<Brand>> {
        let found = sqlx::query(
            "SELECT b.id, b.name, b.site_title, b.description, b.logo_path, b.swagger_title,
                    b.map_rules,
                    ARRAY(SELECT a.user_id FROM brand_admins a
                          WHERE a.brand_id = b.id ORDER BY a.user_id) AS admins
             FROM brands b
             ORDER BY b.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(found.iter().map(rows::brand).collect())
    }

    async fn templates(&self) -> Result<Vec<Template>> {
        let sql = format!(
            "SELECT DISTINCT ON (id) {TEMPLATE_COLUMNS}
             FROM templates
             ORDER BY id, version_id DESC"
        );
        let found = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(found.iter().map(rows::template).collect())
    }

    async fn template_version(&self, id: i64, version: Option<i64>) -> Result<Option<Template>> {
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS}
             FROM templates
             WHERE id = $1 AND ($2::bigint IS NULL OR version_id = $2)
             ORDER BY version_id DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(rows::template))
    }

    async fn template_versions(&self, id: i64) -> Result<Vec<Template>> {
        let sql =
            format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1 ORDER BY version_id");
        let found = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        Ok(found.iter().map(rows::template).collect())
    }

    async fn data_sources(&self) -> Result<Vec<DataSource>> {
        let found =
            sqlx::query("SELECT id, name, url, description, source FROM data_sources ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(found.iter().map(rows::data_source).collect())
    }

    async fn data_source(&self, id: i64) -> Result<Option<DataSource>> {
        let row =
            sqlx::query("SELECT id, name, url, description, source FROM data_sources WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.as_ref().map(rows::data_source))
    }

    async fn tags(&self, tag_type: TagType, brand_id: Option<i32>) -> Result<Vec<Tag>> {
        let found = sqlx::query(
            "SELECT id, description, display, tag_type, collection_brand
             FROM tags
             WHERE tag_type = $1
               AND ($2::integer IS NULL OR collection_brand IS NULL OR collection_brand = $2)
             ORDER BY id",
        )
        .bind(tag_type.code())
        .bind(brand_id)
        .fetch_all(&self.pool)
        .await?;
        found.iter().map(rows::tag).collect()
    }

    async fn tag(&self, id: i64) -> Result<Option<Tag>> {
        let row = sqlx::query(
            "SELECT id, description, display, tag_type, collection_brand FROM tags WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(rows::tag).transpose()
    }

    async fn coding_systems(&self) -> Result<Vec<CodingSystem>> {
        let sql = format!("SELECT {CODING_SYSTEM_COLUMNS} FROM coding_systems ORDER BY id");
        let found = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(found.iter().map(rows::coding_system).collect())
    }

    async fn coding_system(&self, id: i64) -> Result<Option<CodingSystem>> {
        let sql = format!("SELECT {CODING_SYSTEM_COLUMNS} FROM coding_systems WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(rows::coding_system))
    }

    async fn search_codes(
        &self,
        system: &CodingSystem,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CodeEntry>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let sql = code_search_sql(system)?;
        let found = sqlx::query(&sql)
            .bind(query)
            .bind(like_prefix(&query.to_lowercase()))
            .bind(trigram::DEFAULT_THRESHOLD)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(found
            .iter()
            .map(|row| CodeEntry {
                code: row.get("code"),
                description: row.get("description"),
                score: row.get("score"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(like_prefix("e11"), "e11%");
        assert_eq!(like_prefix("50%_"), "50\\%\\_%");
    }

    #[test]
    fn code_search_uses_the_system_columns() {
        let system = CodingSystem {
            id: 2,
            name: "Read codes v2".into(),
            description: String::new(),
            link: None,
            table_name: "read_cv2_codes".into(),
            code_column_name: "code".into(),
            desc_column_name: "description".into(),
        };
        let sql = code_search_sql(&system).unwrap();
        assert!(sql.contains("FROM read_cv2_codes"));
        assert!(sql.contains("ORDER BY is_prefix DESC, score DESC, code ASC"));
    }
}
