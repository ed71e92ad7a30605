//! Reference data: Brands, templates, data sources, tags, collections and
//! coding systems.

use std::sync::Arc;

use crate::db::Store;
use crate::models::{CodeEntry, CodingSystem, DataSource, Tag, TagType, Template};
use crate::{Error, Result};

pub const DEFAULT_CODE_LIMIT: u32 = 50;
pub const MAX_CODE_LIMIT: u32 = 200;

pub struct CatalogueService {
    store: Arc<dyn Store>,
}

impl CatalogueService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn templates(&self) -> Result<Vec<Template>> {
        self.store.templates().await
    }

    pub async fn template(&self, id: i64, version: Option<i64>) -> Result<Template> {
        self.store
            .template_version(id, version)
            .await?
            .ok_or_else(|| match version {
                Some(v) => Error::NotFound(format!("template {id} version {v}")),
                None => Error::NotFound(format!("template {id}")),
            })
    }

    pub async fn template_versions(&self, id: i64) -> Result<Vec<Template>> {
        let versions = self.store.template_versions(id).await?;
        if versions.is_empty() {
            return Err(Error::NotFound(format!("template {id}")));
        }
        Ok(versions)
    }

    pub async fn data_sources(&self) -> Result<Vec<DataSource>> {
        self.store.data_sources().await
    }

    pub async fn data_source(&self, id: i64) -> Result<DataSource> {
        self.store
            .data_source(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("data source {id}")))
    }

    pub async fn tags(&self, tag_type: TagType, brand_id: Option<i32>) -> Result<Vec<Tag>> {
        self.store.tags(tag_type, brand_id).await
    }

    /// A tag of `tag_type`, hidden when it belongs to another Brand.
    pub async fn tag(&self, id: i64, tag_type: TagType, brand_id: Option<i32>) -> Result<Tag> {
        let what = match tag_type {
            TagType::Tag => "tag",
            TagType::Collection => "collection",
        };
        self.store
            .tag(id)
            .await?
            .filter(|t| t.tag_type == tag_type)
            .filter(|t| match (brand_id, t.collection_brand) {
                (Some(active), Some(owner)) => active == owner,
                _ => true,
            })
            .ok_or_else(|| Error::NotFound(format!("{what} {id}")))
    }

    pub async fn coding_systems(&self) -> Result<Vec<CodingSystem>> {
        self.store.coding_systems().await
    }

    pub async fn search_codes(
        &self,
        system_id: i64,
        query: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<CodeEntry>> {
        let system = self
            .store
            .coding_system(system_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("coding system {system_id}")))?;
        let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
            return Err(Error::Validation("search parameter is required".into()));
        };
        let limit = limit.unwrap_or(DEFAULT_CODE_LIMIT).clamp(1, MAX_CODE_LIMIT);
        self.store.search_codes(&system, query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Seed};

    fn store() -> Arc<MemoryStore> {
        let seed = Seed {
            tags: vec![
                Tag {
                    id: 1,
                    description: "Phenotype library".into(),
                    display: None,
                    tag_type: TagType::Collection,
                    collection_brand: Some(1),
                },
                Tag {
                    id: 2,
                    description: "Clinically validated".into(),
                    display: None,
                    tag_type: TagType::Tag,
                    collection_brand: None,
                },
            ],
            ..Seed::default()
        };
        Arc::new(MemoryStore::from_seed(seed).unwrap())
    }

    #[tokio::test]
    async fn collections_of_other_brands_are_hidden() {
        let svc = CatalogueService::new(store());
        assert!(svc.tag(1, TagType::Collection, Some(1)).await.is_ok());
        assert!(svc.tag(1, TagType::Collection, None).await.is_ok());
        assert!(matches!(
            svc.tag(1, TagType::Collection, Some(2)).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            svc.tag(2, TagType::Collection, None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_templates_are_not_found() {
        let svc = CatalogueService::new(store());
        assert!(matches!(svc.template(9, None).await, Err(Error::NotFound(_))));
        assert!(matches!(svc.template_versions(9).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_coding_system_is_not_found() {
        let svc = CatalogueService::new(store());
        assert!(matches!(
            svc.search_codes(1, Some("J45"), None).await,
            Err(Error::NotFound(_))
        ));
    }
}
