//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use phenolib_core::brand::BrandResolver;

use crate::config::{Config, StorageBackend};
use crate::db::{MemoryStore, PgStore, Seed, Store};
use crate::models::Brand;
use crate::services::concepts::DEFAULT_CACHE_CAPACITY;
use crate::services::{
    AuditService, CatalogueService, ConceptService, HealthService, LogNotifier, OntologyService,
    PhenotypeService, PublicationService, SearchService, SessionService, SitemapService,
};

/// Brands known at startup. Changing a Brand requires a restart.
#[derive(Debug, Clone)]
pub struct BrandDirectory {
    brands: Vec<Brand>,
    resolver: BrandResolver,
    default_swagger_title: String,
}

impl BrandDirectory {
    pub fn new(brands: Vec<Brand>, config: &Config) -> Self {
        let resolver = BrandResolver::new(brands.iter().map(|b| b.name.as_str()))
            .with_external_hosts(&config.brands.external_hosts, &config.brands.external_brand);
        Self {
            brands,
            resolver,
            default_swagger_title: config.brands.default_swagger_title.clone(),
        }
    }

    pub fn resolver(&self) -> &BrandResolver {
        &self.resolver
    }

    pub fn all(&self) -> &[Brand] {
        &self.brands
    }

    pub fn get(&self, name: &str) -> Option<&Brand> {
        self.brands
            .iter()
            .find(|b| b.name.eq_ignore_ascii_case(name))
    }

    pub fn swagger_title(&self, brand: Option<&Brand>) -> String {
        brand
            .and_then(|b| b.swagger_title.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.default_swagger_title.clone())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub brands: Arc<BrandDirectory>,
    pub search: Arc<SearchService>,
    pub phenotypes: Arc<PhenotypeService>,
    pub publication: Arc<PublicationService>,
    pub concepts: Arc<ConceptService>,
    pub ontology: Arc<OntologyService>,
    pub catalogue: Arc<CatalogueService>,
    pub sessions: Arc<SessionService>,
    pub audit: Arc<AuditService>,
    pub health: Arc<HealthService>,
    pub sitemap: Arc<SitemapService>,
}

impl AppState {
    /// Open the configured backend and build every service over it.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        match config.storage.backend {
            StorageBackend::Postgres => {
                let store = PgStore::connect(&config.database)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                if config.database.run_migrations {
                    store.migrate().await.context("Failed to run migrations")?;
                }
                Self::from_store(config, Arc::new(store)).await
            }
            StorageBackend::Memory => {
                let store = match &config.storage.seed_path {
                    Some(path) => {
                        let seed = Seed::from_path(path)?;
                        MemoryStore::from_seed(seed).context("Invalid seed data")?
                    }
                    None => MemoryStore::new(),
                };
                tracing::warn!("Using the in-memory store; data is lost on restart");
                Self::from_store(config, Arc::new(store)).await
            }
        }
    }

    pub async fn from_store<S>(config: Config, store: Arc<S>) -> anyhow::Result<Self>
    where
        S: Store + 'static,
    {
        let brands = store.brands().await.context("Failed to load Brands")?;
        tracing::info!(count = brands.len(), "Brands loaded");
        let brands = BrandDirectory::new(brands, &config);

        let page_sizes = config
            .search
            .page_sizes()
            .map_err(|e| anyhow::anyhow!("Invalid page sizes: {e}"))?;
        let rules = config
            .audit
            .rules()
            .map_err(|e| anyhow::anyhow!("Invalid audit rules: {e}"))?;

        let audit = AuditService::new(
            store.clone(),
            config.audit.enabled,
            rules,
            config.audit.remote_addr_policy(),
            config.audit.queue_capacity,
        );

        let store: Arc<dyn Store> = store;

        let search = SearchService::new(
            store.clone(),
            page_sizes,
            config.search.weights(),
            config.search.timeout_base(),
            config.search.timeout_per_row(),
        );
        let concepts = Arc::new(ConceptService::new(store.clone(), DEFAULT_CACHE_CAPACITY));
        let phenotypes = Arc::new(PhenotypeService::new(store.clone(), concepts.clone()));
        let publication = PublicationService::new(
            store.clone(),
            phenotypes.clone(),
            Arc::new(LogNotifier),
        );
        let sessions = SessionService::new(
            store.clone(),
            config.session.expiry_policy(),
            config.session.cookie_name.clone(),
        );
        let health = HealthService::new(
            store.clone(),
            config.server.mode(),
            config.server.read_only,
            config.redis.broker_url.clone(),
            Duration::from_millis(config.redis.timeout_ms),
        );

        Ok(Self {
            search: Arc::new(search),
            phenotypes,
            publication: Arc::new(publication),
            concepts,
            ontology: Arc::new(OntologyService::new(store.clone(), config.search.weights())),
            catalogue: Arc::new(CatalogueService::new(store.clone())),
            sessions: Arc::new(sessions),
            audit: Arc::new(audit),
            health: Arc::new(health),
            sitemap: Arc::new(SitemapService::new(store.clone())),
            brands: Arc::new(brands),
            store,
            config: Arc::new(config),
        })
    }
}
