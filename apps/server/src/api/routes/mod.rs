//! Route tables
//!
//! Every Brand serves the same routes under its own `/{BRAND}` prefix; the
//! unprefixed table serves requests without a Brand and external Brand
//! hosts.

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::{catalogue, concepts, ontology, phenotypes, publication, site};
use crate::api::openapi;
use crate::state::AppState;

/// Versioned JSON API under `{prefix}/api/v1/`.
pub fn api_routes(prefix: &str) -> Router<AppState> {
    let base = format!("{prefix}/api/v1");
    let at = |path: &str| format!("{base}{path}");

    Router::new()
        .route(&at("/"), get(site::api_root))
        .route(&at("/swagger/"), get(openapi::swagger_ui))
        .route(&at("/swagger.json"), get(openapi::swagger_json))
        .route(&at("/swagger.yaml"), get(openapi::swagger_yaml))
        // Phenotypes
        .route(&at("/phenotypes/"), get(phenotypes::list_phenotypes))
        .route(&at("/phenotypes/create/"), post(phenotypes::create_phenotype))
        .route(&at("/phenotypes/update/"), post(phenotypes::update_phenotype))
        .route(&at("/phenotypes/:id/detail/"), get(phenotypes::phenotype_detail))
        .route(
            &at("/phenotypes/:id/version/:version_id/detail/"),
            get(phenotypes::phenotype_version_detail),
        )
        .route(
            &at("/phenotypes/:id/get-versions/"),
            get(phenotypes::phenotype_versions),
        )
        .route(
            &at("/phenotypes/:id/export/:field/"),
            get(phenotypes::export_phenotype),
        )
        .route(
            &at("/phenotypes/:id/version/:version_id/export/:field/"),
            get(phenotypes::export_phenotype_version),
        )
        // Publication
        .route(
            &at("/phenotypes/:id/version/:version_id/publication/"),
            get(publication::publication_history),
        )
        .route(
            &at("/phenotypes/:id/version/:version_id/publication/:action/"),
            post(publication::transition),
        )
        .route(&at("/moderation/"), get(publication::moderation_queue))
        // Concepts
        .route(&at("/concepts/"), get(concepts::list_concepts))
        .route(&at("/concepts/:id/detail/"), get(concepts::concept_detail))
        .route(
            &at("/concepts/:id/version/:version_id/detail/"),
            get(concepts::concept_version_detail),
        )
        .route(
            &at("/concepts/:id/get-versions/"),
            get(concepts::concept_versions),
        )
        .route(
            &at("/concepts/:id/export/codes/"),
            get(concepts::export_concept_codes),
        )
        .route(
            &at("/concepts/:id/version/:version_id/export/codes/"),
            get(concepts::export_concept_version_codes),
        )
        // Templates
        .route(&at("/templates/"), get(catalogue::list_templates))
        .route(&at("/templates/:id/detail/"), get(catalogue::template_detail))
        .route(
            &at("/templates/:id/version/:version_id/detail/"),
            get(catalogue::template_version_detail),
        )
        .route(
            &at("/templates/:id/get-versions/"),
            get(catalogue::template_versions),
        )
        // Reference data
        .route(&at("/data-sources/"), get(catalogue::list_data_sources))
        .route(
            &at("/data-sources/:id/detail/"),
            get(catalogue::data_source_detail),
        )
        .route(&at("/tags/"), get(catalogue::list_tags))
        .route(&at("/tags/:id/detail/"), get(catalogue::tag_detail))
        .route(&at("/collections/"), get(catalogue::list_collections))
        .route(
            &at("/collections/:id/detail/"),
            get(catalogue::collection_detail),
        )
        .route(&at("/coding-systems/"), get(catalogue::list_coding_systems))
        .route(
            &at("/coding-systems/:id/codes/"),
            get(catalogue::search_codes),
        )
        // Ontology
        .route(&at("/ontology/"), get(ontology::list_ontology_types))
        .route(&at("/ontology/type/:id/"), get(ontology::ontology_type))
        .route(&at("/ontology/node/"), get(ontology::search_ontology_nodes))
        .route(&at("/ontology/node/:id/"), get(ontology::ontology_node))
        .route(
            &at("/ontology/node/:id/ancestors/"),
            get(ontology::ontology_ancestors),
        )
        .route(
            &at("/ontology/node/:id/descends-from/"),
            get(ontology::ontology_descends_from),
        )
        .route(&at("/ontology/edge/"), post(ontology::add_ontology_edge))
}

/// Site pages under `{prefix}/`. Detail pages answer with the same JSON
/// as the API.
pub fn site_routes(prefix: &str) -> Router<AppState> {
    let home = if prefix.is_empty() {
        "/".to_string()
    } else {
        format!("{prefix}/")
    };

    Router::new()
        .route(&home, get(site::home))
        .route(
            &format!("{prefix}/phenotypes/:id/detail/"),
            get(phenotypes::phenotype_detail),
        )
        .route(
            &format!("{prefix}/phenotypes/:id/version/:version_id/detail/"),
            get(phenotypes::phenotype_version_detail),
        )
        .route(&format!("{prefix}/robots.txt"), get(site::robots))
        .route(&format!("{prefix}/sitemap.xml"), get(site::sitemap))
}

/// Unbranded operational endpoints.
pub fn operational_routes() -> Router<AppState> {
    Router::new()
        .route("/healthcheck/", get(site::healthcheck))
        .route("/metrics", get(site::metrics))
        .route("/favicon.ico", get(site::favicon))
}

/// Routes for the unprefixed site and every Brand prefix.
pub fn all_routes<'a, I>(brands: I) -> Router<AppState>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut router = operational_routes()
        .merge(api_routes(""))
        .merge(site_routes(""));
    for name in brands {
        let prefix = format!("/{name}");
        router = router
            .merge(api_routes(&prefix))
            .merge(site_routes(&prefix));
    }
    router
}
