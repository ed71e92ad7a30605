//! OpenAPI description of the v1 API, titled per Brand.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use utoipa::openapi::{OpenApi as OpenApiDoc, Server};
use utoipa::OpenApi;

use crate::api::extractors::ActiveBrand;
use crate::api::handlers::{catalogue, concepts, ontology, phenotypes, publication, site};
use crate::models::{
    CodeEntry, CodingSystem, Concept, ConceptComponentView, ConceptDetail, DataSource,
    ExportedCode, NewEdge, NodeRef, OntologyNodeView, OntologyType, Phenotype, PhenotypeDetail,
    PhenotypeInput, PhenotypeSummary, PublicationView, Tag, Template, UpdatePhenotypeRequest,
    VersionInfo,
};
use crate::services::ontology::{AddedEdge, OntologyTypeView};
use crate::services::{HealthReport, TransitionResult};
use crate::{Error, Result};

#[derive(OpenApi)]
#[openapi(
    info(
        description = "Clinical phenotype library: phenotypes, concepts, templates and ontology"
    ),
    paths(
        phenotypes::list_phenotypes,
        phenotypes::phenotype_detail,
        phenotypes::phenotype_version_detail,
        phenotypes::phenotype_versions,
        phenotypes::export_phenotype,
        phenotypes::export_phenotype_version,
        phenotypes::create_phenotype,
        phenotypes::update_phenotype,
        publication::transition,
        publication::publication_history,
        publication::moderation_queue,
        concepts::list_concepts,
        concepts::concept_detail,
        concepts::concept_version_detail,
        concepts::concept_versions,
        concepts::export_concept_codes,
        concepts::export_concept_version_codes,
        catalogue::list_templates,
        catalogue::template_detail,
        catalogue::template_version_detail,
        catalogue::template_versions,
        catalogue::list_data_sources,
        catalogue::data_source_detail,
        catalogue::list_tags,
        catalogue::tag_detail,
        catalogue::list_collections,
        catalogue::collection_detail,
        catalogue::list_coding_systems,
        catalogue::search_codes,
        ontology::list_ontology_types,
        ontology::ontology_type,
        ontology::search_ontology_nodes,
        ontology::ontology_node,
        ontology::ontology_ancestors,
        ontology::ontology_descends_from,
        ontology::add_ontology_edge,
        site::healthcheck,
    ),
    components(schemas(
        Phenotype,
        PhenotypeDetail,
        PhenotypeInput,
        PhenotypeSummary,
        UpdatePhenotypeRequest,
        VersionInfo,
        PublicationView,
        TransitionResult,
        publication::TransitionBody,
        Concept,
        ConceptComponentView,
        ConceptDetail,
        ExportedCode,
        Template,
        DataSource,
        Tag,
        CodingSystem,
        CodeEntry,
        OntologyType,
        OntologyTypeView,
        OntologyNodeView,
        NodeRef,
        NewEdge,
        AddedEdge,
        ontology::LineageCheck,
        HealthReport,
    )),
    tags(
        (name = "phenotypes", description = "Versioned phenotype definitions"),
        (name = "publication", description = "Publication requests and moderation"),
        (name = "concepts", description = "Concepts and their resolved code lists"),
        (name = "templates", description = "Phenotype templates"),
        (name = "reference", description = "Data sources, tags, collections and coding systems"),
        (name = "ontology", description = "Ontology types, nodes and edges"),
        (name = "site", description = "Operational endpoints"),
    )
)]
pub struct ApiDoc;

/// The API description for the active Brand.
pub fn document(title: &str, prefix: &str) -> OpenApiDoc {
    let mut doc = ApiDoc::openapi();
    doc.info.title = title.to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    if !prefix.is_empty() {
        doc.servers = Some(vec![Server::new(prefix)]);
    }
    doc
}

pub async fn swagger_json(ActiveBrand(brand): ActiveBrand) -> Json<OpenApiDoc> {
    Json(document(&brand.swagger_title, &brand.prefix))
}

pub async fn swagger_yaml(ActiveBrand(brand): ActiveBrand) -> Result<Response> {
    let yaml = serde_yaml::to_string(&document(&brand.swagger_title, &brand.prefix))
        .map_err(|e| Error::Internal(format!("failed to render OpenAPI YAML: {e}")))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/yaml; charset=utf-8")],
        yaml,
    )
        .into_response())
}

const SWAGGER_UI_CDN: &str = "https://unpkg.com/swagger-ui-dist@5";

fn swagger_page(title: &str, spec_url: &str) -> String {
    let title = html_escape::encode_text(title);
    let spec_url = html_escape::encode_double_quoted_attribute(spec_url);
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <link rel="stylesheet" href="{SWAGGER_UI_CDN}/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui" data-url="{spec_url}"></div>
  <script src="{SWAGGER_UI_CDN}/swagger-ui-bundle.js"></script>
  <script>
    window.ui = SwaggerUIBundle({{
      url: document.getElementById("swagger-ui").dataset.url,
      dom_id: "#swagger-ui"
    }});
  </script>
</body>
</html>
"##
    )
}

pub async fn swagger_ui(ActiveBrand(brand): ActiveBrand) -> Response {
    let spec_url = format!("{}/api/v1/swagger.json", brand.prefix);
    let mut response = (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        swagger_page(&brand.swagger_title, &spec_url),
    )
        .into_response();
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self' 'unsafe-inline' https://unpkg.com; \
             style-src 'self' 'unsafe-inline' https://unpkg.com; img-src 'self' data:",
        ),
    );
    response
}
