//! Concept endpoints. Ids are accepted with or without the `C` prefix.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::api::extractors::{Caller, QueryPairs};
use crate::models::{ConceptDetail, ExportedCode};
use crate::services::concepts::parse_concept_id;
use crate::state::AppState;
use crate::Result;

#[utoipa::path(
    get,
    path = "/api/v1/concepts/",
    tag = "concepts",
    params(
        ("search" = Option<String>, Query,),
        ("page" = Option<i64>, Query,),
        ("page_size" = Option<u32>, Query,),
    ),
    responses((status = 200, description = "One page of concepts visible to the caller"))
)]
pub async fn list_concepts(
    State(state): State<AppState>,
    Caller(caller): Caller,
    query: QueryPairs,
) -> Result<impl IntoResponse> {
    let text = query
        .get("search")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);
    let page_size = state.search.page_sizes().resolve(query.parse("page_size"));
    let page = state
        .concepts
        .list(text, &caller.subject, query.parse("page"), page_size)
        .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/concepts/{id}/detail/",
    tag = "concepts",
    params(("id" = String, Path, description = "Concept id, e.g. C12")),
    responses((status = 200, body = ConceptDetail))
)]
pub async fn concept_detail(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<ConceptDetail>> {
    let id = parse_concept_id(&id)?;
    Ok(Json(state.concepts.detail(id, None, &caller.subject).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/concepts/{id}/version/{version_id}/detail/",
    tag = "concepts",
    params(("id" = String, Path,), ("version_id" = i64, Path,)),
    responses((status = 200, body = ConceptDetail))
)]
pub async fn concept_version_detail(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((id, version_id)): Path<(String, i64)>,
) -> Result<Json<ConceptDetail>> {
    let id = parse_concept_id(&id)?;
    let detail = state
        .concepts
        .detail(id, Some(version_id), &caller.subject)
        .await?;
    Ok(Json(detail))
}

#[utoipa::path(
    get,
    path = "/api/v1/concepts/{id}/get-versions/",
    tag = "concepts",
    params(("id" = String, Path,)),
    responses((status = 200, description = "Versions of the concept, oldest first"))
)]
pub async fn concept_versions(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<serde_json::Value>>> {
    let id = parse_concept_id(&id)?;
    Ok(Json(state.concepts.versions(id, &caller.subject).await?))
}

/// Final code list after include and exclude components are applied.
#[utoipa::path(
    get,
    path = "/api/v1/concepts/{id}/export/codes/",
    tag = "concepts",
    params(("id" = String, Path,)),
    responses((status = 200, body = [ExportedCode]))
)]
pub async fn export_concept_codes(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<ExportedCode>>> {
    let id = parse_concept_id(&id)?;
    Ok(Json(
        state.concepts.export_codes(id, None, &caller.subject).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/concepts/{id}/version/{version_id}/export/codes/",
    tag = "concepts",
    params(("id" = String, Path,), ("version_id" = i64, Path,)),
    responses((status = 200, body = [ExportedCode]))
)]
pub async fn export_concept_version_codes(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((id, version_id)): Path<(String, i64)>,
) -> Result<Json<Vec<ExportedCode>>> {
    let id = parse_concept_id(&id)?;
    let codes = state
        .concepts
        .export_codes(id, Some(version_id), &caller.subject)
        .await?;
    Ok(Json(codes))
}
