//! Phenotype endpoints: search, detail, versions, export and writes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::api::extractors::{ActiveBrand, Caller, JsonBody, QueryPairs};
use crate::models::{
    ExportedCode, Phenotype, PhenotypeDetail, PhenotypeInput, UpdatePhenotypeRequest, VersionInfo,
};
use crate::state::AppState;
use crate::Result;

/// Search phenotypes visible in the active Brand.
#[utoipa::path(
    get,
    path = "/api/v1/phenotypes/",
    tag = "phenotypes",
    params(
        ("search" = Option<String>, Query, description = "Free-text query"),
        ("page" = Option<i64>, Query, description = "1-based page; clamped to the last page"),
        ("page_size" = Option<u32>, Query, description = "One of the configured page sizes"),
        ("ordering" = Option<String>, Query, description = "relevance, name, created, updated or id; prefix - for descending"),
    ),
    responses((status = 200, description = "One page of phenotype summaries"))
)]
pub async fn list_phenotypes(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    QueryPairs(params): QueryPairs,
) -> Result<impl IntoResponse> {
    let page = state
        .search
        .search(&params, &caller.subject, brand.brand_id())
        .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/phenotypes/{id}/detail/",
    tag = "phenotypes",
    params(("id" = String, Path, description = "Phenotype id, e.g. PH1")),
    responses(
        (status = 200, body = PhenotypeDetail),
        (status = 404, description = "Unknown or not visible"),
    )
)]
pub async fn phenotype_detail(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    Path(id): Path<String>,
) -> Result<Json<PhenotypeDetail>> {
    let detail = state
        .phenotypes
        .detail(&id, None, &caller.subject, brand.brand_id())
        .await?;
    Ok(Json(detail))
}

#[utoipa::path(
    get,
    path = "/api/v1/phenotypes/{id}/version/{version_id}/detail/",
    tag = "phenotypes",
    params(
        ("id" = String, Path,),
        ("version_id" = i64, Path,),
    ),
    responses((status = 200, body = PhenotypeDetail))
)]
pub async fn phenotype_version_detail(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    Path((id, version_id)): Path<(String, i64)>,
) -> Result<Json<PhenotypeDetail>> {
    let detail = state
        .phenotypes
        .detail(&id, Some(version_id), &caller.subject, brand.brand_id())
        .await?;
    Ok(Json(detail))
}

#[utoipa::path(
    get,
    path = "/api/v1/phenotypes/{id}/get-versions/",
    tag = "phenotypes",
    params(("id" = String, Path,)),
    responses((status = 200, body = [VersionInfo]))
)]
pub async fn phenotype_versions(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    Path(id): Path<String>,
) -> Result<Json<Vec<VersionInfo>>> {
    let versions = state
        .phenotypes
        .versions(&id, &caller.subject, brand.brand_id())
        .await?;
    Ok(Json(versions))
}

/// Resolve the codes of every concept listed in a `template_data` field.
#[utoipa::path(
    get,
    path = "/api/v1/phenotypes/{id}/export/{field}/",
    tag = "phenotypes",
    params(
        ("id" = String, Path,),
        ("field" = String, Path, description = "template_data field; `codes` is concept_information"),
    ),
    responses((status = 200, body = [ExportedCode]))
)]
pub async fn export_phenotype(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    Path((id, field)): Path<(String, String)>,
) -> Result<Json<Vec<ExportedCode>>> {
    let codes = state
        .phenotypes
        .export(&id, None, &field, &caller.subject, brand.brand_id())
        .await?;
    Ok(Json(codes))
}

#[utoipa::path(
    get,
    path = "/api/v1/phenotypes/{id}/version/{version_id}/export/{field}/",
    tag = "phenotypes",
    params(
        ("id" = String, Path,),
        ("version_id" = i64, Path,),
        ("field" = String, Path,),
    ),
    responses((status = 200, body = [ExportedCode]))
)]
pub async fn export_phenotype_version(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    Path((id, version_id, field)): Path<(String, i64, String)>,
) -> Result<Json<Vec<ExportedCode>>> {
    let codes = state
        .phenotypes
        .export(&id, Some(version_id), &field, &caller.subject, brand.brand_id())
        .await?;
    Ok(Json(codes))
}

#[utoipa::path(
    post,
    path = "/api/v1/phenotypes/create/",
    tag = "phenotypes",
    request_body = PhenotypeInput,
    responses(
        (status = 201, body = Phenotype),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Sign-in required"),
    )
)]
pub async fn create_phenotype(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    JsonBody(input): JsonBody<PhenotypeInput>,
) -> Result<impl IntoResponse> {
    let created = state
        .phenotypes
        .create(input, &caller.subject, brand.brand_id())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    post,
    path = "/api/v1/phenotypes/update/",
    tag = "phenotypes",
    request_body = UpdatePhenotypeRequest,
    responses(
        (status = 200, body = Phenotype),
        (status = 403, description = "Caller lacks EDIT access"),
    )
)]
pub async fn update_phenotype(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    JsonBody(request): JsonBody<UpdatePhenotypeRequest>,
) -> Result<Json<Phenotype>> {
    let updated = state
        .phenotypes
        .update(request, &caller.subject, brand.brand_id())
        .await?;
    tracing::info!(
        id = %updated.id,
        history_id = updated.history_id,
        "Phenotype version appended"
    );
    Ok(Json(updated))
}
