//! Reference data endpoints: templates, data sources, tags, collections and
//! coding systems.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::extractors::{ActiveBrand, QueryPairs};
use crate::models::{CodeEntry, CodingSystem, DataSource, Tag, TagType, Template};
use crate::state::AppState;
use crate::Result;

#[utoipa::path(
    get,
    path = "/api/v1/templates/",
    tag = "templates",
    responses((status = 200, body = [Template]))
)]
pub async fn list_templates(State(state): State<AppState>) -> Result<Json<Vec<Template>>> {
    Ok(Json(state.catalogue.templates().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}/detail/",
    tag = "templates",
    params(("id" = i64, Path,)),
    responses((status = 200, body = Template))
)]
pub async fn template_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Template>> {
    Ok(Json(state.catalogue.template(id, None).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}/version/{version_id}/detail/",
    tag = "templates",
    params(("id" = i64, Path,), ("version_id" = i64, Path,)),
    responses((status = 200, body = Template))
)]
pub async fn template_version_detail(
    State(state): State<AppState>,
    Path((id, version_id)): Path<(i64, i64)>,
) -> Result<Json<Template>> {
    Ok(Json(state.catalogue.template(id, Some(version_id)).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}/get-versions/",
    tag = "templates",
    params(("id" = i64, Path,)),
    responses((status = 200, body = [Template]))
)]
pub async fn template_versions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Template>>> {
    Ok(Json(state.catalogue.template_versions(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/data-sources/",
    tag = "reference",
    responses((status = 200, body = [DataSource]))
)]
pub async fn list_data_sources(State(state): State<AppState>) -> Result<Json<Vec<DataSource>>> {
    Ok(Json(state.catalogue.data_sources().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/data-sources/{id}/detail/",
    tag = "reference",
    params(("id" = i64, Path,)),
    responses((status = 200, body = DataSource))
)]
pub async fn data_source_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DataSource>> {
    Ok(Json(state.catalogue.data_source(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/tags/",
    tag = "reference",
    responses((status = 200, body = [Tag]))
)]
pub async fn list_tags(
    State(state): State<AppState>,
    ActiveBrand(brand): ActiveBrand,
) -> Result<Json<Vec<Tag>>> {
    Ok(Json(
        state.catalogue.tags(TagType::Tag, brand.brand_id()).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/tags/{id}/detail/",
    tag = "reference",
    params(("id" = i64, Path,)),
    responses((status = 200, body = Tag))
)]
pub async fn tag_detail(
    State(state): State<AppState>,
    ActiveBrand(brand): ActiveBrand,
    Path(id): Path<i64>,
) -> Result<Json<Tag>> {
    Ok(Json(
        state
            .catalogue
            .tag(id, TagType::Tag, brand.brand_id())
            .await?,
    ))
}

/// Collections of the active Brand and unbranded ones.
#[utoipa::path(
    get,
    path = "/api/v1/collections/",
    tag = "reference",
    responses((status = 200, body = [Tag]))
)]
pub async fn list_collections(
    State(state): State<AppState>,
    ActiveBrand(brand): ActiveBrand,
) -> Result<Json<Vec<Tag>>> {
    Ok(Json(
        state
            .catalogue
            .tags(TagType::Collection, brand.brand_id())
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/collections/{id}/detail/",
    tag = "reference",
    params(("id" = i64, Path,)),
    responses((status = 200, body = Tag))
)]
pub async fn collection_detail(
    State(state): State<AppState>,
    ActiveBrand(brand): ActiveBrand,
    Path(id): Path<i64>,
) -> Result<Json<Tag>> {
    Ok(Json(
        state
            .catalogue
            .tag(id, TagType::Collection, brand.brand_id())
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/coding-systems/",
    tag = "reference",
    responses((status = 200, body = [CodingSystem]))
)]
pub async fn list_coding_systems(
    State(state): State<AppState>,
) -> Result<Json<Vec<CodingSystem>>> {
    Ok(Json(state.catalogue.coding_systems().await?))
}

/// Trigram and prefix look-up over a coding system's codes.
#[utoipa::path(
    get,
    path = "/api/v1/coding-systems/{id}/codes/",
    tag = "reference",
    params(
        ("id" = i64, Path,),
        ("search" = String, Query, description = "Code or description fragment"),
        ("limit" = Option<u32>, Query,),
    ),
    responses(
        (status = 200, body = [CodeEntry]),
        (status = 400, description = "Missing search parameter"),
    )
)]
pub async fn search_codes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: QueryPairs,
) -> Result<Json<Vec<CodeEntry>>> {
    let codes = state
        .catalogue
        .search_codes(id, query.get("search"), query.parse("limit"))
        .await?;
    Ok(Json(codes))
}
