//! Ontology endpoints.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::api::extractors::{Caller, JsonBody, QueryPairs};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{NewEdge, NodeRef, OntologyNodeView, OntologyType};
use crate::services::ontology::{AddedEdge, OntologyTypeView};
use crate::state::AppState;
use crate::Result;

#[utoipa::path(
    get,
    path = "/api/v1/ontology/",
    tag = "ontology",
    responses((status = 200, body = [OntologyType]))
)]
pub async fn list_ontology_types(
    State(state): State<AppState>,
) -> Result<Json<Vec<OntologyType>>> {
    Ok(Json(state.ontology.types().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/ontology/type/{id}/",
    tag = "ontology",
    params(("id" = i32, Path,)),
    responses((status = 200, body = OntologyTypeView))
)]
pub async fn ontology_type(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<OntologyTypeView>> {
    Ok(Json(state.ontology.type_roots(id).await?))
}

/// Ranked node search; roots when `search` is blank.
#[utoipa::path(
    get,
    path = "/api/v1/ontology/node/",
    tag = "ontology",
    params(
        ("search" = Option<String>, Query,),
        ("type" = Option<i32>, Query, description = "Restrict to one ontology type"),
        ("limit" = Option<u32>, Query,),
    ),
    responses((status = 200, body = [OntologyNodeView]))
)]
pub async fn search_ontology_nodes(
    State(state): State<AppState>,
    query: QueryPairs,
) -> Result<Json<Vec<OntologyNodeView>>> {
    let type_id = query.parse("type").or_else(|| query.parse("type_id"));
    let nodes = state
        .ontology
        .search(query.get("search"), type_id, query.parse("limit"))
        .await?;
    Ok(Json(nodes))
}

#[utoipa::path(
    get,
    path = "/api/v1/ontology/node/{id}/",
    tag = "ontology",
    params(("id" = i64, Path,)),
    responses((status = 200, body = OntologyNodeView))
)]
pub async fn ontology_node(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OntologyNodeView>> {
    Ok(Json(state.ontology.node(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/ontology/node/{id}/ancestors/",
    tag = "ontology",
    params(("id" = i64, Path,)),
    responses((status = 200, body = [NodeRef]))
)]
pub async fn ontology_ancestors(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<NodeRef>>> {
    Ok(Json(state.ontology.ancestors(id).await?))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LineageCheck {
    pub node: i64,
    pub parents: Vec<i64>,
    pub is_descendant: bool,
}

/// Whether the node lies below any of the comma-separated `parents`.
#[utoipa::path(
    get,
    path = "/api/v1/ontology/node/{id}/descends-from/",
    tag = "ontology",
    params(
        ("id" = i64, Path,),
        ("parents" = String, Query, description = "Comma-separated node ids"),
    ),
    responses((status = 200, body = LineageCheck))
)]
pub async fn ontology_descends_from(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: QueryPairs,
) -> Result<Json<LineageCheck>> {
    let parents: BTreeSet<i64> = query
        .get("parents")
        .unwrap_or_default()
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect();
    let is_descendant = state
        .ontology
        .is_descendant(&parents, &BTreeSet::from([id]))
        .await?;
    Ok(Json(LineageCheck {
        node: id,
        parents: parents.into_iter().collect(),
        is_descendant,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/ontology/edge/",
    tag = "ontology",
    request_body = NewEdge,
    responses(
        (status = 201, body = AddedEdge),
        (status = 200, body = AddedEdge, description = "Edge already present"),
        (status = 400, description = "The edge would create a cycle"),
        (status = 403, description = "Superuser required"),
    )
)]
pub async fn add_ontology_edge(
    State(state): State<AppState>,
    Caller(caller): Caller,
    JsonBody(edge): JsonBody<NewEdge>,
) -> Result<impl IntoResponse> {
    let added = state
        .ontology
        .add_edge(edge.parent_id, edge.child_id, &caller.subject)
        .await?;
    let status = if added.inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(added)))
}
