//! Site-level endpoints: home, API root, health, robots.txt and sitemap.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;

use crate::api::extractors::ActiveBrand;
use crate::services::sitemap::robots_txt;
use crate::services::HealthReport;
use crate::state::AppState;
use crate::Result;

/// `scheme://host` of the request, honouring `x-forwarded-proto`.
pub fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|s| s.eq_ignore_ascii_case("https") || s.eq_ignore_ascii_case("http"))
        .unwrap_or("http");
    format!("{}://{}", scheme.to_ascii_lowercase(), host)
}

pub async fn home(
    State(state): State<AppState>,
    ActiveBrand(brand): ActiveBrand,
) -> impl IntoResponse {
    Json(json!({
        "brand": brand.name,
        "site_title": brand.brand.as_ref().map(|b| b.site_title.clone()),
        "description": brand.brand.as_ref().map(|b| b.description.clone()),
        "api": format!("{}/api/v1/", brand.prefix),
        "read_only": state.config.server.read_only,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Index of the v1 API.
pub async fn api_root(ActiveBrand(brand): ActiveBrand) -> impl IntoResponse {
    let base = format!("{}/api/v1", brand.prefix);
    let resources = [
        "templates",
        "phenotypes",
        "concepts",
        "data-sources",
        "tags",
        "collections",
        "coding-systems",
        "ontology",
        "moderation",
    ];
    let links: serde_json::Map<String, serde_json::Value> = resources
        .iter()
        .map(|r| (r.to_string(), json!(format!("{base}/{r}/"))))
        .collect();
    Json(json!({
        "title": brand.swagger_title,
        "resources": links,
        "swagger": format!("{base}/swagger/"),
        "openapi": format!("{base}/swagger.json"),
    }))
}

#[utoipa::path(
    get,
    path = "/healthcheck/",
    tag = "site",
    responses(
        (status = 200, body = HealthReport),
        (status = 503, body = HealthReport, description = "A dependency is unhealthy"),
    )
)]
pub async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        tracing::warn!(
            postgres_healthy = report.postgres_healthy,
            redis_healthy = ?report.redis_healthy,
            "Health check failed"
        );
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn robots(ActiveBrand(brand): ActiveBrand, headers: HeaderMap) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        robots_txt(&base_url(&headers), &brand.prefix),
    )
}

pub async fn sitemap(
    State(state): State<AppState>,
    ActiveBrand(brand): ActiveBrand,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let xml = state
        .sitemap
        .sitemap_xml(&base_url(&headers), &brand.prefix, brand.brand_id())
        .await?;
    Ok(([(header::CONTENT_TYPE, "application/xml; charset=utf-8")], xml))
}

/// Prometheus text exposition of every registered metric.
pub async fn metrics() -> impl IntoResponse {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            b"Failed to encode metrics".to_vec(),
        );
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

pub async fn favicon() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
