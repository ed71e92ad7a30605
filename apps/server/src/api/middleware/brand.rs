//! Brand dispatch
//!
//! Runs before routing. Resolves the Brand from the host or the first path
//! segment, answers `/api` with a redirect and rewrites the URI so the
//! Brand segment is always upper case.

use axum::{
    extract::{Request, State},
    http::{header, uri::PathAndQuery, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::metrics::BRAND_REQUESTS_TOTAL;
use crate::request_context::BrandContext;
use crate::state::AppState;

fn request_host(req: &Request) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
}

fn rewrite_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

pub async fn brand_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let original_path = req.uri().path().to_string();
    let host = request_host(&req);
    let resolution = state
        .brands
        .resolver()
        .resolve(host.as_deref(), &original_path);

    let via = match (&resolution.brand, resolution.is_external_host) {
        (None, _) => "none",
        (Some(_), true) => "host",
        (Some(_), false) => "path",
    };
    BRAND_REQUESTS_TOTAL
        .with_label_values(&[resolution.brand.as_deref().unwrap_or("none"), via])
        .inc();

    if let Some(location) = &resolution.redirect {
        tracing::debug!(from = %original_path, to = %location, "Redirecting to API root");
        return (StatusCode::FOUND, [(header::LOCATION, location.clone())]).into_response();
    }

    if resolution.routed_path != original_path {
        match rewrite_path(req.uri(), &resolution.routed_path) {
            Some(uri) => *req.uri_mut() = uri,
            None => {
                tracing::warn!(path = %original_path, "Could not rewrite Brand path");
                return StatusCode::BAD_REQUEST.into_response();
            }
        }
    }

    let brand = resolution
        .brand
        .as_deref()
        .and_then(|name| state.brands.get(name))
        .cloned();
    let context = BrandContext {
        swagger_title: state.brands.swagger_title(brand.as_ref()),
        prefix: resolution.prefix(),
        name: resolution.brand.clone(),
        is_external_host: resolution.is_external_host,
        original_path,
        brand,
    };
    req.extensions_mut().insert(context);

    next.run(req).await
}
