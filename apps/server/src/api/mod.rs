//! API layer - routes, handlers, and middleware

pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;

use crate::request_context::BrandContext;
use crate::state::AppState;
use crate::Error;
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    Router,
};

/// Create the main application router
///
/// Brand dispatch wraps the routed application so that its URI rewrite is
/// visible to route matching.
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_request_body_size;
    let cors_origins = state.config.server.cors_origins.clone();
    let brand_names: Vec<String> = state
        .brands
        .resolver()
        .names()
        .map(str::to_string)
        .collect();

    let app = routes::all_routes(brand_names.iter().map(String::as_str))
        .fallback(not_found)
        .with_state(state.clone())
        // Add middleware (applied in reverse order)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::audit_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::read_only_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::security_headers_middleware,
        ))
        .layer(from_fn(middleware::metrics_middleware))
        .layer(from_fn(middleware::request_id_middleware));

    Router::new()
        .fallback_service(app)
        .layer(from_fn_with_state(state, middleware::brand_middleware))
        .layer(middleware::compression())
        .layer(middleware::cors(&cors_origins))
        .layer(middleware::trace())
        .layer(DefaultBodyLimit::max(max_body_size))
}

/// Unmatched paths. Page-like GETs without a trailing slash are redirected
/// to the slashed form; everything else is a 404.
async fn not_found(req: Request) -> Response {
    let path = req
        .extensions()
        .get::<BrandContext>()
        .map(|ctx| ctx.original_path.clone())
        .unwrap_or_else(|| req.uri().path().to_string());

    let last_segment = path.rsplit('/').next().unwrap_or_default();
    let redirectable = matches!(*req.method(), Method::GET | Method::HEAD)
        && !path.ends_with('/')
        && !last_segment.contains('.');
    if redirectable {
        let location = match req.uri().query() {
            Some(query) => format!("{path}/?{query}"),
            None => format!("{path}/"),
        };
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response();
    }

    Error::NotFound(format!("no route for {path}")).into_response()
}
