//! Request span, request ID and completion log
//!
//! Opens the `http_request` span every other layer logs under. The response
//! carries a fresh `x-request-id`, the OpenTelemetry `x-trace-id`, and the
//! caller's own ID in `x-correlation-id` when one was sent.

use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use opentelemetry::trace::TraceContextExt;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use crate::metrics::extract_resource;
use crate::request_context::BrandContext;

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[tracing::instrument(
    name = "http_request",
    skip_all,
    fields(
        http.method = %req.method(),
        http.route = %req.uri().path(),
        otel.kind = "server",
        http.response.status_code = tracing::field::Empty,
        brand = tracing::field::Empty,
        api.resource = tracing::field::Empty,
        request_id = tracing::field::Empty,
        user_id = tracing::field::Empty,
    )
)]
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let span = Span::current();
    let started = Instant::now();

    let request_id = Uuid::new_v4().to_string();
    span.record("request_id", request_id.as_str());

    let correlation_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
        .map(String::from);

    // The Brand prefix is already stripped from the URI here.
    let brand = req.extensions().get::<BrandContext>();
    let brand_name = brand.and_then(|ctx| ctx.name.clone());
    let path = brand
        .map(|ctx| ctx.original_path.clone())
        .unwrap_or_else(|| req.uri().path().to_string());
    if let Some(name) = &brand_name {
        span.record("brand", name.as_str());
    }
    if let Some(resource) = extract_resource(req.uri().path()) {
        span.record("api.resource", resource.as_str());
    }
    let method = req.method().clone();

    let mut response = next.run(req).await;

    let status = response.status().as_u16();
    span.record("http.response.status_code", status);
    tracing::info!(
        method = %method,
        path = %path,
        status,
        brand = brand_name.as_deref().unwrap_or("-"),
        duration_ms = started.elapsed().as_millis(),
        "Request completed"
    );

    let trace_id = span.context().span().span_context().trace_id().to_string();
    let headers = response.headers_mut();
    set_header(headers, "x-request-id", &request_id);
    set_header(headers, "x-trace-id", &trace_id);
    if let Some(id) = correlation_id {
        set_header(headers, "x-correlation-id", &id);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/api/v1/", get(|| async { "ok" }))
            .layer(from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn assigns_request_id_and_echoes_callers_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/")
                    .header("x-request-id", "client-7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        let assigned = headers.get("x-request-id").unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(assigned).is_ok());
        assert_eq!(headers.get("x-correlation-id").unwrap(), "client-7");
        assert!(headers.contains_key("x-trace-id"));
    }

    #[tokio::test]
    async fn no_correlation_header_without_callers_id() {
        let response = app()
            .oneshot(Request::builder().uri("/api/v1/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
        assert!(!response.headers().contains_key("x-correlation-id"));
    }
}
