//! Operational endpoint tests
//!
//! Tests cover:
//! - Health check status and body, including an unavailable store
//! - Read-only deployments refusing writes
//! - robots.txt and sitemap.xml per Brand
//! - Security headers and the metrics endpoint

mod support;

use axum::http::{Method, StatusCode};
use serde_json::json;
use support::{
    assert_error_body, assert_status, header, json_body, new_phenotype, to_json_body,
    with_test_app, with_test_app_with_config, OWNER,
};

#[tokio::test]
async fn healthcheck_reports_store_state() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) = app.request(Method::GET, "/healthcheck/", None).await?;
            assert_status(status, StatusCode::OK, "healthy");
            assert_eq!(
                json_body(&body)?,
                json!({ "mode": "standard", "postgres_healthy": true })
            );

            app.store.set_available(false);
            let (status, _headers, body) = app.request(Method::GET, "/healthcheck/", None).await?;
            assert_status(status, StatusCode::SERVICE_UNAVAILABLE, "store offline");
            assert_eq!(json_body(&body)?["postgres_healthy"], false);
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn read_only_mode_refuses_writes() -> anyhow::Result<()> {
    with_test_app_with_config(
        |config| config.server.read_only = true,
        |app| {
            Box::pin(async move {
                let (status, headers, body) = app
                    .request_as(
                        OWNER,
                        Method::POST,
                        "/HDRUK/api/v1/phenotypes/create/",
                        Some(to_json_body(&new_phenotype("Gout"))?),
                    )
                    .await?;
                assert_status(status, StatusCode::FORBIDDEN, "write in read-only mode");
                assert_eq!(header(&headers, "x-read-only"), Some("true"));
                assert_error_body(&body)?;

                let (status, headers, body) =
                    app.request(Method::GET, "/healthcheck/", None).await?;
                assert_status(status, StatusCode::OK, "reads still work");
                assert_eq!(header(&headers, "x-read-only"), Some("true"));
                assert_eq!(json_body(&body)?["mode"], "readonly");
                Ok(())
            })
        },
    )
    .await
}

#[tokio::test]
async fn robots_and_sitemap_are_brand_aware() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) =
                app.request(Method::GET, "/HDRUK/robots.txt", None).await?;
            assert_status(status, StatusCode::OK, "robots");
            assert!(std::str::from_utf8(&body)?
                .contains("Sitemap: http://example.org/HDRUK/sitemap.xml"));

            let (status, headers, body) =
                app.request(Method::GET, "/HDRUK/sitemap.xml", None).await?;
            assert_status(status, StatusCode::OK, "sitemap");
            assert!(header(&headers, "content-type").is_some_and(|v| v.contains("xml")));
            let xml = std::str::from_utf8(&body)?;
            assert!(xml.contains("<loc>http://example.org/HDRUK/phenotypes/PH1/detail/</loc>"));
            assert!(xml.contains("<loc>http://example.org/HDRUK/phenotypes/PH3/detail/</loc>"));
            assert!(!xml.contains("PH41"), "unpublished phenotype listed: {xml}");

            let (_status, _headers, body) =
                app.request(Method::GET, "/ADP/sitemap.xml", None).await?;
            let xml = std::str::from_utf8(&body)?;
            assert!(!xml.contains("/phenotypes/"), "ADP has nothing published: {xml}");
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn responses_carry_security_headers() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (_status, headers, _body) = app.request(Method::GET, "/api/v1/", None).await?;
            assert_eq!(header(&headers, "x-content-type-options"), Some("nosniff"));
            assert_eq!(header(&headers, "x-frame-options"), Some("DENY"));
            assert!(header(&headers, "x-request-id").is_some());
            assert!(header(&headers, "strict-transport-security").is_none());

            let (_status, headers, _body) = app
                .request_with_extra_headers(
                    Method::GET,
                    "/api/v1/",
                    None,
                    &[("x-forwarded-proto", "https")],
                )
                .await?;
            assert!(header(&headers, "strict-transport-security").is_some());
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn metrics_are_exposed() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            app.request(Method::GET, "/HDRUK/api/v1/phenotypes/", None).await?;
            let (status, _headers, body) = app.request(Method::GET, "/metrics", None).await?;
            assert_status(status, StatusCode::OK, "metrics");
            let text = std::str::from_utf8(&body)?;
            assert!(text.contains("phenolib_brand_requests_total"));
            assert!(text.contains("phenolib_http_requests_total"));
            Ok(())
        })
    })
    .await
}
