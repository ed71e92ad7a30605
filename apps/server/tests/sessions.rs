//! Session tests
//!
//! Tests cover:
//! - Signed-in users seeing their own drafts
//! - Expired sessions: cookie cleared, page loads redirected to login,
//!   API calls continuing anonymously

mod support;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use phenolib_server::db::SessionStore;
use phenolib_server::models::SessionRecord;
use phenolib_server::services::sessions::hash_key;
use support::{assert_status, clears_cookie, header, json_body, with_test_app, TestApp, OWNER};

const STALE_KEY: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f0";

async fn stale_session(app: &TestApp) -> anyhow::Result<String> {
    let started = Utc::now() - Duration::days(2);
    app.store
        .create_session(SessionRecord {
            key_hash: hash_key(STALE_KEY),
            user_id: OWNER,
            created: started,
            last_request: started,
        })
        .await?;
    Ok(format!("{}={STALE_KEY}", app.state.sessions.cookie_name()))
}

#[tokio::test]
async fn signed_in_owner_sees_drafts() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let path = "/ADP/api/v1/phenotypes/PH41/detail/";
            let (status, _headers, _body) = app.request(Method::GET, path, None).await?;
            assert_status(status, StatusCode::NOT_FOUND, "anonymous");

            let (status, _headers, body) = app.request_as(OWNER, Method::GET, path, None).await?;
            assert_status(status, StatusCode::OK, "owner");
            let detail = json_body(&body)?;
            assert_eq!(detail["id"], "PH41");
            assert!(detail["publish_status"].is_null());
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn expired_session_redirects_page_loads_to_login() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let cookie = stale_session(app).await?;
            let (status, headers, _body) = app
                .request_with_extra_headers(
                    Method::GET,
                    "/HDRUK/phenotypes/PH1/detail/",
                    None,
                    &[("cookie", cookie.as_str()), ("accept", "text/html,*/*;q=0.8")],
                )
                .await?;

            assert_status(status, StatusCode::FOUND, "expired page load");
            assert_eq!(
                header(&headers, "location"),
                Some("/HDRUK/account/login/?next=%2FHDRUK%2Fphenotypes%2FPH1%2Fdetail%2F")
            );
            assert!(clears_cookie(&headers, app.state.sessions.cookie_name()));
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn expired_session_continues_api_calls_anonymously() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let cookie = stale_session(app).await?;
            let (status, headers, _body) = app
                .request_with_extra_headers(
                    Method::GET,
                    "/ADP/api/v1/phenotypes/PH41/detail/",
                    None,
                    &[("cookie", cookie.as_str())],
                )
                .await?;

            assert_status(status, StatusCode::NOT_FOUND, "anonymous after expiry");
            assert!(clears_cookie(&headers, app.state.sessions.cookie_name()));

            // The expired session is gone; the same cookie is now just unknown.
            let (status, headers, _body) = app
                .request_with_extra_headers(
                    Method::GET,
                    "/HDRUK/api/v1/phenotypes/PH1/detail/",
                    None,
                    &[("cookie", cookie.as_str())],
                )
                .await?;
            assert_status(status, StatusCode::OK, "published phenotype");
            assert!(!clears_cookie(&headers, app.state.sessions.cookie_name()));
            Ok(())
        })
    })
    .await
}
