//! Concept resolution and export tests
//!
//! Tests cover:
//! - Cyclic child-concept references resolving to a finite code list
//! - Concept visibility through published phenotypes
//! - Phenotype export of `concept_information` and its `codes` alias

mod support;

use std::collections::BTreeSet;

use axum::http::{Method, StatusCode};
use serde_json::Value;
use support::{assert_status, json_body, with_test_app, OWNER};

fn codes(rows: &Value) -> BTreeSet<String> {
    rows.as_array()
        .into_iter()
        .flatten()
        .filter_map(|row| row["code"].as_str().map(str::to_string))
        .collect()
}

fn expected() -> BTreeSet<String> {
    ["E11", "E11.65", "E11.9"].into_iter().map(String::from).collect()
}

#[tokio::test]
async fn cyclic_concepts_resolve_once_each() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) = app
                .request(Method::GET, "/api/v1/concepts/C1/export/codes/", None)
                .await?;
            assert_status(status, StatusCode::OK, "export C1");
            let rows = json_body(&body)?;
            assert_eq!(codes(&rows), expected());
            assert_eq!(rows.as_array().map(Vec::len), Some(3));
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn numeric_and_prefixed_ids_are_equivalent() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) = app
                .request(Method::GET, "/api/v1/concepts/1/detail/", None)
                .await?;
            assert_status(status, StatusCode::OK, "numeric id");
            let detail = json_body(&body)?;
            assert_eq!(detail["concept_id"], "C1");
            assert_eq!(detail["components"].as_array().map(Vec::len), Some(2));

            let (status, _headers, _body) = app
                .request(Method::GET, "/api/v1/concepts/C1x/detail/", None)
                .await?;
            assert_status(status, StatusCode::NOT_FOUND, "malformed id");
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn unpublished_concepts_need_access() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, _body) = app
                .request(Method::GET, "/api/v1/concepts/C2/detail/", None)
                .await?;
            assert_status(status, StatusCode::NOT_FOUND, "anonymous");

            let (status, _headers, body) = app
                .request_as(OWNER, Method::GET, "/api/v1/concepts/C2/detail/", None)
                .await?;
            assert_status(status, StatusCode::OK, "owner");
            assert_eq!(json_body(&body)?["name"], "Diabetes without complications");
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn phenotype_export_follows_concept_information() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) = app
                .request(Method::GET, "/HDRUK/api/v1/phenotypes/PH1/export/codes/", None)
                .await?;
            assert_status(status, StatusCode::OK, "codes alias");
            let rows = json_body(&body)?;
            assert_eq!(codes(&rows), expected());
            assert!(rows
                .as_array()
                .into_iter()
                .flatten()
                .all(|row| row["concept_id"] == "C1" && row["concept_version_id"] == 1));

            let (status, _headers, body) = app
                .request(
                    Method::GET,
                    "/HDRUK/api/v1/phenotypes/PH1/version/1/export/concept_information/",
                    None,
                )
                .await?;
            assert_status(status, StatusCode::OK, "explicit version and field");
            assert_eq!(codes(&json_body(&body)?), expected());

            let (status, _headers, _body) = app
                .request(Method::GET, "/HDRUK/api/v1/phenotypes/PH1/export/definition/", None)
                .await?;
            assert_status(status, StatusCode::NOT_FOUND, "non-array field");
            Ok(())
        })
    })
    .await
}
