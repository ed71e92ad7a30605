//! Ontology tests
//!
//! Tests cover:
//! - Node neighbours and ancestors
//! - Descendant checks over the seeded edges 1->2, 2->3, 2->4
//! - Edge administration: superuser only, duplicates and cycles

mod support;

use axum::http::{Method, StatusCode};
use serde_json::json;
use support::{
    assert_error_body, assert_status, json_body, to_json_body, with_test_app, OWNER, SUPERUSER,
};

#[tokio::test]
async fn node_lists_parents_and_children() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) = app
                .request(Method::GET, "/api/v1/ontology/node/2/", None)
                .await?;
            assert_status(status, StatusCode::OK, "node");
            let node = json_body(&body)?;
            assert_eq!(node["name"], "Asthma");
            assert_eq!(node["parents"], json!([{ "id": 1, "name": "Respiratory" }]));
            let mut children: Vec<i64> = node["children"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|c| c["id"].as_i64())
                .collect();
            children.sort_unstable();
            assert_eq!(children, vec![3, 4]);

            let (status, _headers, body) = app
                .request(Method::GET, "/api/v1/ontology/node/3/ancestors/", None)
                .await?;
            assert_status(status, StatusCode::OK, "ancestors");
            assert_eq!(
                json_body(&body)?,
                json!([{ "id": 2, "name": "Asthma" }, { "id": 1, "name": "Respiratory" }])
            );

            let (status, _headers, _body) = app
                .request(Method::GET, "/api/v1/ontology/node/99/", None)
                .await?;
            assert_status(status, StatusCode::NOT_FOUND, "unknown node");
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn descendant_checks_follow_edge_direction() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let cases = [
                ("/api/v1/ontology/node/3/descends-from/?parents=1", true),
                ("/api/v1/ontology/node/1/descends-from/?parents=3", false),
                ("/api/v1/ontology/node/3/descends-from/?parents=4", false),
                ("/api/v1/ontology/node/4/descends-from/?parents=3,2", true),
                ("/api/v1/ontology/node/1/descends-from/?parents=1", false),
            ];
            for (path, expected) in cases {
                let (status, _headers, body) = app.request(Method::GET, path, None).await?;
                assert_status(status, StatusCode::OK, path);
                assert_eq!(json_body(&body)?["is_descendant"], expected, "{path}");
            }
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn edges_are_superuser_only_and_acyclic() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let edge = |parent: i64, child: i64| {
                to_json_body(&json!({ "parent_id": parent, "child_id": child }))
            };

            let (status, _headers, _body) = app
                .request_as(OWNER, Method::POST, "/api/v1/ontology/edge/", Some(edge(1, 4)?))
                .await?;
            assert_status(status, StatusCode::FORBIDDEN, "plain user");

            let (status, _headers, body) = app
                .request_as(SUPERUSER, Method::POST, "/api/v1/ontology/edge/", Some(edge(1, 4)?))
                .await?;
            assert_status(status, StatusCode::CREATED, "new edge");
            let added = json_body(&body)?;
            assert_eq!(added["inserted"], true);
            assert_eq!(added["child"]["name"], "Childhood asthma");

            let (status, _headers, body) = app
                .request_as(SUPERUSER, Method::POST, "/api/v1/ontology/edge/", Some(edge(2, 3)?))
                .await?;
            assert_status(status, StatusCode::OK, "existing edge");
            assert_eq!(json_body(&body)?["inserted"], false);

            let (status, _headers, body) = app
                .request_as(SUPERUSER, Method::POST, "/api/v1/ontology/edge/", Some(edge(3, 1)?))
                .await?;
            assert_status(status, StatusCode::BAD_REQUEST, "cycle");
            assert_error_body(&body)?;

            let (_status, _headers, body) = app
                .request(Method::GET, "/api/v1/ontology/node/1/descends-from/?parents=3", None)
                .await?;
            assert_eq!(json_body(&body)?["is_descendant"], false);
            Ok(())
        })
    })
    .await
}
