//! Phenotype search tests
//!
//! Tests cover:
//! - Relevance ranking of name matches over definition matches
//! - Ontology facets matching descendant nodes
//! - Explicit ordering and page clamping
//! - Query words matching stored text through their stem

mod support;

use axum::http::{Method, StatusCode};
use support::{
    assert_status, json_body, new_phenotype, page_ids, to_json_body, with_test_app, OWNER,
};

#[tokio::test]
async fn name_match_outranks_definition_match() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) = app
                .request(Method::GET, "/HDRUK/api/v1/phenotypes/?search=asthma", None)
                .await?;
            assert_status(status, StatusCode::OK, "search");
            let page = json_body(&body)?;
            assert_eq!(page_ids(&page)?, vec!["PH2", "PH3"]);

            let scores: Vec<f64> = page["data"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|row| row["score"].as_f64())
                .collect();
            assert_eq!(scores.len(), 2);
            assert!(scores[0] > scores[1], "scores: {scores:?}");
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn ontology_facet_includes_descendants() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            // PH2 is tagged with node 3, a grandchild of node 1.
            for node in [1, 2, 3] {
                let (status, _headers, body) = app
                    .request(
                        Method::GET,
                        &format!("/HDRUK/api/v1/phenotypes/?ontology={node}"),
                        None,
                    )
                    .await?;
                assert_status(status, StatusCode::OK, "ontology facet");
                assert_eq!(page_ids(&json_body(&body)?)?, vec!["PH2"], "node {node}");
            }

            let (_status, _headers, body) = app
                .request(Method::GET, "/HDRUK/api/v1/phenotypes/?ontology=4", None)
                .await?;
            assert!(page_ids(&json_body(&body)?)?.is_empty(), "sibling node");
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn ordering_and_paging() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) = app
                .request(Method::GET, "/HDRUK/api/v1/phenotypes/?ordering=name", None)
                .await?;
            assert_status(status, StatusCode::OK, "by name");
            let page = json_body(&body)?;
            assert_eq!(page_ids(&page)?, vec!["PH2", "PH3", "PH1"]);
            assert_eq!(page["total"], 3);
            assert_eq!(page["page_size"], 20);

            let (_status, _headers, body) = app
                .request(Method::GET, "/HDRUK/api/v1/phenotypes/?ordering=-id", None)
                .await?;
            assert_eq!(page_ids(&json_body(&body)?)?, vec!["PH3", "PH2", "PH1"]);

            let (_status, _headers, body) = app
                .request(Method::GET, "/HDRUK/api/v1/phenotypes/?page=9", None)
                .await?;
            let page = json_body(&body)?;
            assert_eq!(page["page"], 1);
            assert_eq!(page["last_page"], 1);
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn anonymous_search_skips_unpublished_phenotypes() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (_status, _headers, body) = app
                .request(Method::GET, "/ADP/api/v1/phenotypes/", None)
                .await?;
            assert!(page_ids(&json_body(&body)?)?.is_empty());
            Ok(())
        })
    })
    .await
}

#[tokio::test]
async fn query_matches_other_inflections_of_stored_words() -> anyhow::Result<()> {
    with_test_app(|app| {
        Box::pin(async move {
            let (status, _headers, body) = app
                .request_as(
                    OWNER,
                    Method::POST,
                    "/HDRUK/api/v1/phenotypes/create/",
                    Some(to_json_body(&new_phenotype("Lying and standing blood pressure"))?),
                )
                .await?;
            assert_status(status, StatusCode::CREATED, "create");
            let id = json_body(&body)?["id"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("created phenotype has no id"))?;

            // "lie" and "lying" share the lexeme `lie`; "pressures" stems to `pressur`.
            for query in ["lie", "pressures", "stands"] {
                let (status, _headers, body) = app
                    .request_as(
                        OWNER,
                        Method::GET,
                        &format!("/HDRUK/api/v1/phenotypes/?search={query}"),
                        None,
                    )
                    .await?;
                assert_status(status, StatusCode::OK, query);
                assert_eq!(page_ids(&json_body(&body)?)?, vec![id.as_str()], "{query}");
            }
            Ok(())
        })
    })
    .await
}
