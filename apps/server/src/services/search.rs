//! Phenotype search service
//!
//! Turns query-string parameters into a [`SearchRequest`]:
//! - facet filters, with the ontology facet expanded to its descendants
//! - page and page-size resolution against the configured sizes
//! - ordering, defaulting to relevance when text is given
//! - a statement timeout proportional to the page size

use std::sync::Arc;
use std::time::{Duration, Instant};

use phenolib_core::access::Subject;
use phenolib_core::search::{statement_timeout, Ordering, PageSizes, SearchFilters, SearchWeights};

use crate::db::Store;
use crate::metrics::{SEARCH_DURATION_SECONDS, SEARCH_RESULTS, SEARCH_TOTAL};
use crate::models::{SearchPage, SearchRequest};
use crate::Result;

pub struct SearchService {
    store: Arc<dyn Store>,
    page_sizes: PageSizes,
    weights: SearchWeights,
    timeout_base: Duration,
    timeout_per_row: Duration,
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .rev()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

impl SearchService {
    pub fn new(
        store: Arc<dyn Store>,
        page_sizes: PageSizes,
        weights: SearchWeights,
        timeout_base: Duration,
        timeout_per_row: Duration,
    ) -> Self {
        Self {
            store,
            page_sizes,
            weights,
            timeout_base,
            timeout_per_row,
        }
    }

    pub fn page_sizes(&self) -> &PageSizes {
        &self.page_sizes
    }

    pub fn weights(&self) -> &SearchWeights {
        &self.weights
    }

    /// Build the request for `params`, expanding the ontology facet.
    pub async fn build_request(
        &self,
        params: &[(String, String)],
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<SearchRequest> {
        let text = param(params, "search")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);
        let filters =
            SearchFilters::from_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let ontology_scope = if filters.ontology.is_empty() {
            Default::default()
        } else {
            self.store.ontology_expand(&filters.ontology).await?
        };
        let page_size = self
            .page_sizes
            .resolve(param(params, "page_size").and_then(|v| v.trim().parse().ok()));
        let page = param(params, "page").and_then(|v| v.trim().parse().ok());
        let ordering = Ordering::parse(param(params, "ordering"), text.is_some());

        Ok(SearchRequest {
            text,
            filters,
            ontology_scope,
            brand_id,
            subject: subject.clone(),
            ordering,
            page,
            page_size,
            weights: self.weights,
            timeout: statement_timeout(self.timeout_base, self.timeout_per_row, page_size),
        })
    }

    pub async fn search(
        &self,
        params: &[(String, String)],
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<SearchPage> {
        let start = Instant::now();
        let request = self.build_request(params, subject, brand_id).await?;
        let result = self.store.search_phenotypes(&request).await;

        SEARCH_DURATION_SECONDS
            .with_label_values(&["phenotype"])
            .observe(start.elapsed().as_secs_f64());
        match &result {
            Ok(page) => {
                SEARCH_TOTAL.with_label_values(&["phenotype", "success"]).inc();
                SEARCH_RESULTS
                    .with_label_values(&["phenotype"])
                    .observe(page.window.total as f64);
                tracing::debug!(
                    total = page.window.total,
                    page = page.window.page,
                    ordering = %request.ordering.as_param(),
                    "Phenotype search completed"
                );
            }
            Err(e) => {
                SEARCH_TOTAL.with_label_values(&["phenotype", "error"]).inc();
                tracing::warn!(error = %e, "Phenotype search failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, OntologyStore};
    use phenolib_core::ontology::OntologyNode;
    use phenolib_core::search::SortField;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn service(store: Arc<MemoryStore>) -> SearchService {
        SearchService::new(
            store,
            PageSizes::default(),
            SearchWeights::default(),
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn request_defaults() {
        let svc = service(Arc::new(MemoryStore::new()));
        let request = svc
            .build_request(&[], &Subject::anonymous(), None)
            .await
            .unwrap();
        assert_eq!(request.text, None);
        assert_eq!(request.page_size, 20);
        assert_eq!(request.ordering.field, SortField::Updated);
        assert_eq!(request.timeout, Duration::from_millis(5200));
    }

    #[tokio::test]
    async fn disallowed_page_size_falls_back_to_default() {
        let svc = service(Arc::new(MemoryStore::new()));
        let request = svc
            .build_request(
                &pairs(&[("page_size", "37"), ("search", "asthma"), ("page", "3")]),
                &Subject::anonymous(),
                Some(1),
            )
            .await
            .unwrap();
        assert_eq!(request.page_size, 20);
        assert_eq!(request.page, Some(3));
        assert_eq!(request.ordering.field, SortField::Relevance);
        assert_eq!(request.brand_id, Some(1));
    }

    #[tokio::test]
    async fn ontology_facet_is_expanded() {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=3 {
            store
                .add_ontology_node(OntologyNode {
                    id,
                    type_id: 0,
                    name: format!("node {id}"),
                    properties: json!({}),
                })
                .await
                .unwrap();
        }
        store.add_ontology_edge(1, 2).await.unwrap();
        store.add_ontology_edge(2, 3).await.unwrap();

        let svc = service(store);
        let request = svc
            .build_request(&pairs(&[("ontology", "2")]), &Subject::anonymous(), None)
            .await
            .unwrap();
        assert_eq!(request.ontology_scope.into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }
}
