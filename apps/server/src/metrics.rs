//! Prometheus metrics for the phenotype library server.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    // HTTP

    /// Total HTTP requests by method, path and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "phenolib_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "phenolib_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");

    pub static ref HTTP_REQUESTS_IN_FLIGHT: IntGaugeVec = register_int_gauge_vec!(
        "phenolib_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
        &["method", "path"]
    )
    .expect("Failed to register HTTP_REQUESTS_IN_FLIGHT");

    /// Requests per resolved Brand ("none" when unbranded)
    pub static ref BRAND_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "phenolib_brand_requests_total",
        "Requests by resolved Brand",
        &["brand", "via"]
    )
    .expect("Failed to register BRAND_REQUESTS_TOTAL");

    // Search

    pub static ref SEARCH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "phenolib_search_total",
        "Total number of searches",
        &["kind", "status"]
    )
    .expect("Failed to register SEARCH_TOTAL");

    pub static ref SEARCH_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "phenolib_search_duration_seconds",
        "Search duration in seconds",
        &["kind"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register SEARCH_DURATION_SECONDS");

    pub static ref SEARCH_RESULTS: HistogramVec = register_histogram_vec!(
        "phenolib_search_results",
        "Number of matching rows per search",
        &["kind"],
        vec![0.0, 1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    )
    .expect("Failed to register SEARCH_RESULTS");

    // Workflow

    pub static ref PUBLICATION_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "phenolib_publication_transitions_total",
        "Publication transitions by outcome",
        &["transition", "outcome"]
    )
    .expect("Failed to register PUBLICATION_TRANSITIONS_TOTAL");

    pub static ref CONCEPT_RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "phenolib_concept_resolutions_total",
        "Concept tree resolutions by cache result",
        &["cache"]
    )
    .expect("Failed to register CONCEPT_RESOLUTIONS_TOTAL");

    // Infrastructure

    /// Audit events by outcome (recorded, dropped, failed)
    pub static ref AUDIT_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "phenolib_audit_events_total",
        "Request audit events by outcome",
        &["outcome"]
    )
    .expect("Failed to register AUDIT_EVENTS_TOTAL");

    pub static ref DB_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "phenolib_db_retries_total",
        "Idempotent reads retried after a connection failure",
        &["operation"]
    )
    .expect("Failed to register DB_RETRIES_TOTAL");
}

/// Collapse identifiers so that label cardinality stays bounded:
/// `/HDRUK/api/v1/phenotypes/PH12/version/3/detail/` becomes
/// `/HDRUK/api/v1/phenotypes/{id}/version/{id}/detail`.
pub fn sanitize_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if is_identifier(segment) {
                "{id}".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn is_identifier(segment: &str) -> bool {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    let upper = segment.to_ascii_uppercase();
    ["PH", "C"].iter().any(|prefix| {
        upper
            .strip_prefix(prefix)
            .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    })
}

/// API resource addressed by `path`, e.g. `phenotypes` for
/// `/api/v1/phenotypes/PH1/detail/`.
pub fn extract_resource(path: &str) -> Option<String> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "api" {
            let _version = segments.next()?;
            return segments.next().map(str::to_string);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/"), "/");
        assert_eq!(sanitize_path("/healthcheck/"), "/healthcheck");
        assert_eq!(
            sanitize_path("/api/v1/phenotypes/PH12/version/3/detail/"),
            "/api/v1/phenotypes/{id}/version/{id}/detail"
        );
        assert_eq!(
            sanitize_path("/HDRUK/api/v1/concepts/C7/detail/"),
            "/HDRUK/api/v1/concepts/{id}/detail"
        );
        assert_eq!(sanitize_path("/api/v1/coding-systems/"), "/api/v1/coding-systems");
    }

    #[test]
    fn brand_names_are_not_identifiers() {
        assert!(!is_identifier("HDRUK"));
        assert!(!is_identifier("C"));
        assert!(is_identifier("ph3"));
    }

    #[test]
    fn test_extract_resource() {
        assert_eq!(
            extract_resource("/api/v1/phenotypes/PH1/detail/"),
            Some("phenotypes".to_string())
        );
        assert_eq!(
            extract_resource("/ADP/api/v1/ontology/node/3/"),
            Some("ontology".to_string())
        );
        assert_eq!(extract_resource("/api/v1/"), None);
        assert_eq!(extract_resource("/healthcheck/"), None);
    }
}
