//! Brand resolution for inbound requests.
//!
//! A request belongs to a Brand when its host matches one of the external
//! Brand host patterns, or when the first path segment names a Brand. Host
//! matches never rewrite the path.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Host prefixes served as the HDRUK Brand without a path prefix.
pub const DEFAULT_EXTERNAL_HOSTS: &[&str] = &["phenotypes.healthdatagateway", "web-phenotypes-hdr"];

/// Brand assigned to external hosts.
pub const EXTERNAL_BRAND: &str = "HDRUK";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandResolution {
    /// Uppercased Brand name, if any.
    pub brand: Option<String>,
    /// Path with the Brand segment removed; always starts with `/`.
    pub relative_path: String,
    /// Path the router dispatches on: the canonical `/{BRAND}` prefix
    /// followed by `relative_path`, or the unchanged path otherwise.
    pub routed_path: String,
    pub is_external_host: bool,
    /// Set when the request must be redirected instead of dispatched.
    pub redirect: Option<String>,
}

impl BrandResolution {
    /// URL prefix under which this Brand's routes live (`""` or `/NAME`).
    pub fn prefix(&self) -> String {
        match (&self.brand, self.is_external_host) {
            (Some(name), false) => format!("/{name}"),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrandResolver {
    names: BTreeSet<String>,
    external_hosts: Vec<String>,
    external_brand: String,
}

impl BrandResolver {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_ascii_uppercase())
                .filter(|n| !n.is_empty())
                .collect(),
            external_hosts: DEFAULT_EXTERNAL_HOSTS.iter().map(|s| s.to_string()).collect(),
            external_brand: EXTERNAL_BRAND.to_string(),
        }
    }

    pub fn with_external_hosts<I, S>(mut self, hosts: I, brand: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.external_hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self.external_brand = brand.trim().to_ascii_uppercase();
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn is_brand(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_uppercase())
    }

    /// True when `host` (with or without a port) matches an external host.
    pub fn is_external_host(&self, host: &str) -> bool {
        let host = host.trim().to_ascii_lowercase();
        let host = host.split(':').next().unwrap_or_default();
        !host.is_empty() && self.external_hosts.iter().any(|p| host.starts_with(p.as_str()))
    }

    pub fn resolve(&self, host: Option<&str>, path: &str) -> BrandResolution {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        if host.is_some_and(|h| self.is_external_host(h)) {
            let redirect = api_root_redirect(&path, "");
            return BrandResolution {
                brand: Some(self.external_brand.clone()),
                relative_path: path.clone(),
                routed_path: path,
                is_external_host: true,
                redirect,
            };
        }

        let trimmed = &path[1..];
        let (segment, rest) = match trimmed.find('/') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
            None => (trimmed, "/"),
        };
        let upper = segment.to_ascii_uppercase();
        if !segment.is_empty() && self.names.contains(&upper) {
            let prefix = format!("/{upper}");
            return BrandResolution {
                redirect: api_root_redirect(rest, &prefix),
                routed_path: format!("{prefix}{rest}"),
                relative_path: rest.to_string(),
                brand: Some(upper),
                is_external_host: false,
            };
        }

        BrandResolution {
            brand: None,
            redirect: api_root_redirect(&path, ""),
            relative_path: path.clone(),
            routed_path: path,
            is_external_host: false,
        }
    }
}

/// `/api` and `/api/` redirect to the current API version.
fn api_root_redirect(relative: &str, prefix: &str) -> Option<String> {
    let lowered = relative.to_ascii_lowercase();
    matches!(lowered.as_str(), "/api" | "/api/").then(|| format!("{prefix}/api/v1/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> BrandResolver {
        BrandResolver::new(["ADP", "HDRUK", "SAIL"])
    }

    #[test]
    fn external_host_sets_brand_without_rewrite() {
        let r = resolver().resolve(
            Some("phenotypes.healthdatagateway.org"),
            "/phenotypes/PH1/detail/",
        );
        assert_eq!(r.brand.as_deref(), Some("HDRUK"));
        assert!(r.is_external_host);
        assert_eq!(r.routed_path, "/phenotypes/PH1/detail/");
        assert_eq!(r.prefix(), "");

        let r = resolver().resolve(Some("web-phenotypes-hdr-dev.example:8443"), "/");
        assert_eq!(r.brand.as_deref(), Some("HDRUK"));
    }

    #[test]
    fn path_segment_selects_brand_case_insensitively() {
        let r = resolver().resolve(Some("localhost"), "/sail/api/v1/phenotypes/");
        assert_eq!(r.brand.as_deref(), Some("SAIL"));
        assert_eq!(r.relative_path, "/api/v1/phenotypes/");
        assert_eq!(r.routed_path, "/SAIL/api/v1/phenotypes/");
        assert_eq!(r.prefix(), "/SAIL");

        let bare = resolver().resolve(None, "/ADP");
        assert_eq!(bare.relative_path, "/");
        assert_eq!(bare.routed_path, "/ADP/");
    }

    #[test]
    fn unknown_segment_means_no_brand() {
        let r = resolver().resolve(Some("localhost"), "/phenotypes/");
        assert_eq!(r.brand, None);
        assert_eq!(r.routed_path, "/phenotypes/");
    }

    #[test]
    fn api_root_redirects_to_v1() {
        let r = resolver().resolve(None, "/HDRUK/api/");
        assert_eq!(r.redirect.as_deref(), Some("/HDRUK/api/v1/"));
        let r = resolver().resolve(None, "/api");
        assert_eq!(r.redirect.as_deref(), Some("/api/v1/"));
        assert!(resolver().resolve(None, "/api/v1/").redirect.is_none());
    }

    #[test]
    fn malformed_hosts_fall_through() {
        for host in ["", ":::", "\u{0}", "phenotypes"] {
            let r = resolver().resolve(Some(host), "/x/");
            assert_eq!(r.brand, None);
        }
    }
}
