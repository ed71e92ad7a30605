//! Which requests reach the audit log, and who and where they came from.

use std::collections::HashMap;
use std::net::IpAddr;

use regex::{Regex, RegexBuilder};

use crate::{Error, Result};

/// Paths that are never audited unless a Brand overrides the list.
pub const DEFAULT_IGNORED_PATHS: &[&str] = &[
    r"/static/",
    r"/media/",
    r"/favicon\.ico",
    r"/healthcheck/?$",
    r"/metrics/?$",
    r"/robots\.txt$",
    r"/sitemap\.xml$",
    r"/api/v\d+/swagger",
];

#[derive(Debug, Clone, Default)]
pub struct AuditRules {
    ignored: Vec<Regex>,
    registered: Vec<Regex>,
    brand_ignored: HashMap<String, Vec<Regex>>,
}

/// Compile a pattern anchored at the start, case-insensitive, multi-line.
fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(&format!("^(?:{pattern})"))
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .map_err(|e| Error::Validation(format!("invalid audit pattern {pattern:?}: {e}")))
}

fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile(p.as_ref())).collect()
}

impl AuditRules {
    /// `ignored`: default ignore list. `registered`: allow-list; when non-empty
    /// only matching paths are audited. `brand_ignored`: per-Brand ignore
    /// lists that replace the default list for that Brand.
    pub fn new<S: AsRef<str>>(
        ignored: &[S],
        registered: &[S],
        brand_ignored: &HashMap<String, Vec<String>>,
    ) -> Result<Self> {
        let brand_ignored = brand_ignored
            .iter()
            .map(|(brand, patterns)| Ok((brand.to_ascii_uppercase(), compile_all(patterns)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self {
            ignored: compile_all(ignored)?,
            registered: compile_all(registered)?,
            brand_ignored,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            ignored: DEFAULT_IGNORED_PATHS
                .iter()
                .filter_map(|p| compile(p).ok())
                .collect(),
            ..Self::default()
        }
    }

    /// Decide whether a request to `path` under `brand` is audited.
    pub fn admits(&self, path: &str, brand: Option<&str>) -> bool {
        let path = normalize_path(path, brand);
        let matches = |set: &[Regex]| set.iter().any(|re| re.is_match(&path));

        let override_list = brand.and_then(|b| self.brand_ignored.get(&b.to_ascii_uppercase()));
        if let Some(ignored) = override_list {
            if matches(ignored) {
                return false;
            }
        }
        if !self.registered.is_empty() {
            return matches(&self.registered);
        }
        override_list.is_some() || !matches(&self.ignored)
    }
}

/// Strip a leading Brand segment and ensure a leading slash.
pub fn normalize_path(path: &str, brand: Option<&str>) -> String {
    let mut path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if let Some(brand) = brand {
        let segment_end = path[1..].find('/').map_or(path.len(), |i| i + 1);
        if path[1..segment_end].eq_ignore_ascii_case(brand) {
            path = path[segment_end..].to_string();
            if !path.starts_with('/') {
                path.insert(0, '/');
            }
        }
    }
    path
}

/// Where the remote address is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddrPolicy {
    /// Extra header consulted after `X-Forwarded-For`.
    pub header: Option<String>,
    pub validate: bool,
    pub default_ip: String,
}

impl Default for RemoteAddrPolicy {
    fn default() -> Self {
        Self {
            header: None,
            validate: true,
            default_ip: "0.0.0.0".into(),
        }
    }
}

impl RemoteAddrPolicy {
    /// Pick the first present of `X-Forwarded-For` (its first entry), the
    /// configured header, and the socket address.
    pub fn resolve(
        &self,
        forwarded_for: Option<&str>,
        configured_header: Option<&str>,
        remote_addr: Option<&str>,
    ) -> String {
        let candidate = forwarded_for
            .and_then(|v| v.split(',').next())
            .or(configured_header)
            .or(remote_addr)
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match candidate {
            Some(ip) if !self.validate || ip.parse::<IpAddr>().is_ok() => ip.to_string(),
            _ => self.default_ip.clone(),
        }
    }
}
