//! Per-request context injected by middleware.

use phenolib_core::access::Subject;

use crate::models::{Brand, User};

/// Brand the request was dispatched under.
#[derive(Debug, Clone, Default)]
pub struct BrandContext {
    pub brand: Option<Brand>,
    /// Uppercased Brand name, set even if the Brand row is missing.
    pub name: Option<String>,
    /// `""` or `/NAME`; prepended to links the server generates.
    pub prefix: String,
    pub swagger_title: String,
    pub is_external_host: bool,
    /// Path as received, before the Brand segment was canonicalised.
    pub original_path: String,
}

impl BrandContext {
    pub fn brand_id(&self) -> Option<i32> {
        self.brand.as_ref().map(|b| b.id)
    }
}

/// Caller resolved from the session cookie.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub subject: Subject,
    pub user: Option<User>,
}

impl CurrentUser {
    pub fn anonymous() -> Self {
        Self {
            subject: Subject::anonymous(),
            user: None,
        }
    }

    pub fn signed_in(user: User) -> Self {
        Self {
            subject: user.subject(),
            user: Some(user),
        }
    }
}
