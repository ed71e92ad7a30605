//! Phenotype library server
//!
//! A multi-Brand clinical phenotype library with:
//! - Weighted lexical and trigram search over versioned phenotypes
//! - A permission and publication workflow with moderation
//! - Concept tree resolution and code export
//! - An ontology DAG with cycle-checked edges
//! - Brand dispatch by host or path prefix and a request audit trail

// Allow clippy lints that are acceptable for this domain-specific codebase
#![allow(
    clippy::too_many_arguments,      // Service calls carry caller, Brand and version context
    clippy::large_enum_variant,      // Boxing may impact performance
)]

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod request_context;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
