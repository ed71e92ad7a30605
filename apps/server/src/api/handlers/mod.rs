//! Request handlers for API endpoints
//!
//! Handlers extract the caller, the active Brand and the request input,
//! call one service and serialise the result. Errors convert to responses
//! through [`crate::Error`].

pub mod catalogue;
pub mod concepts;
pub mod ontology;
pub mod phenotypes;
pub mod publication;
pub mod site;
