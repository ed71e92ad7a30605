#![forbid(unsafe_code)]
//! Domain engines shared by the phenotype library server and its storage
//! backends. Nothing in this crate performs I/O; backends load data, hand it
//! to these engines and persist the outcome.

pub mod access;
pub mod audit;
pub mod brand;
pub mod concept;
pub mod documents;
mod error;
pub mod ontology;
pub mod publication;
pub mod search;
pub mod session;

pub use error::{Error, Result};
