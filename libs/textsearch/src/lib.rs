#![forbid(unsafe_code)]
//! Lexical search primitives for phenotype and ontology search.
//!
//! The PostgreSQL backend computes search vectors and ranks in SQL
//! (`to_tsvector('english', ..)`, `ts_rank_cd`, `similarity`). This crate
//! reproduces those functions in-process for the in-memory backend and the
//! unit tests. Lexemes come from the same Snowball English stemmer the
//! `english` configuration uses, so a row matches a query in memory when it
//! matches in the database:
//!
//! - [`lexer`]: tokenisation, English stop words and Snowball stemming
//! - [`TsVector`]: weighted lexeme/position vectors with `||` concatenation
//! - [`TsQuery`]: boolean query parsing (`AND`, `OR`, `NOT`, quoted phrases)
//! - [`rank_cd`]: cover-density ranking
//! - [`trigram`]: `pg_trgm` similarity

pub mod lexer;
mod query;
mod rank;
pub mod trigram;
mod vector;

pub use query::{QueryExpr, TsQuery};
pub use rank::{rank_cd, DEFAULT_WEIGHTS};
pub use trigram::similarity;
pub use vector::{Position, TsVector, Weight};
