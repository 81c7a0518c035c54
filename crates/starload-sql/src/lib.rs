//! SQL statement library and lint
//!
//! This crate handles:
//! - The static library of transformation and DDL statements
//! - Config-driven overrides of library entries
//! - Parsing statements with sqlparser to catch malformed SQL before a run

pub mod library;
pub mod parser;

pub use library::{names, SqlLibrary, SqlLibraryError};
pub use parser::{LintFinding, ParseError, ParsedSql, SqlParser};
