//! SQL parsing using datafusion-sqlparser-rs
//!
//! Used to lint library entries and quality checks before a run. Parsing is
//! advisory: the warehouse remains the authority on what it accepts.

use crate::library::SqlLibrary;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, RedshiftSqlDialect};
use sqlparser::parser::{Parser, ParserError};
use starload_core::WarehouseFlavor;

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect>,
}

impl SqlParser {
    /// Create a new SQL parser with the default (generic) dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(GenericDialect {}),
        }
    }

    /// Create a SQL parser for Redshift
    pub fn redshift() -> Self {
        Self {
            dialect: Box::new(RedshiftSqlDialect {}),
        }
    }

    /// Create a SQL parser for PostgreSQL
    pub fn postgres() -> Self {
        Self {
            dialect: Box::new(PostgreSqlDialect {}),
        }
    }

    /// Create a parser for a warehouse flavour
    pub fn for_flavor(flavor: WarehouseFlavor) -> Self {
        match flavor {
            WarehouseFlavor::Redshift => Self::redshift(),
            WarehouseFlavor::Postgres => Self::postgres(),
        }
    }

    /// Parse SQL string into AST
    pub fn parse(&self, sql: &str) -> Result<ParsedSql, ParseError> {
        match Parser::parse_sql(&*self.dialect, sql) {
            Ok(statements) => Ok(ParsedSql {
                sql: sql.to_string(),
                statements,
            }),
            Err(error) => Err(ParseError {
                sql: sql.to_string(),
                error,
            }),
        }
    }

    /// Lint every entry of a library
    ///
    /// Entries named `create_*` must parse as a single statement; every other
    /// entry must parse as a single query.
    pub fn lint_library(&self, library: &SqlLibrary) -> Vec<LintFinding> {
        library
            .iter()
            .filter_map(|(name, sql)| {
                let expect_query = !name.starts_with("create_");
                self.lint(name, sql, expect_query)
            })
            .collect()
    }

    /// Lint one statement; returns `None` when it is clean
    pub fn lint(&self, name: &str, sql: &str, expect_query: bool) -> Option<LintFinding> {
        let parsed = match self.parse(sql) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Some(LintFinding {
                    name: name.to_string(),
                    message: e.to_string(),
                })
            }
        };

        if parsed.statement_count() != 1 {
            return Some(LintFinding {
                name: name.to_string(),
                message: format!("expected 1 statement, found {}", parsed.statement_count()),
            });
        }

        if expect_query && !parsed.is_select() {
            return Some(LintFinding {
                name: name.to_string(),
                message: "expected a SELECT query".to_string(),
            });
        }

        None
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Successfully parsed SQL with AST
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Original SQL string
    pub sql: String,

    /// Parsed statements
    pub statements: Vec<Statement>,
}

impl ParsedSql {
    /// Get the first statement
    pub fn first_statement(&self) -> Option<&Statement> {
        self.statements.first()
    }

    /// Check if this is a SELECT statement
    pub fn is_select(&self) -> bool {
        matches!(self.first_statement(), Some(Statement::Query(_)))
    }

    /// Count the number of statements
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }
}

/// SQL parsing error
#[derive(Debug)]
pub struct ParseError {
    /// Original SQL string
    pub sql: String,

    /// Parser error from sqlparser
    pub error: ParserError,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SQL parse error: {}", self.error)
    }
}

impl std::error::Error for ParseError {}

/// A library entry or check that failed lint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintFinding {
    pub name: String,
    pub message: String,
}
