//! Stage contract

use starload_core::{RetryPolicy, RunContext, TemplateError, Value};
use starload_warehouse::{CredentialError, CredentialProvider, WarehouseClient, WarehouseError};

/// Stage kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Sentinel,
    ExtractLoad,
    FactLoad,
    DimensionLoad,
    QualityGate,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sentinel => "sentinel",
            Self::ExtractLoad => "extract_load",
            Self::FactLoad => "fact_load",
            Self::DimensionLoad => "dimension_load",
            Self::QualityGate => "quality_gate",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single stage invocation
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Could not resolve credentials '{credential_ref}': {source}")]
    CredentialResolutionFailed {
        credential_ref: String,
        source: CredentialError,
    },

    /// `statement` is the failing statement, redacted where it carries secrets
    #[error("Execution failed: {cause}")]
    ExecutionFailed {
        statement: String,
        #[source]
        cause: WarehouseError,
    },

    #[error("Quality check returned no rows: {sql}")]
    NoResultRow { sql: String },

    #[error("Quality check failed: expected {expected}, got {actual} for `{sql}`")]
    QualityCheckFailed {
        sql: String,
        expected: Value,
        actual: Value,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl StageError {
    /// Only warehouse execution failures may be transient
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::ExecutionFailed { .. })
    }

    pub(crate) fn execution(statement: impl Into<String>, cause: WarehouseError) -> Self {
        StageError::ExecutionFailed {
            statement: statement.into(),
            cause,
        }
    }
}

/// Invalid stage parameters, reported when the stage is built
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageConfigError {
    #[error("Task id must not be empty")]
    EmptyTaskId,

    #[error("{task_id}: '{table}' is not a valid table name")]
    InvalidTable { task_id: String, table: String },

    #[error("{task_id}: {field} must not be empty")]
    EmptyField { task_id: String, field: &'static str },

    #[error("{task_id}: a quality gate needs at least one check")]
    NoChecks { task_id: String },

    #[error("{task_id}: quality check #{index} has empty SQL")]
    EmptyCheckSql { task_id: String, index: usize },

    #[error("{task_id}: {source}")]
    Template {
        task_id: String,
        source: TemplateError,
    },
}

pub(crate) fn check_task_id(task_id: &str) -> Result<(), StageConfigError> {
    if task_id.trim().is_empty() {
        return Err(StageConfigError::EmptyTaskId);
    }
    Ok(())
}

pub(crate) fn check_non_empty(
    task_id: &str,
    field: &'static str,
    value: &str,
) -> Result<(), StageConfigError> {
    if value.trim().is_empty() {
        return Err(StageConfigError::EmptyField {
            task_id: task_id.to_string(),
            field,
        });
    }
    Ok(())
}

/// Table names are interpolated into SQL, so only plain (optionally
/// schema-qualified, optionally double-quoted) identifiers are accepted
pub(crate) fn check_table(task_id: &str, table: &str) -> Result<(), StageConfigError> {
    let valid_part = |part: &str| {
        if let Some(inner) = part.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
            return !inner.is_empty() && !inner.contains('"');
        }
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };

    if table.split('.').count() <= 2 && table.split('.').all(valid_part) {
        Ok(())
    } else {
        Err(StageConfigError::InvalidTable {
            task_id: task_id.to_string(),
            table: table.to_string(),
        })
    }
}

/// A unit of pipeline work
///
/// Stages are immutable once built and safe to execute concurrently.
/// `execute` performs the stage's effect once; it does not retry.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Identifier, unique within a pipeline
    fn task_id(&self) -> &str;

    fn kind(&self) -> StageKind;

    fn retry_policy(&self) -> RetryPolicy;

    /// One-line summary for plan output
    fn describe(&self) -> String;

    async fn execute(
        &self,
        context: &RunContext,
        warehouse: &dyn WarehouseClient,
        credentials: &dyn CredentialProvider,
    ) -> Result<(), StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_execution_failures_retry() {
        let execution = StageError::execution("INSERT INTO users SELECT 1", WarehouseError::QueryError("x".into()));
        assert!(execution.is_retryable());

        let quality = StageError::QualityCheckFailed {
            sql: "SELECT 1".to_string(),
            expected: Value::Int(0),
            actual: Value::Int(1),
        };
        assert!(!quality.is_retryable());
        assert!(!StageError::NoResultRow { sql: "SELECT 1".into() }.is_retryable());
        assert!(!StageError::CredentialResolutionFailed {
            credential_ref: "aws_credentials".into(),
            source: CredentialError::NotFound("aws_credentials".into()),
        }
        .is_retryable());
    }

    #[test]
    fn quality_failure_message() {
        let err = StageError::QualityCheckFailed {
            sql: "SELECT COUNT(*) FROM users WHERE userid IS NULL".to_string(),
            expected: Value::Int(0),
            actual: Value::Int(3),
        };
        assert_eq!(
            err.to_string(),
            "Quality check failed: expected 0, got 3 for `SELECT COUNT(*) FROM users WHERE userid IS NULL`"
        );
    }

    #[test]
    fn table_names() {
        for ok in ["users", "public.users", "public.\"time\"", "staging_events", "_tmp$1"] {
            assert!(check_table("t", ok).is_ok(), "{} should be accepted", ok);
        }
        for bad in ["", "users; DROP TABLE songs", "a.b.c", "1users", "\"\"", "user s"] {
            assert!(check_table("t", bad).is_err(), "{} should be rejected", bad);
        }
    }
}
