//! Warehouse client trait

use starload_core::Row;

/// Errors reported by a warehouse client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WarehouseError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl WarehouseError {
    /// Classify a raw driver message the way Postgres-family servers phrase them
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("permission denied") || lower.contains("access denied") {
            WarehouseError::PermissionDenied(message)
        } else if lower.contains("does not exist") {
            WarehouseError::NotFound(message)
        } else {
            WarehouseError::QueryError(message)
        }
    }
}

/// Failure inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source}")]
pub struct AtomicBatchError {
    /// Index of the failing statement, `None` if the commit itself failed
    pub statement: Option<usize>,

    pub source: WarehouseError,
}

/// Trait for warehouse clients stages execute against
#[async_trait::async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Get the client name (e.g., "Redshift", "Mock")
    fn name(&self) -> &'static str;

    /// Execute a statement that returns no rows
    async fn execute(&self, sql: &str) -> Result<(), WarehouseError>;

    /// Execute a query and return all rows
    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError>;

    /// Whether DDL such as TRUNCATE can be rolled back with the statements
    /// around it
    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    /// Execute statements as one unit
    ///
    /// The default runs them one after another with no rollback; clients with
    /// transactional DDL override this with a real transaction.
    async fn execute_atomic(&self, statements: &[String]) -> Result<(), AtomicBatchError> {
        for (index, sql) in statements.iter().enumerate() {
            self.execute(sql).await.map_err(|source| AtomicBatchError {
                statement: Some(index),
                source,
            })?;
        }
        Ok(())
    }

    /// Test the connection to the warehouse
    async fn test_connection(&self) -> Result<(), WarehouseError> {
        self.query("SELECT 1").await.map(|_| ())
    }
}
