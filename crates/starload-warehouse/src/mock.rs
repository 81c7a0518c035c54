//! Mock warehouse client for testing
//!
//! Records every statement it receives and answers queries from scripted
//! result sets, without connecting to any warehouse. It's useful for:
//! - Unit testing stage behaviour (statement order, fail-fast checks)
//! - Scheduler tests with transient or permanent failures
//! - Dry runs of the CLI
//!
//! ## Usage
//!
//! ```rust,ignore
//! use starload_warehouse::{MockWarehouse, WarehouseClient};
//! use starload_core::Value;
//!
//! let warehouse = MockWarehouse::new()
//!     .with_rows("SELECT COUNT(*) FROM users", vec![vec![Value::Int(0)]]);
//!
//! warehouse.execute("TRUNCATE TABLE users").await?;
//! assert_eq!(warehouse.executed().await, vec!["TRUNCATE TABLE users"]);
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Fail every statement mentioning staging_songs
//! let warehouse = MockWarehouse::new()
//!     .fail_on("staging_songs", WarehouseError::QueryError("S3 access denied".into()));
//!
//! // Fail twice, then succeed
//! let warehouse = MockWarehouse::new()
//!     .fail_times("COPY staging_events", 2, WarehouseError::ConnectionError("reset".into()));
//! ```

use crate::client::{AtomicBatchError, WarehouseClient, WarehouseError};
use starload_core::Row;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// How a statement reached the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Execute,
    Query,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub kind: CallKind,
    pub sql: String,
}

#[derive(Debug, Clone)]
struct FailureRule {
    pattern: String,
    error: WarehouseError,

    /// Remaining failures; `None` fails forever
    remaining: Option<Arc<AtomicU32>>,
}

impl FailureRule {
    fn fires(&self, sql: &str) -> bool {
        if !sql.contains(&self.pattern) {
            return false;
        }
        match &self.remaining {
            None => true,
            Some(counter) => counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

/// In-memory warehouse client
///
/// Clones share the call log, so a test can keep one handle while a stage or
/// scheduler drives another.
#[derive(Clone)]
pub struct MockWarehouse {
    /// Scripted result sets keyed by trimmed SQL
    responses: HashMap<String, Vec<Row>>,

    failures: Vec<FailureRule>,

    /// Every call received, failed ones included
    calls: Arc<RwLock<Vec<MockCall>>>,

    atomic_batches: Arc<AtomicUsize>,

    transactional_ddl: bool,

    /// Simulate statement latency (milliseconds)
    latency_ms: u64,

    client_name: &'static str,
}

impl MockWarehouse {
    /// Create a mock with no scripted results
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            failures: Vec::new(),
            calls: Arc::new(RwLock::new(Vec::new())),
            atomic_batches: Arc::new(AtomicUsize::new(0)),
            transactional_ddl: false,
            latency_ms: 0,
            client_name: "Mock",
        }
    }

    /// Answer `sql` (compared after trimming) with `rows`
    ///
    /// Unscripted queries return an empty result set.
    pub fn with_rows(mut self, sql: impl AsRef<str>, rows: Vec<Row>) -> Self {
        self.responses.insert(sql.as_ref().trim().to_string(), rows);
        self
    }

    /// Fail every statement containing `pattern`
    pub fn fail_on(mut self, pattern: impl Into<String>, error: WarehouseError) -> Self {
        self.failures.push(FailureRule {
            pattern: pattern.into(),
            error,
            remaining: None,
        });
        self
    }

    /// Fail the first `times` statements containing `pattern`
    pub fn fail_times(mut self, pattern: impl Into<String>, times: u32, error: WarehouseError) -> Self {
        self.failures.push(FailureRule {
            pattern: pattern.into(),
            error,
            remaining: Some(Arc::new(AtomicU32::new(times))),
        });
        self
    }

    /// Report transactional DDL support, making `execute_atomic` the path
    /// for truncate-insert loads
    pub fn with_transactional_ddl(mut self, supported: bool) -> Self {
        self.transactional_ddl = supported;
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set a custom client name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.client_name = name;
        self
    }

    /// Every call received, in order
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.read().await.clone()
    }

    /// SQL of every `execute` call, in order
    pub async fn executed(&self) -> Vec<String> {
        self.sql_of(CallKind::Execute).await
    }

    /// SQL of every `query` call, in order
    pub async fn queries(&self) -> Vec<String> {
        self.sql_of(CallKind::Query).await
    }

    /// Total number of calls received
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Number of calls whose SQL contains `pattern`
    pub async fn count_matching(&self, pattern: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.sql.contains(pattern))
            .count()
    }

    /// Number of `execute_atomic` batches received
    pub fn atomic_batches(&self) -> usize {
        self.atomic_batches.load(Ordering::SeqCst)
    }

    /// Forget recorded calls
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    async fn sql_of(&self, kind: CallKind) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.kind == kind)
            .map(|call| call.sql.clone())
            .collect()
    }

    async fn record(&self, kind: CallKind, sql: &str) -> Result<(), WarehouseError> {
        self.simulate_latency().await;

        self.calls.write().await.push(MockCall {
            kind,
            sql: sql.to_string(),
        });

        match self.failures.iter().find(|rule| rule.fires(sql)) {
            Some(rule) => Err(rule.error.clone()),
            None => Ok(()),
        }
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WarehouseClient for MockWarehouse {
    fn name(&self) -> &'static str {
        self.client_name
    }

    async fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        self.record(CallKind::Execute, sql).await
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        self.record(CallKind::Query, sql).await?;
        Ok(self.responses.get(sql.trim()).cloned().unwrap_or_default())
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.transactional_ddl
    }

    async fn execute_atomic(&self, statements: &[String]) -> Result<(), AtomicBatchError> {
        self.atomic_batches.fetch_add(1, Ordering::SeqCst);
        for (index, sql) in statements.iter().enumerate() {
            self.record(CallKind::Execute, sql)
                .await
                .map_err(|source| AtomicBatchError {
                    statement: Some(index),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use starload_core::Value;

    #[tokio::test]
    async fn records_statements_in_order() {
        let warehouse = MockWarehouse::new();
        warehouse.execute("TRUNCATE TABLE users").await.unwrap();
        warehouse.query("SELECT 1").await.unwrap();
        warehouse.execute("INSERT INTO users SELECT 1").await.unwrap();

        assert_eq!(
            warehouse.executed().await,
            vec!["TRUNCATE TABLE users", "INSERT INTO users SELECT 1"]
        );
        assert_eq!(warehouse.queries().await, vec!["SELECT 1"]);
        assert_eq!(warehouse.call_count().await, 3);
    }

    #[tokio::test]
    async fn scripted_rows() {
        let warehouse = MockWarehouse::new()
            .with_rows("SELECT COUNT(*) FROM users", vec![vec![Value::Int(7)]]);

        let rows = warehouse.query("  SELECT COUNT(*) FROM users\n").await.unwrap();
        assert_eq!(rows, vec![vec![Value::Int(7)]]);

        let rows = warehouse.query("SELECT COUNT(*) FROM songs").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn transient_failures_expire() {
        let warehouse = MockWarehouse::new().fail_times(
            "staging_events",
            2,
            WarehouseError::ConnectionError("reset".to_string()),
        );

        assert!(warehouse.execute("COPY staging_events").await.is_err());
        assert!(warehouse.execute("COPY staging_events").await.is_err());
        assert!(warehouse.execute("COPY staging_events").await.is_ok());
        assert!(warehouse.execute("COPY staging_songs").await.is_ok());
        assert_eq!(warehouse.count_matching("staging_events").await, 3);
    }

    #[tokio::test]
    async fn permanent_failure() {
        let error = WarehouseError::PermissionDenied("no".to_string());
        let warehouse = MockWarehouse::new().fail_on("songs", error.clone());

        for _ in 0..3 {
            assert_eq!(warehouse.execute("INSERT INTO songs SELECT 1").await, Err(error.clone()));
        }
    }

    #[tokio::test]
    async fn atomic_batch_reports_failing_index() {
        let warehouse = MockWarehouse::new()
            .with_transactional_ddl(true)
            .fail_on("INSERT", WarehouseError::QueryError("bad".to_string()));

        let statements = vec!["TRUNCATE TABLE users".to_string(), "INSERT INTO users SELECT 1".to_string()];
        let err = warehouse.execute_atomic(&statements).await.unwrap_err();

        assert_eq!(err.statement, Some(1));
        assert_eq!(warehouse.atomic_batches(), 1);
        assert_eq!(warehouse.executed().await.len(), 2);
    }

    #[tokio::test]
    async fn clones_share_log() {
        let warehouse = MockWarehouse::new();
        let handle = warehouse.clone();
        handle.execute("SELECT 1").await.unwrap();
        assert_eq!(warehouse.call_count().await, 1);
    }
}
