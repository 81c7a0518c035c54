//! Fact-load stage

use crate::stage::{check_non_empty, check_table, check_task_id, Stage, StageConfigError, StageError, StageKind};
use starload_core::{RetryPolicy, RunContext};
use starload_warehouse::{CredentialProvider, WarehouseClient};

/// Appends the rows of a SELECT to an append-only fact table
///
/// Not idempotent: a retry after a committed insert duplicates rows.
#[derive(Debug, Clone)]
pub struct FactLoadStage {
    task_id: String,
    target_table: String,
    transform_sql: String,
    retry_policy: RetryPolicy,
}

impl FactLoadStage {
    pub fn new(
        task_id: impl Into<String>,
        target_table: impl Into<String>,
        transform_sql: impl Into<String>,
    ) -> Result<Self, StageConfigError> {
        let task_id = task_id.into();
        let target_table = target_table.into();
        let transform_sql = transform_sql.into().trim().to_string();

        check_task_id(&task_id)?;
        check_table(&task_id, &target_table)?;
        check_non_empty(&task_id, "transform_sql", &transform_sql)?;

        Ok(Self {
            task_id,
            target_table,
            transform_sql,
            retry_policy: RetryPolicy::none(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn insert_statement(&self) -> String {
        format!("INSERT INTO {} {}", self.target_table, self.transform_sql)
    }
}

#[async_trait::async_trait]
impl Stage for FactLoadStage {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn kind(&self) -> StageKind {
        StageKind::FactLoad
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    fn describe(&self) -> String {
        format!("INSERT INTO {} (append)", self.target_table)
    }

    async fn execute(
        &self,
        _context: &RunContext,
        warehouse: &dyn WarehouseClient,
        _credentials: &dyn CredentialProvider,
    ) -> Result<(), StageError> {
        tracing::info!(task_id = %self.task_id, table = %self.target_table, "loading fact table");

        let statement = self.insert_statement();
        warehouse
            .execute(&statement)
            .await
            .map_err(|cause| StageError::execution(statement, cause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use starload_warehouse::{MockWarehouse, StaticCredentialProvider, WarehouseError};

    fn context() -> RunContext {
        RunContext::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn issues_single_insert() {
        let stage = FactLoadStage::new("Load_songplays_fact_table", "songplays", "\n  SELECT 1, 2\n").unwrap();
        let warehouse = MockWarehouse::new();

        stage
            .execute(&context(), &warehouse, &StaticCredentialProvider::new())
            .await
            .unwrap();

        assert_eq!(warehouse.executed().await, vec!["INSERT INTO songplays SELECT 1, 2"]);
    }

    #[tokio::test]
    async fn failure_names_statement() {
        let stage = FactLoadStage::new("Load_songplays_fact_table", "songplays", "SELECT 1").unwrap();
        let warehouse = MockWarehouse::new()
            .fail_on("songplays", WarehouseError::NotFound("relation \"songplays\" does not exist".into()));

        let err = stage
            .execute(&context(), &warehouse, &StaticCredentialProvider::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        match err {
            StageError::ExecutionFailed { statement, .. } => {
                assert_eq!(statement, "INSERT INTO songplays SELECT 1")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rejects_empty_sql() {
        assert!(matches!(
            FactLoadStage::new("fact", "songplays", "   "),
            Err(StageConfigError::EmptyField { field: "transform_sql", .. })
        ));
    }
}
