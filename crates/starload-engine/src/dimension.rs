//! Dimension-load stage

use crate::stage::{check_non_empty, check_table, check_task_id, Stage, StageConfigError, StageError, StageKind};
use starload_core::{DimensionMode, RetryPolicy, RunContext};
use starload_warehouse::{CredentialProvider, WarehouseClient};

/// Loads a dimension table from a SELECT
///
/// In truncate-insert mode the table is emptied and repopulated. Clients with
/// transactional DDL get both statements in one transaction; otherwise they
/// run back to back and readers can observe the empty table in between.
#[derive(Debug, Clone)]
pub struct DimensionLoadStage {
    task_id: String,
    target_table: String,
    transform_sql: String,
    mode: DimensionMode,
    retry_policy: RetryPolicy,
}

impl DimensionLoadStage {
    pub fn new(
        task_id: impl Into<String>,
        target_table: impl Into<String>,
        transform_sql: impl Into<String>,
        mode: DimensionMode,
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
            mode,
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

    pub fn mode(&self) -> DimensionMode {
        self.mode
    }

    /// Statements in execution order
    pub fn statements(&self) -> Vec<String> {
        let insert = format!("INSERT INTO {} {}", self.target_table, self.transform_sql);
        match self.mode {
            DimensionMode::Append => vec![insert],
            DimensionMode::TruncateInsert => {
                vec![format!("TRUNCATE TABLE {}", self.target_table), insert]
            }
        }
    }

    async fn run_sequential(
        &self,
        warehouse: &dyn WarehouseClient,
        statements: Vec<String>,
    ) -> Result<(), StageError> {
        for statement in statements {
            warehouse
                .execute(&statement)
                .await
                .map_err(|cause| StageError::execution(statement, cause))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Stage for DimensionLoadStage {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn kind(&self) -> StageKind {
        StageKind::DimensionLoad
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    fn describe(&self) -> String {
        format!("INSERT INTO {} ({})", self.target_table, self.mode)
    }

    async fn execute(
        &self,
        _context: &RunContext,
        warehouse: &dyn WarehouseClient,
        _credentials: &dyn CredentialProvider,
    ) -> Result<(), StageError> {
        tracing::info!(
            task_id = %self.task_id,
            table = %self.target_table,
            mode = %self.mode,
            "loading dimension table"
        );

        let statements = self.statements();

        if self.mode == DimensionMode::Append {
            return self.run_sequential(warehouse, statements).await;
        }

        if warehouse.supports_transactional_ddl() {
            return warehouse.execute_atomic(&statements).await.map_err(|e| {
                let statement = match e.statement.and_then(|i| statements.get(i)) {
                    Some(statement) => statement.clone(),
                    None => "COMMIT".to_string(),
                };
                StageError::execution(statement, e.source)
            });
        }

        tracing::warn!(
            task_id = %self.task_id,
            table = %self.target_table,
            warehouse = warehouse.name(),
            "truncate is not transactional on this warehouse; table stays empty until the insert commits"
        );
        self.run_sequential(warehouse, statements).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use starload_warehouse::{MockWarehouse, StaticCredentialProvider, WarehouseError};

    const USERS_SQL: &str = "SELECT DISTINCT userid, firstname, lastname, gender, level FROM staging_events";

    fn context() -> RunContext {
        RunContext::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    fn stage(mode: DimensionMode) -> DimensionLoadStage {
        DimensionLoadStage::new("Load_user_dim_table", "users", USERS_SQL, mode).unwrap()
    }

    #[tokio::test]
    async fn truncate_insert_issues_two_statements_in_order() {
        let warehouse = MockWarehouse::new();
        stage(DimensionMode::TruncateInsert)
            .execute(&context(), &warehouse, &StaticCredentialProvider::new())
            .await
            .unwrap();

        assert_eq!(
            warehouse.executed().await,
            vec![
                "TRUNCATE TABLE users".to_string(),
                format!("INSERT INTO users {}", USERS_SQL),
            ]
        );
        assert_eq!(warehouse.atomic_batches(), 0);
    }

    #[tokio::test]
    async fn append_issues_one_insert() {
        let warehouse = MockWarehouse::new().with_transactional_ddl(true);
        stage(DimensionMode::Append)
            .execute(&context(), &warehouse, &StaticCredentialProvider::new())
            .await
            .unwrap();

        assert_eq!(warehouse.executed().await, vec![format!("INSERT INTO users {}", USERS_SQL)]);
        assert_eq!(warehouse.atomic_batches(), 0);
    }

    #[tokio::test]
    async fn transactional_client_gets_one_batch() {
        let warehouse = MockWarehouse::new().with_transactional_ddl(true);
        stage(DimensionMode::TruncateInsert)
            .execute(&context(), &warehouse, &StaticCredentialProvider::new())
            .await
            .unwrap();

        assert_eq!(warehouse.atomic_batches(), 1);
        assert_eq!(warehouse.executed().await.len(), 2);
    }

    #[tokio::test]
    async fn failing_insert_is_named() {
        for transactional in [false, true] {
            let warehouse = MockWarehouse::new()
                .with_transactional_ddl(transactional)
                .fail_on("INSERT INTO users", WarehouseError::QueryError("disk full".to_string()));

            let err = stage(DimensionMode::TruncateInsert)
                .execute(&context(), &warehouse, &StaticCredentialProvider::new())
                .await
                .unwrap_err();

            match err {
                StageError::ExecutionFailed { statement, .. } => {
                    assert!(statement.starts_with("INSERT INTO users"), "{}", statement)
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn failing_truncate_skips_insert() {
        let warehouse = MockWarehouse::new()
            .fail_on("TRUNCATE", WarehouseError::PermissionDenied("must be owner".to_string()));

        let err = stage(DimensionMode::TruncateInsert)
            .execute(&context(), &warehouse, &StaticCredentialProvider::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::ExecutionFailed { ref statement, .. } if statement == "TRUNCATE TABLE users"));
        assert_eq!(warehouse.executed().await, vec!["TRUNCATE TABLE users"]);
    }

    #[test]
    fn describe_mentions_mode() {
        assert_eq!(stage(DimensionMode::TruncateInsert).describe(), "INSERT INTO users (truncate-insert)");
    }
}
