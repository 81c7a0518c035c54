//! Quality gate stage

use crate::stage::{check_task_id, Stage, StageConfigError, StageError, StageKind};
use starload_core::{QualityCheckConfig, RetryPolicy, RunContext, Value};
use starload_warehouse::{CredentialProvider, WarehouseClient};

/// A scalar assertion: the first cell returned by `sql` must equal `expected`
#[derive(Debug, Clone, PartialEq)]
pub struct QualityCheck {
    pub sql: String,
    pub expected: Value,
}

impl QualityCheck {
    pub fn new(sql: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            sql: sql.into().trim().to_string(),
            expected: expected.into(),
        }
    }
}

impl From<&QualityCheckConfig> for QualityCheck {
    fn from(config: &QualityCheckConfig) -> Self {
        Self::new(config.sql.as_str(), config.expected.clone())
    }
}

/// Runs checks in order and stops at the first failure
#[derive(Debug, Clone)]
pub struct QualityGateStage {
    task_id: String,
    checks: Vec<QualityCheck>,
    retry_policy: RetryPolicy,
}

impl QualityGateStage {
    pub fn new(task_id: impl Into<String>, checks: Vec<QualityCheck>) -> Result<Self, StageConfigError> {
        let task_id = task_id.into();
        check_task_id(&task_id)?;

        if checks.is_empty() {
            return Err(StageConfigError::NoChecks { task_id });
        }
        if let Some(index) = checks.iter().position(|c| c.sql.trim().is_empty()) {
            return Err(StageConfigError::EmptyCheckSql { task_id, index });
        }

        Ok(Self {
            task_id,
            checks,
            retry_policy: RetryPolicy::none(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn checks(&self) -> &[QualityCheck] {
        &self.checks
    }
}

#[async_trait::async_trait]
impl Stage for QualityGateStage {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn kind(&self) -> StageKind {
        StageKind::QualityGate
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    fn describe(&self) -> String {
        match self.checks.len() {
            1 => "1 quality check".to_string(),
            n => format!("{} quality checks", n),
        }
    }

    async fn execute(
        &self,
        _context: &RunContext,
        warehouse: &dyn WarehouseClient,
        _credentials: &dyn CredentialProvider,
    ) -> Result<(), StageError> {
        for (index, check) in self.checks.iter().enumerate() {
            let rows = warehouse
                .query(&check.sql)
                .await
                .map_err(|cause| StageError::execution(check.sql.as_str(), cause))?;

            let actual = rows
                .first()
                .and_then(|row| row.first())
                .cloned()
                .ok_or_else(|| StageError::NoResultRow {
                    sql: check.sql.clone(),
                })?;

            if !actual.matches(&check.expected) {
                tracing::error!(
                    task_id = %self.task_id,
                    check = index + 1,
                    expected = %check.expected,
                    %actual,
                    "quality check failed"
                );
                return Err(StageError::QualityCheckFailed {
                    sql: check.sql.clone(),
                    expected: check.expected.clone(),
                    actual,
                });
            }

            tracing::info!(task_id = %self.task_id, check = index + 1, "quality check passed");
        }

        Ok(())
    }
}
