//! No-op anchor stage for pipeline start and end

use crate::stage::{check_task_id, Stage, StageConfigError, StageError, StageKind};
use starload_core::{RetryPolicy, RunContext};
use starload_warehouse::{CredentialProvider, WarehouseClient};

#[derive(Debug, Clone)]
pub struct SentinelStage {
    task_id: String,
}

impl SentinelStage {
    pub fn new(task_id: impl Into<String>) -> Result<Self, StageConfigError> {
        let task_id = task_id.into();
        check_task_id(&task_id)?;
        Ok(Self { task_id })
    }
}

#[async_trait::async_trait]
impl Stage for SentinelStage {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn kind(&self) -> StageKind {
        StageKind::Sentinel
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn describe(&self) -> String {
        "no-op".to_string()
    }

    async fn execute(
        &self,
        _context: &RunContext,
        _warehouse: &dyn WarehouseClient,
        _credentials: &dyn CredentialProvider,
    ) -> Result<(), StageError> {
        tracing::debug!(task_id = %self.task_id, "sentinel reached");
        Ok(())
    }
}
