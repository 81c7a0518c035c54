//! Local scheduler
//!
//! Executes a validated pipeline for one run context. A stage starts once all
//! of its upstreams succeeded; stages that become ready together start in
//! declaration order, bounded by `max_parallel`. Retryable failures are
//! retried per the stage's policy. When a stage fails for good, everything
//! downstream of it is recorded as upstream-failed without being invoked.

use crate::graph::{GraphError, Pipeline};
use starload_core::{RunContext, RunReport, StageOutcome, StageReport};
use starload_engine::Stage;
use starload_warehouse::{CredentialProvider, WarehouseClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Scheduler errors (stage failures are reported, not returned)
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Stage task aborted: {0}")]
    TaskAborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Running,
    Done(StageOutcome),
}

/// Runs pipelines against one warehouse client and credential provider
pub struct LocalScheduler {
    warehouse: Arc<dyn WarehouseClient>,
    credentials: Arc<dyn CredentialProvider>,
    max_parallel: usize,
}

impl LocalScheduler {
    pub fn new(warehouse: Arc<dyn WarehouseClient>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            warehouse,
            credentials,
            max_parallel: 4,
        }
    }

    /// Upper bound on concurrently running stages (at least 1)
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Execute every stage of `pipeline` once for `context`
    ///
    /// Returns a report even when stages fail; only an invalid graph or an
    /// aborted stage task is an error.
    pub async fn run(&self, pipeline: &Pipeline, context: &RunContext) -> Result<RunReport, SchedulerError> {
        pipeline.validate()?;

        let mut report = RunReport::new(pipeline.name(), pipeline.fingerprint(), context.clone());
        let mut states: HashMap<String, State> = pipeline
            .stages()
            .map(|stage| (stage.task_id().to_string(), State::Pending))
            .collect();
        let mut running: JoinSet<StageReport> = JoinSet::new();

        tracing::info!(
            pipeline = %pipeline.name(),
            run_date = %context.run_date,
            stages = pipeline.len(),
            max_parallel = self.max_parallel,
            "starting run"
        );

        loop {
            for stage in pipeline.stages() {
                if running.len() >= self.max_parallel {
                    break;
                }
                let task_id = stage.task_id();
                let ready = states.get(task_id) == Some(&State::Pending)
                    && pipeline
                        .upstream(task_id)
                        .iter()
                        .all(|up| states.get(up) == Some(&State::Done(StageOutcome::Succeeded)));
                if !ready {
                    continue;
                }

                states.insert(task_id.to_string(), State::Running);
                running.spawn(run_stage(
                    Arc::clone(stage),
                    context.clone(),
                    Arc::clone(&self.warehouse),
                    Arc::clone(&self.credentials),
                ));
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let finished = joined.map_err(|e| SchedulerError::TaskAborted(e.to_string()))?;
            let outcome = finished.outcome;
            let task_id = finished.task_id.clone();

            states.insert(task_id.clone(), State::Done(outcome));
            report.record(finished);

            if outcome == StageOutcome::Failed {
                for downstream in pipeline.transitive_downstream(&task_id) {
                    if states.get(&downstream) != Some(&State::Pending) {
                        continue;
                    }
                    tracing::warn!(task_id = %downstream, failed = %task_id, "skipping stage, upstream failed");
                    states.insert(downstream.clone(), State::Done(StageOutcome::UpstreamFailed));
                    report.record(StageReport {
                        kind: pipeline
                            .stage(&downstream)
                            .map(|s| s.kind().as_str().to_string())
                            .unwrap_or_default(),
                        task_id: downstream,
                        outcome: StageOutcome::UpstreamFailed,
                        attempts: 0,
                        error: Some(format!("upstream stage '{}' failed", task_id)),
                    });
                }
            }
        }

        report.finish();
        tracing::info!(
            pipeline = %pipeline.name(),
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            upstream_failed = report.summary.upstream_failed,
            "run finished"
        );
        Ok(report)
    }
}

/// Invoke a stage until it succeeds, fails permanently, or runs out of attempts
async fn run_stage(
    stage: Arc<dyn Stage>,
    context: RunContext,
    warehouse: Arc<dyn WarehouseClient>,
    credentials: Arc<dyn CredentialProvider>,
) -> StageReport {
    let policy = stage.retry_policy();
    let task_id = stage.task_id().to_string();
    let mut attempt = 0;

    loop {
        attempt += 1;
        tracing::info!(task_id = %task_id, attempt, "running stage");

        let error = match stage.execute(&context, warehouse.as_ref(), credentials.as_ref()).await {
            Ok(()) => {
                tracing::info!(task_id = %task_id, attempt, "stage succeeded");
                return StageReport {
                    task_id,
                    kind: stage.kind().as_str().to_string(),
                    outcome: StageOutcome::Succeeded,
                    attempts: attempt,
                    error: None,
                };
            }
            Err(e) => e,
        };

        if error.is_retryable() && policy.allows_retry_after(attempt) {
            tracing::warn!(
                task_id = %task_id,
                attempt,
                max_attempts = policy.max_attempts(),
                error = %error,
                delay_secs = policy.retry_delay.as_secs_f64(),
                "stage failed, retrying"
            );
            if !policy.retry_delay.is_zero() {
                tokio::time::sleep(policy.retry_delay).await;
            }
            continue;
        }

        tracing::error!(task_id = %task_id, attempt, error = %error, "stage failed");
        return StageReport {
            task_id,
            kind: stage.kind().as_str().to_string(),
            outcome: StageOutcome::Failed,
            attempts: attempt,
            error: Some(error.to_string()),
        };
    }
}
