//! Run report (report.json v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::context::RunContext;
use serde::{Deserialize, Serialize};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Final state of one stage in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage ran and succeeded (possibly after retries)
    Succeeded,

    /// Stage ran and exhausted its attempts
    Failed,

    /// Stage was never invoked because an upstream stage failed
    UpstreamFailed,
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
        }
    }
}

/// Per-stage entry in a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub task_id: String,

    /// Stage kind (extract_load, fact_load, ...)
    pub kind: String,

    pub outcome: StageOutcome,

    /// Number of times the stage was invoked
    pub attempts: u32,

    /// Last error message, if the stage failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary statistics for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub upstream_failed: usize,

    /// Attempts beyond the first, summed over all stages
    pub retries: u32,
}

/// Run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    /// Pipeline name
    pub pipeline: String,

    /// Content hash of the pipeline topology
    pub fingerprint: String,

    /// Context the run executed with
    pub context: RunContext,

    /// Start timestamp (ISO 8601)
    pub started_at: String,

    /// Finish timestamp (ISO 8601), set by `finish`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,

    /// Summary statistics
    pub summary: RunSummary,

    /// Stage entries in completion order
    pub stages: Vec<StageReport>,
}

impl RunReport {
    /// Create a new empty report stamped with the current time
    pub fn new(pipeline: impl Into<String>, fingerprint: impl Into<String>, context: RunContext) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            pipeline: pipeline.into(),
            fingerprint: fingerprint.into(),
            context,
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: None,
            summary: RunSummary::default(),
            stages: Vec::new(),
        }
    }

    /// Record the final state of a stage
    pub fn record(&mut self, stage: StageReport) {
        match stage.outcome {
            StageOutcome::Succeeded => self.summary.succeeded += 1,
            StageOutcome::Failed => self.summary.failed += 1,
            StageOutcome::UpstreamFailed => self.summary.upstream_failed += 1,
        }

        self.summary.retries += stage.attempts.saturating_sub(1);
        self.summary.total += 1;
        self.stages.push(stage);
    }

    /// Stamp the finish time
    pub fn finish(&mut self) {
        self.finished_at = Some(chrono::Utc::now().to_rfc3339());
    }

    /// True if every recorded stage succeeded
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0 && self.summary.upstream_failed == 0
    }

    /// Look up a stage entry
    pub fn stage(&self, task_id: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.task_id == task_id)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}
