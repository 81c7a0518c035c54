//! Starload Core
//!
//! Shared domain types for the star-schema loader: configuration, the typed
//! run context, object-key templates, retry policy, scalar values and the
//! run report.

pub mod config;
pub mod context;
pub mod template;
pub mod retry;
pub mod report;
pub mod value;

pub use config::{
    Config, ConfigError, CredentialConfig, DimensionMode, LoadConfig, PipelineDefaults, PipelineSection,
    QualityCheckConfig, StagingConfig, StagingMode, WarehouseConfig, WarehouseFlavor,
};
pub use context::{RunContext, RunContextBuilder};
pub use template::{KeyTemplate, TemplateError};
pub use retry::RetryPolicy;
pub use report::{ReportVersion, RunReport, RunSummary, StageOutcome, StageReport};
pub use value::{Row, Value};
