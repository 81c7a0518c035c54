//! Starload Engine
//!
//! The stage contract and the concrete stage kinds: extract-load,
//! fact-load, dimension-load, quality gate and the no-op sentinel.
//!
//! Stages own only their parameters. The warehouse client and credential
//! provider are passed to every `execute` call, and a stage never loops or
//! sleeps: retrying is the caller's business.

pub mod stage;
pub mod extract;
pub mod fact;
pub mod dimension;
pub mod quality;
pub mod sentinel;

pub use stage::{Stage, StageConfigError, StageError, StageKind};
pub use extract::{CopyStatement, ExtractLoadBuilder, ExtractLoadStage, JsonFormat};
pub use fact::FactLoadStage;
pub use dimension::DimensionLoadStage;
pub use quality::{QualityCheck, QualityGateStage};
pub use sentinel::SentinelStage;
