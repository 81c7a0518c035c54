//! Starload Pipeline
//!
//! The dependency graph of stages, the Sparkify star-schema pipeline built
//! from configuration, and a local scheduler that executes a validated
//! pipeline for one run context.

pub mod graph;
pub mod definition;
pub mod scheduler;

pub use graph::{GraphError, Pipeline};
pub use definition::{sparkify_pipeline, task_ids, BuildError};
pub use scheduler::{LocalScheduler, SchedulerError};
