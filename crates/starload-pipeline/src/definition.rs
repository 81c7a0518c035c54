//! The Sparkify star-schema pipeline
//!
//! ```text
//! Begin_execution -> stage_events ┐
//!                 -> stage_songs  ┴-> Load_songplays_fact_table
//!     -> Load_{user,song,artist,time}_dim_table
//!     -> Run_data_quality_checks -> Stop_execution
//! ```

use crate::graph::{GraphError, Pipeline};
use starload_core::Config;
use starload_engine::{
    DimensionLoadStage, ExtractLoadStage, FactLoadStage, QualityCheck, QualityGateStage,
    StageConfigError,
};
use starload_sql::{names, SqlLibrary, SqlLibraryError};

/// Task ids of the Sparkify pipeline
pub mod task_ids {
    pub const STAGE_EVENTS: &str = "stage_events";
    pub const STAGE_SONGS: &str = "stage_songs";
    pub const LOAD_SONGPLAYS: &str = "Load_songplays_fact_table";
    pub const LOAD_USERS: &str = "Load_user_dim_table";
    pub const LOAD_SONGS: &str = "Load_song_dim_table";
    pub const LOAD_ARTISTS: &str = "Load_artist_dim_table";
    pub const LOAD_TIME: &str = "Load_time_dim_table";
    pub const RUN_QUALITY_CHECKS: &str = "Run_data_quality_checks";
}

/// (task id, table, SQL library entry) for each dimension load
const DIMENSIONS: &[(&str, &str, &str)] = &[
    (task_ids::LOAD_USERS, "users", names::USER_TABLE_INSERT),
    (task_ids::LOAD_SONGS, "songs", names::SONG_TABLE_INSERT),
    (task_ids::LOAD_ARTISTS, "artists", names::ARTIST_TABLE_INSERT),
    (task_ids::LOAD_TIME, "\"time\"", names::TIME_TABLE_INSERT),
];

/// Errors building a pipeline from configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Stage(#[from] StageConfigError),

    #[error(transparent)]
    Sql(#[from] SqlLibraryError),
}

/// Build and validate the Sparkify pipeline
///
/// Every stage gets the retry policy from `[defaults]`.
pub fn sparkify_pipeline(config: &Config, library: &SqlLibrary) -> Result<Pipeline, BuildError> {
    let retry = config.defaults.retry_policy();
    let staging = &config.staging;
    let start = config.pipeline.start_task_id.as_str();

    let mut pipeline = Pipeline::new(
        &config.pipeline.name,
        &config.pipeline.start_task_id,
        &config.pipeline.end_task_id,
    )?
    .with_schedule(&config.pipeline.schedule);

    let sources = [
        (
            task_ids::STAGE_EVENTS,
            "staging_events",
            staging.events_key.as_str(),
            staging.events_json_path.as_str(),
        ),
        (
            task_ids::STAGE_SONGS,
            "staging_songs",
            staging.songs_key.as_str(),
            staging.songs_json_path.as_str(),
        ),
    ];
    for (task_id, table, key, json_format) in sources {
        let stage = ExtractLoadStage::builder(task_id, table)
            .bucket(&staging.bucket)
            .key(key)
            .region(&staging.region)
            .credential_ref(&staging.credential_ref)
            .json_format(json_format)
            .mode(staging.mode)
            .redact(config.redact_sensitive_data)
            .retry_policy(retry)
            .build()?;
        pipeline.add_stage(stage, &[start])?;
    }

    let fact = FactLoadStage::new(
        task_ids::LOAD_SONGPLAYS,
        "songplays",
        library.get(names::SONGPLAY_TABLE_INSERT)?,
    )?
    .with_retry_policy(retry);
    pipeline.add_stage(fact, &[task_ids::STAGE_EVENTS, task_ids::STAGE_SONGS])?;

    for (task_id, table, entry) in DIMENSIONS {
        let mode = config.load.mode_for(table.trim_matches('"'));
        let stage = DimensionLoadStage::new(*task_id, *table, library.get(entry)?, mode)?
            .with_retry_policy(retry);
        pipeline.add_stage(stage, &[task_ids::LOAD_SONGPLAYS])?;
    }

    let checks = config.quality_checks.iter().map(QualityCheck::from).collect();
    let gate = QualityGateStage::new(task_ids::RUN_QUALITY_CHECKS, checks)?.with_retry_policy(retry);
    let dimension_ids: Vec<&str> = DIMENSIONS.iter().map(|(task_id, _, _)| *task_id).collect();
    pipeline.add_stage(gate, &dimension_ids)?;

    pipeline.finish(&[task_ids::RUN_QUALITY_CHECKS])?;
    pipeline.validate()?;

    tracing::debug!(
        pipeline = %pipeline.name(),
        stages = pipeline.len(),
        fingerprint = %pipeline.fingerprint(),
        "pipeline built"
    );
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use starload_core::{DimensionMode, RetryPolicy};
    use starload_engine::StageKind;
    use std::time::Duration;

    fn build(config: &Config) -> Pipeline {
        sparkify_pipeline(config, &SqlLibrary::builtin()).unwrap()
    }

    #[test]
    fn default_topology() {
        let pipeline = build(&Config::default());

        assert_eq!(
            pipeline.topological_order().unwrap(),
            vec![
                "Begin_execution",
                "stage_events",
                "stage_songs",
                "Load_songplays_fact_table",
                "Load_user_dim_table",
                "Load_song_dim_table",
                "Load_artist_dim_table",
                "Load_time_dim_table",
                "Run_data_quality_checks",
                "Stop_execution",
            ]
        );
        assert_eq!(
            pipeline.upstream(task_ids::LOAD_SONGPLAYS),
            [task_ids::STAGE_EVENTS.to_string(), task_ids::STAGE_SONGS.to_string()]
        );
        assert_eq!(pipeline.upstream(task_ids::RUN_QUALITY_CHECKS).len(), 4);
        assert_eq!(pipeline.schedule(), "@hourly");
    }

    #[test]
    fn stage_kinds_and_retry_defaults() {
        let pipeline = build(&Config::default());
        let expected_retry = RetryPolicy::new(3, Duration::from_secs(300));

        for stage in pipeline.stages() {
            match stage.kind() {
                StageKind::Sentinel => assert_eq!(stage.retry_policy(), RetryPolicy::none()),
                _ => assert_eq!(stage.retry_policy(), expected_retry, "{}", stage.task_id()),
            }
        }
        assert_eq!(
            pipeline.stage(task_ids::LOAD_TIME).map(|s| s.describe()),
            Some("INSERT INTO \"time\" (truncate-insert)".to_string())
        );
    }

    #[test]
    fn dimension_override_applies() {
        let mut config = Config::default();
        config.load.dimension_overrides.insert("artists".to_string(), DimensionMode::Append);

        let pipeline = build(&config);
        assert_eq!(
            pipeline.stage(task_ids::LOAD_ARTISTS).map(|s| s.describe()),
            Some("INSERT INTO artists (append)".to_string())
        );
        assert_eq!(
            pipeline.stage(task_ids::LOAD_USERS).map(|s| s.describe()),
            Some("INSERT INTO users (truncate-insert)".to_string())
        );
    }

    #[test]
    fn empty_quality_checks_rejected() {
        let mut config = Config::default();
        config.quality_checks.clear();

        assert!(matches!(
            sparkify_pipeline(&config, &SqlLibrary::builtin()),
            Err(BuildError::Stage(StageConfigError::NoChecks { .. }))
        ));
    }

    #[test]
    fn missing_library_entry() {
        let mut library = SqlLibrary::builtin();
        library.remove(names::TIME_TABLE_INSERT);

        assert_eq!(
            sparkify_pipeline(&Config::default(), &library).unwrap_err(),
            BuildError::Sql(SqlLibraryError::UnknownEntry(names::TIME_TABLE_INSERT.to_string()))
        );
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = build(&Config::default()).fingerprint();
        let b = build(&Config::default()).fingerprint();
        assert_eq!(a, b);
    }
}
