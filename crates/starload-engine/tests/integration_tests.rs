//! Integration tests for the stage kinds
//!
//! Drives the Sparkify statements through every stage kind against the mock
//! warehouse and checks the exact statement sequence.

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use starload_core::{DimensionMode, RunContext, StagingMode, Value};
use starload_engine::{
    DimensionLoadStage, ExtractLoadStage, FactLoadStage, QualityCheck, QualityGateStage,
    SentinelStage, Stage, StageError, StageKind,
};
use starload_sql::{names, SqlLibrary};
use starload_warehouse::{AwsCredentials, MockWarehouse, StaticCredentialProvider};

fn context() -> RunContext {
    RunContext::new(NaiveDate::from_ymd_opt(2018, 11, 1).unwrap())
}

fn credentials() -> StaticCredentialProvider {
    StaticCredentialProvider::new()
        .with("aws_credentials", AwsCredentials::new("AKIAINTEGRATION", "integration-secret"))
}

fn sparkify_stages(library: &SqlLibrary) -> Vec<Box<dyn Stage>> {
    let sql = |name| library.get(name).unwrap().to_string();

    vec![
        Box::new(SentinelStage::new("Begin_execution").unwrap()) as Box<dyn Stage>,
        Box::new(
            ExtractLoadStage::builder("stage_events", "staging_events")
                .bucket("udacity-dend")
                .key("log-data")
                .json_format("s3://udacity-dend/log_json_path.json")
                .build()
                .unwrap(),
        ),
        Box::new(
            ExtractLoadStage::builder("stage_songs", "staging_songs")
                .bucket("udacity-dend")
                .key("song-data")
                .mode(StagingMode::Append)
                .build()
                .unwrap(),
        ),
        Box::new(FactLoadStage::new("Load_songplays_fact_table", "songplays", sql(names::SONGPLAY_TABLE_INSERT)).unwrap()),
        Box::new(
            DimensionLoadStage::new("Load_user_dim_table", "users", sql(names::USER_TABLE_INSERT), DimensionMode::TruncateInsert)
                .unwrap(),
        ),
        Box::new(
            DimensionLoadStage::new("Load_song_dim_table", "songs", sql(names::SONG_TABLE_INSERT), DimensionMode::Append)
                .unwrap(),
        ),
        Box::new(
            QualityGateStage::new(
                "Run_data_quality_checks",
                vec![QualityCheck::new("SELECT COUNT(*) FROM users WHERE userid IS NULL", 0)],
            )
            .unwrap(),
        ),
        Box::new(SentinelStage::new("Stop_execution").unwrap()),
    ]
}

#[tokio::test]
async fn full_sequence_statements() {
    let library = SqlLibrary::builtin();
    let warehouse = MockWarehouse::new().with_rows(
        "SELECT COUNT(*) FROM users WHERE userid IS NULL",
        vec![vec![Value::Int(0)]],
    );
    let credentials = credentials();

    for stage in sparkify_stages(&library) {
        stage.execute(&context(), &warehouse, &credentials).await.unwrap();
    }

    let executed = warehouse.executed().await;
    let heads: Vec<&str> = executed
        .iter()
        .map(|sql| sql.lines().next().unwrap_or_default())
        .collect();

    assert_eq!(
        heads,
        vec![
            "TRUNCATE TABLE staging_events",
            "COPY staging_events",
            "COPY staging_songs",
            "INSERT INTO songplays SELECT",
            "TRUNCATE TABLE users",
            "INSERT INTO users SELECT DISTINCT userid, firstname, lastname, gender, level",
            "INSERT INTO songs SELECT DISTINCT song_id, title, artist_id, year, duration",
        ]
    );
    assert_eq!(warehouse.queries().await.len(), 1);
    assert!(executed[2].contains("FORMAT AS JSON 'auto';"));
}

#[tokio::test]
async fn kinds_and_descriptions() {
    let library = SqlLibrary::builtin();
    let stages = sparkify_stages(&library);

    let kinds: Vec<StageKind> = stages.iter().map(|s| s.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            StageKind::Sentinel,
            StageKind::ExtractLoad,
            StageKind::ExtractLoad,
            StageKind::FactLoad,
            StageKind::DimensionLoad,
            StageKind::DimensionLoad,
            StageKind::QualityGate,
            StageKind::Sentinel,
        ]
    );
    assert_eq!(stages[4].describe(), "INSERT INTO users (truncate-insert)");
    assert_eq!(stages[6].describe(), "1 quality check");
}

#[tokio::test]
async fn dirty_dimension_fails_gate() {
    let warehouse = MockWarehouse::new().with_rows(
        "SELECT COUNT(*) FROM users WHERE userid IS NULL",
        vec![vec![Value::Int(12)]],
    );
    let gate = QualityGateStage::new(
        "Run_data_quality_checks",
        vec![QualityCheck::new("SELECT COUNT(*) FROM users WHERE userid IS NULL", 0)],
    )
    .unwrap();

    let err = gate.execute(&context(), &warehouse, &credentials()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Quality check failed: expected 0, got 12 for `SELECT COUNT(*) FROM users WHERE userid IS NULL`"
    );
    assert!(matches!(err, StageError::QualityCheckFailed { .. }));
}
