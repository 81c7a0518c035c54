//! Configuration schema (starload.toml)
//!
//! Replaces process-wide default arguments with one explicit structure that is
//! handed to pipeline construction.

use crate::retry::RetryPolicy;
use crate::template::KeyTemplate;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Pipeline identity and scheduling hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Pipeline name (used in reports and logs)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Cadence descriptor, opaque to the core (e.g. `@hourly`)
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Owner recorded in run reports
    #[serde(default)]
    pub owner: Option<String>,

    /// Task id of the start sentinel
    #[serde(default = "default_start_task_id")]
    pub start_task_id: String,

    /// Task id of the end sentinel
    #[serde(default = "default_end_task_id")]
    pub end_task_id: String,

    /// Maximum number of stages the local scheduler runs at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_schedule() -> String {
    "@hourly".to_string()
}

fn default_start_task_id() -> String {
    "Begin_execution".to_string()
}

fn default_end_task_id() -> String {
    "Stop_execution".to_string()
}

fn default_max_parallel() -> usize {
    4
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: "sparkify_etl".to_string(),
            description: Some("Load and transform data in Redshift".to_string()),
            schedule: default_schedule(),
            owner: None,
            start_task_id: default_start_task_id(),
            end_task_id: default_end_task_id(),
            max_parallel: default_max_parallel(),
        }
    }
}

/// Defaults applied to every stage when the pipeline is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefaults {
    /// Extra attempts a scheduler may make after a failure
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Seconds to wait between attempts
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    300
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl PipelineDefaults {
    /// Retry policy described by these defaults
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_secs(self.retry_delay_secs))
    }
}

/// Warehouse flavour, which decides dialect-dependent behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseFlavor {
    /// Amazon Redshift (TRUNCATE commits implicitly)
    Redshift,

    /// PostgreSQL (transactional DDL)
    Postgres,
}

impl Default for WarehouseFlavor {
    fn default() -> Self {
        Self::Redshift
    }
}

/// Warehouse connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Warehouse flavour
    #[serde(rename = "type", default)]
    pub flavor: WarehouseFlavor,

    /// libpq-style connection string; may be omitted in favour of
    /// `STARLOAD_WAREHOUSE_URL`
    #[serde(default)]
    pub connection: Option<String>,

    /// Connect over TLS
    #[serde(default = "default_tls")]
    pub tls: bool,

    /// Extra connection settings (warehouse-specific)
    #[serde(flatten)]
    pub settings: HashMap<String, String>,
}

fn default_tls() -> bool {
    true
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            flavor: WarehouseFlavor::default(),
            connection: None,
            tls: default_tls(),
            settings: HashMap::new(),
        }
    }
}

/// How an extract-load treats rows already present in its staging table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingMode {
    /// Truncate the staging table before loading, so re-runs do not duplicate rows
    Replace,

    /// Load on top of existing rows
    Append,
}

impl Default for StagingMode {
    fn default() -> Self {
        Self::Replace
    }
}

/// Load policy for dimension tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionMode {
    /// Insert on top of existing rows
    Append,

    /// Empty the table, then repopulate it
    TruncateInsert,
}

impl Default for DimensionMode {
    fn default() -> Self {
        Self::TruncateInsert
    }
}

impl std::fmt::Display for DimensionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::TruncateInsert => write!(f, "truncate-insert"),
        }
    }
}

/// Object-storage source settings for the staging loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Source bucket
    pub bucket: String,

    /// Bucket region
    #[serde(default = "default_region")]
    pub region: String,

    /// Credential reference resolved through the credential provider
    #[serde(default = "default_credential_ref")]
    pub credential_ref: String,

    /// Staging table policy on re-run
    #[serde(default)]
    pub mode: StagingMode,

    /// Key template for log (event) data
    pub events_key: KeyTemplate,

    /// JSON path descriptor for log data, or `auto`
    #[serde(default = "default_json_format")]
    pub events_json_path: String,

    /// Key template for song data
    pub songs_key: KeyTemplate,

    /// JSON path descriptor for song data, or `auto`
    #[serde(default = "default_json_format")]
    pub songs_json_path: String,
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_credential_ref() -> String {
    "aws_credentials".to_string()
}

fn default_json_format() -> String {
    "auto".to_string()
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            bucket: "udacity-dend".to_string(),
            region: default_region(),
            credential_ref: default_credential_ref(),
            mode: StagingMode::default(),
            events_key: KeyTemplate::parse("log-data").expect("static template"),
            events_json_path: "s3://udacity-dend/log_json_path.json".to_string(),
            songs_key: KeyTemplate::parse("song-data").expect("static template"),
            songs_json_path: default_json_format(),
        }
    }
}

/// Load settings for the fact and dimension stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoadConfig {
    /// Mode for every dimension table
    #[serde(default)]
    pub dimension_mode: DimensionMode,

    /// Per-table overrides (table name -> mode)
    #[serde(default)]
    pub dimension_overrides: HashMap<String, DimensionMode>,
}

impl LoadConfig {
    /// Mode for a specific dimension table
    pub fn mode_for(&self, table: &str) -> DimensionMode {
        self.dimension_overrides
            .get(table)
            .copied()
            .unwrap_or(self.dimension_mode)
    }
}

/// One quality assertion: a scalar query and the value it must return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckConfig {
    pub sql: String,
    pub expected: Value,
}

/// Static access/secret key pair for a credential reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline identity
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Stage defaults (retries, retry delay)
    #[serde(default)]
    pub defaults: PipelineDefaults,

    /// Warehouse connection
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Staging sources
    #[serde(default)]
    pub staging: StagingConfig,

    /// Fact/dimension load settings
    #[serde(default)]
    pub load: LoadConfig,

    /// Quality assertions, in reporting order
    #[serde(default = "default_quality_checks")]
    pub quality_checks: Vec<QualityCheckConfig>,

    /// SQL library overrides (entry name -> SQL text)
    #[serde(default)]
    pub sql: HashMap<String, String>,

    /// Static credentials by reference; the environment is consulted first
    #[serde(default)]
    pub credentials: HashMap<String, CredentialConfig>,

    /// Mask access keys in logged and reported statements
    #[serde(default = "default_redact")]
    pub redact_sensitive_data: bool,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: std::path::PathBuf,
}

fn default_quality_checks() -> Vec<QualityCheckConfig> {
    vec![
        QualityCheckConfig {
            sql: "SELECT COUNT(*) FROM users WHERE userid IS NULL".to_string(),
            expected: Value::Int(0),
        },
        QualityCheckConfig {
            sql: "SELECT COUNT(*) FROM songs WHERE songid IS NULL".to_string(),
            expected: Value::Int(0),
        },
    ]
}

fn default_redact() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineSection::default(),
            defaults: PipelineDefaults::default(),
            warehouse: WarehouseConfig::default(),
            staging: StagingConfig::default(),
            load: LoadConfig::default(),
            quality_checks: default_quality_checks(),
            sql: HashMap::new(),
            credentials: HashMap::new(),
            redact_sensitive_data: default_redact(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        config.validate()?;
        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Check values serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.pipeline.start_task_id == self.pipeline.end_task_id {
            return Err(ConfigError::Invalid(
                "pipeline.start_task_id and pipeline.end_task_id must differ".to_string(),
            ));
        }
        if self.staging.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("staging.bucket is empty".to_string()));
        }
        for (i, check) in self.quality_checks.iter().enumerate() {
            if check.sql.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "quality_checks[{}].sql is empty",
                    i
                )));
            }
        }
        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.retries, 3);
        assert_eq!(config.defaults.retry_delay_secs, 300);
        assert_eq!(config.pipeline.schedule, "@hourly");
        assert_eq!(config.load.dimension_mode, DimensionMode::TruncateInsert);
        assert_eq!(config.quality_checks.len(), 2);
        assert!(config.redact_sensitive_data);
    }

    #[test]
    fn parse_minimal_toml() {
        let config = Config::from_toml(
            r#"
            [staging]
            bucket = "sparkify-raw"
            region = "us-east-1"
            events_key = "log-data/{year}/{month}"
            events_json_path = "s3://sparkify-raw/log_json_path.json"
            songs_key = "song-data"
            "#,
        )
        .unwrap();

        assert_eq!(config.staging.bucket, "sparkify-raw");
        assert_eq!(config.staging.events_key.as_str(), "log-data/{year}/{month}");
        assert_eq!(config.staging.songs_json_path, "auto");
        assert_eq!(config.staging.mode, StagingMode::Replace);
        assert_eq!(config.pipeline.start_task_id, "Begin_execution");
    }

    #[test]
    fn parse_full_toml() {
        let config = Config::from_toml(
            r#"
            redact_sensitive_data = false

            [pipeline]
            name = "final_project"
            schedule = "@daily"
            max_parallel = 2

            [defaults]
            retries = 1
            retry_delay_secs = 10

            [warehouse]
            type = "postgres"
            connection = "host=localhost dbname=dev"
            tls = false

            [staging]
            bucket = "b"
            mode = "append"
            events_key = "log-data"
            songs_key = "song-data"

            [load]
            dimension_mode = "append"
            dimension_overrides = { time = "truncate-insert" }

            [[quality_checks]]
            sql = "SELECT COUNT(*) FROM songplays"
            expected = 42

            [sql]
            user_table_insert = "SELECT 1, 'a', 'b', 'F', 'free'"

            [credentials.aws_credentials]
            access_key_id = "AKIA"
            secret_access_key = "secret"
            "#,
        )
        .unwrap();

        assert!(!config.redact_sensitive_data);
        assert_eq!(config.pipeline.max_parallel, 2);
        assert_eq!(config.defaults.retry_policy(), RetryPolicy::new(1, Duration::from_secs(10)));
        assert_eq!(config.warehouse.flavor, WarehouseFlavor::Postgres);
        assert_eq!(config.staging.mode, StagingMode::Append);
        assert_eq!(config.load.mode_for("users"), DimensionMode::Append);
        assert_eq!(config.load.mode_for("time"), DimensionMode::TruncateInsert);
        assert_eq!(config.quality_checks.len(), 1);
        assert_eq!(config.quality_checks[0].expected, Value::Int(42));
        assert!(config.sql.contains_key("user_table_insert"));
        assert_eq!(config.credentials["aws_credentials"].access_key_id, "AKIA");
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let result = Config::from_toml(
            r#"
            [staging]
            bucket = "b"
            events_key = "log-data/{execution_date}"
            songs_key = "song-data"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn rejects_zero_parallelism() {
        let result = Config::from_toml(
            r#"
            [pipeline]
            name = "p"
            max_parallel = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.staging, parsed.staging);
        assert_eq!(config.quality_checks, parsed.quality_checks);
    }
}
