//! Extract-load stage: bulk COPY of JSON objects into a staging table

use crate::stage::{check_non_empty, check_table, check_task_id, Stage, StageConfigError, StageError, StageKind};
use starload_core::{KeyTemplate, RetryPolicy, RunContext, StagingMode, TemplateError};
use starload_warehouse::{AwsCredentials, CredentialProvider, WarehouseClient};

const MASK: &str = "****";

/// JSON layout descriptor passed to `FORMAT AS JSON`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonFormat {
    /// Match object keys to column names
    Auto,

    /// JSONPaths file location (may contain placeholders)
    Path(KeyTemplate),
}

impl JsonFormat {
    /// `auto` (any case) or a JSONPaths location
    pub fn parse(value: &str) -> Result<Self, TemplateError> {
        if value.trim().eq_ignore_ascii_case("auto") {
            Ok(JsonFormat::Auto)
        } else {
            KeyTemplate::parse(value.trim()).map(JsonFormat::Path)
        }
    }

    pub fn render(&self, context: &RunContext) -> Result<String, TemplateError> {
        match self {
            JsonFormat::Auto => Ok("auto".to_string()),
            JsonFormat::Path(template) => template.render(context),
        }
    }
}

impl std::fmt::Display for JsonFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonFormat::Auto => write!(f, "auto"),
            JsonFormat::Path(template) => write!(f, "{}", template),
        }
    }
}

/// Fully rendered COPY statement
#[derive(Clone, PartialEq, Eq)]
pub struct CopyStatement {
    pub table: String,
    pub bucket: String,
    pub key: String,
    pub credentials: AwsCredentials,
    pub region: String,
    pub format: String,
}

/// Escape a value for use inside a single-quoted SQL literal
pub(crate) fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

impl CopyStatement {
    pub fn source_path(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    /// Statement text with real credentials
    pub fn render(&self) -> String {
        self.render_with(&self.credentials.access_key_id, &self.credentials.secret_access_key)
    }

    /// Statement text with both keys masked
    pub fn redacted(&self) -> String {
        self.render_with(MASK, MASK)
    }

    fn render_with(&self, access_key_id: &str, secret_access_key: &str) -> String {
        format!(
            "COPY {}\nFROM '{}'\nACCESS_KEY_ID '{}'\nSECRET_ACCESS_KEY '{}'\nREGION '{}'\nFORMAT AS JSON '{}';",
            self.table,
            quote_literal(&self.source_path()),
            quote_literal(access_key_id),
            quote_literal(secret_access_key),
            quote_literal(&self.region),
            quote_literal(&self.format),
        )
    }
}

impl std::fmt::Debug for CopyStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Loads every object under `s3://bucket/<rendered key>` into a staging table
#[derive(Debug, Clone)]
pub struct ExtractLoadStage {
    task_id: String,
    target_table: String,
    bucket: String,
    key: KeyTemplate,
    region: String,
    credential_ref: String,
    format: JsonFormat,
    mode: StagingMode,
    redact: bool,
    retry_policy: RetryPolicy,
}

impl ExtractLoadStage {
    pub fn builder(task_id: impl Into<String>, target_table: impl Into<String>) -> ExtractLoadBuilder {
        ExtractLoadBuilder::new(task_id, target_table)
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn key_template(&self) -> &KeyTemplate {
        &self.key
    }

    pub fn mode(&self) -> StagingMode {
        self.mode
    }

    /// Render the COPY for a context with the given credentials
    pub fn copy_statement(
        &self,
        context: &RunContext,
        credentials: AwsCredentials,
    ) -> Result<CopyStatement, TemplateError> {
        Ok(CopyStatement {
            table: self.target_table.clone(),
            bucket: self.bucket.clone(),
            key: self.key.render(context)?,
            credentials,
            region: self.region.clone(),
            format: self.format.render(context)?,
        })
    }

    fn truncate_statement(&self) -> String {
        format!("TRUNCATE TABLE {}", self.target_table)
    }
}

#[async_trait::async_trait]
impl Stage for ExtractLoadStage {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn kind(&self) -> StageKind {
        StageKind::ExtractLoad
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    fn describe(&self) -> String {
        format!(
            "COPY s3://{}/{} -> {} (json {}, {:?})",
            self.bucket, self.key, self.target_table, self.format, self.mode
        )
    }

    async fn execute(
        &self,
        context: &RunContext,
        warehouse: &dyn WarehouseClient,
        credentials: &dyn CredentialProvider,
    ) -> Result<(), StageError> {
        // Render before resolving so template errors never touch the provider
        self.key.render(context)?;
        self.format.render(context)?;

        let creds = credentials
            .resolve(&self.credential_ref)
            .await
            .map_err(|source| StageError::CredentialResolutionFailed {
                credential_ref: self.credential_ref.clone(),
                source,
            })?;
        let copy = self.copy_statement(context, creds)?;

        if self.mode == StagingMode::Replace {
            let truncate = self.truncate_statement();
            tracing::debug!(task_id = %self.task_id, table = %self.target_table, "clearing staging table");
            warehouse
                .execute(&truncate)
                .await
                .map_err(|cause| StageError::execution(truncate, cause))?;
        }

        tracing::info!(
            task_id = %self.task_id,
            table = %self.target_table,
            source = %copy.source_path(),
            "copying objects into staging table"
        );

        let logged = if self.redact { copy.redacted() } else { copy.render() };
        tracing::debug!(task_id = %self.task_id, statement = %logged);

        warehouse
            .execute(&copy.render())
            .await
            .map_err(|cause| StageError::execution(logged, cause))
    }
}

/// Builder for [`ExtractLoadStage`]
///
/// Defaults: region `us-west-2`, credential reference `aws_credentials`,
/// `FORMAT AS JSON 'auto'`, replace mode, redaction on, no retries.
#[derive(Debug, Clone)]
pub struct ExtractLoadBuilder {
    task_id: String,
    target_table: String,
    bucket: String,
    key: String,
    region: String,
    credential_ref: String,
    format: String,
    mode: StagingMode,
    redact: bool,
    retry_policy: RetryPolicy,
}

impl ExtractLoadBuilder {
    pub fn new(task_id: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            target_table: target_table.into(),
            bucket: String::new(),
            key: String::new(),
            region: "us-west-2".to_string(),
            credential_ref: "aws_credentials".to_string(),
            format: "auto".to_string(),
            mode: StagingMode::default(),
            redact: true,
            retry_policy: RetryPolicy::none(),
        }
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Object key prefix template, e.g. `log-data/{year}/{month}`
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn credential_ref(mut self, credential_ref: impl Into<String>) -> Self {
        self.credential_ref = credential_ref.into();
        self
    }

    /// `auto` or a JSONPaths location
    pub fn json_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn mode(mut self, mode: StagingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Mask keys in logged and reported statements
    pub fn redact(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn build(self) -> Result<ExtractLoadStage, StageConfigError> {
        check_task_id(&self.task_id)?;
        check_table(&self.task_id, &self.target_table)?;
        check_non_empty(&self.task_id, "bucket", &self.bucket)?;
        check_non_empty(&self.task_id, "region", &self.region)?;
        check_non_empty(&self.task_id, "credential_ref", &self.credential_ref)?;

        let template_error = |source| StageConfigError::Template {
            task_id: self.task_id.clone(),
            source,
        };
        let key = KeyTemplate::parse(&self.key).map_err(template_error)?;
        let format = JsonFormat::parse(&self.format).map_err(template_error)?;

        Ok(ExtractLoadStage {
            task_id: self.task_id,
            target_table: self.target_table,
            bucket: self.bucket,
            key,
            region: self.region,
            credential_ref: self.credential_ref,
            format,
            mode: self.mode,
            redact: self.redact,
            retry_policy: self.retry_policy,
        })
    }
}
