use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use starload_core::{Config, RunContext, RunContextBuilder, RunReport, StageOutcome};
use starload_pipeline::{sparkify_pipeline, LocalScheduler, Pipeline};
use starload_sql::{SqlLibrary, SqlParser};
use starload_warehouse::{
    AwsCredentials, ChainCredentialProvider, CredentialProvider, EnvCredentialProvider, MockWarehouse,
    PostgresWarehouse, StaticCredentialProvider, WarehouseClient,
};

/// Environment variable consulted when `[warehouse].connection` is unset
const WAREHOUSE_URL_ENV: &str = "STARLOAD_WAREHOUSE_URL";

/// Starload - star-schema loads from object storage into a warehouse
#[derive(Parser)]
#[command(name = "starload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: starload.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the pipeline and check its graph
    Validate,

    /// Show stages in execution order
    Plan {
        /// Render source keys for this logical date
        #[arg(long)]
        run_date: Option<NaiveDate>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute the pipeline once
    Run {
        /// Logical date of the run (YYYY-MM-DD)
        #[arg(long, required_unless_present = "logical_time", conflicts_with = "logical_time")]
        run_date: Option<NaiveDate>,

        /// Logical timestamp (RFC 3339); the run date is its UTC date.
        /// Required by `{hour}` keys
        #[arg(long)]
        logical_time: Option<DateTime<Utc>>,

        /// Run identifier recorded in the report
        #[arg(long)]
        run_id: Option<String>,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        report: PathBuf,

        /// Run against an in-memory warehouse instead of connecting
        #[arg(long)]
        dry_run: bool,
    },

    /// Create the staging and star-schema tables
    Bootstrap {
        /// Print the DDL instead of executing it
        #[arg(long)]
        print: bool,
    },

    /// Parse every SQL library entry and quality check
    Lint,

    /// Print a SQL library entry (or list entries)
    Sql {
        /// Entry name
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    dotenvy::dotenv().ok();

    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    if cli.verbose {
        eprintln!("{} warehouse: {:?}", "Using".cyan(), config.warehouse.flavor);
    }

    match cli.command {
        Commands::Validate => validate_command(&config),
        Commands::Plan { run_date, json } => plan_command(&config, run_date, json),
        Commands::Run {
            run_date,
            logical_time,
            run_id,
            report,
            dry_run,
        } => {
            let context = run_context(run_date, logical_time, run_id)?;
            run_command(&config, &context, &report, dry_run, cli.verbose).await
        }
        Commands::Bootstrap { print } => bootstrap_command(&config, print, cli.verbose).await,
        Commands::Lint => lint_command(&config),
        Commands::Sql { name } => sql_command(&config, name.as_deref()),
    }
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    if let Some(path) = path {
        return Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()));
    }

    let default_path = Path::new("starload.toml");
    if default_path.exists() {
        Config::from_file(default_path).context("Failed to load starload.toml")
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Ok(Config::default())
    }
}

fn run_context(
    run_date: Option<NaiveDate>,
    logical_time: Option<DateTime<Utc>>,
    run_id: Option<String>,
) -> Result<RunContext> {
    let mut builder = match (run_date, logical_time) {
        (Some(_), Some(_)) => anyhow::bail!("--run-date and --logical-time are mutually exclusive"),
        (Some(date), None) => RunContextBuilder::new(date),
        (None, Some(time)) => RunContextBuilder::new(time.date_naive()).logical_time(time),
        (None, None) => anyhow::bail!("--run-date or --logical-time is required"),
    };
    if let Some(run_id) = run_id {
        builder = builder.run_id(run_id);
    }
    Ok(builder.build())
}

fn build(config: &Config) -> Result<(SqlLibrary, Pipeline)> {
    let library = SqlLibrary::with_overrides(&config.sql).context("Invalid [sql] overrides")?;
    let pipeline = sparkify_pipeline(config, &library).context("Failed to build pipeline")?;
    Ok((library, pipeline))
}

/// Validate command - build the pipeline and check its graph
fn validate_command(config: &Config) -> Result<()> {
    let (_, pipeline) = build(config)?;
    let order = pipeline.topological_order()?;

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Pipeline Validation".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("{} {}", "Pipeline:".bold(), pipeline.name().green());
    println!("{} {}", "Schedule:".bold(), pipeline.schedule());
    println!("{} {}", "Stages:".bold(), pipeline.len());
    println!("{} {}", "Fingerprint:".bold(), pipeline.fingerprint());
    println!("{} {} -> {}", "Sentinels:".bold(), order.first().unwrap_or(&"?"), order.last().unwrap_or(&"?"));
    println!();
    println!("{}", "✓ Pipeline is valid".green().bold());

    println!();
    println!("{}", "=".repeat(60).bright_blue());
    Ok(())
}

/// Plan command - stages in execution order with their dependencies
fn plan_command(config: &Config, run_date: Option<NaiveDate>, json: bool) -> Result<()> {
    let (_, pipeline) = build(config)?;
    let order = pipeline.topological_order()?;

    let sources = match run_date {
        Some(date) => {
            let context = RunContext::new(date);
            let staging = &config.staging;
            vec![
                ("staging_events", staging.events_key.render(&context)?),
                ("staging_songs", staging.songs_key.render(&context)?),
            ]
        }
        None => Vec::new(),
    };

    if json {
        let stages: Vec<serde_json::Value> = order
            .iter()
            .filter_map(|id| pipeline.stage(id))
            .map(|stage| {
                serde_json::json!({
                    "task_id": stage.task_id(),
                    "kind": stage.kind().as_str(),
                    "upstream": pipeline.upstream(stage.task_id()),
                    "retries": stage.retry_policy().retries,
                    "describe": stage.describe(),
                })
            })
            .collect();
        let sources: serde_json::Map<String, serde_json::Value> = sources
            .into_iter()
            .map(|(table, key)| {
                (
                    table.to_string(),
                    serde_json::Value::String(format!("s3://{}/{}", config.staging.bucket, key)),
                )
            })
            .collect();

        let plan = serde_json::json!({
            "pipeline": pipeline.name(),
            "fingerprint": pipeline.fingerprint(),
            "run_date": run_date.map(|d| d.to_string()),
            "sources": sources,
            "stages": stages,
        });
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Execution Plan".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("{} {}", "Pipeline:".bold(), pipeline.name().green());
    println!("{} {}", "Stages:".bold(), pipeline.len());
    println!();

    for (i, id) in order.iter().enumerate() {
        let Some(stage) = pipeline.stage(id) else {
            continue;
        };
        println!("  {}. {} [{}]", i + 1, id.yellow(), stage.kind());
        println!("     {}", stage.describe());
        let upstream = pipeline.upstream(id);
        if !upstream.is_empty() {
            println!("     after: {}", upstream.join(", "));
        }
    }

    if let Some(date) = run_date {
        println!();
        println!("{} {}", "Sources for".bold(), date);
        for (table, key) in &sources {
            println!("  {} <- s3://{}/{}", table, config.staging.bucket, key);
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
    Ok(())
}

/// Credential lookup order: environment first, then `[credentials]` in config
fn credential_chain(config: &Config) -> ChainCredentialProvider {
    ChainCredentialProvider::new()
        .with(EnvCredentialProvider::new())
        .with(StaticCredentialProvider::from_config(&config.credentials))
}

async fn connect(config: &Config, verbose: bool) -> Result<Arc<dyn WarehouseClient>> {
    let connection = match &config.warehouse.connection {
        Some(connection) => connection.clone(),
        None => std::env::var(WAREHOUSE_URL_ENV).map_err(|_| {
            anyhow::anyhow!(
                "No warehouse connection configured. Set [warehouse].connection in starload.toml \
                 or the {} environment variable.",
                WAREHOUSE_URL_ENV
            )
        })?,
    };

    if verbose {
        eprintln!("{} {:?} warehouse...", "Connecting to".cyan(), config.warehouse.flavor);
    }

    let warehouse = PostgresWarehouse::connect(&connection, config.warehouse.tls, config.warehouse.flavor)
        .await
        .context("Failed to connect to warehouse")?;
    warehouse
        .test_connection()
        .await
        .context("Warehouse connection test failed")?;

    if verbose {
        eprintln!("{}", "✓ Connection successful".green());
    }
    Ok(Arc::new(warehouse))
}

/// In-memory warehouse whose quality checks return their expected values
fn dry_run_warehouse(config: &Config) -> MockWarehouse {
    config
        .quality_checks
        .iter()
        .fold(MockWarehouse::new().with_name("DryRun"), |warehouse, check| {
            warehouse.with_rows(&check.sql, vec![vec![check.expected.clone()]])
        })
}

/// Run command - execute the pipeline once for a run context
async fn run_command(
    config: &Config,
    context: &RunContext,
    report_path: &Path,
    dry_run: bool,
    verbose: bool,
) -> Result<()> {
    let (_, pipeline) = build(config)?;
    tracing::info!(
        pipeline = %pipeline.name(),
        run_date = %context.run_date,
        dry_run,
        report = %report_path.display(),
        "run requested"
    );

    let mock = dry_run.then(|| dry_run_warehouse(config));
    let (warehouse, credentials): (Arc<dyn WarehouseClient>, Arc<dyn CredentialProvider>) = match &mock {
        Some(mock) => {
            let placeholder = StaticCredentialProvider::new().with(
                config.staging.credential_ref.as_str(),
                AwsCredentials::new("DRYRUNACCESSKEY", "dry-run-secret"),
            );
            (
                Arc::new(mock.clone()),
                Arc::new(credential_chain(config).with(placeholder)),
            )
        }
        None => (connect(config, verbose).await?, Arc::new(credential_chain(config))),
    };

    if verbose {
        eprintln!(
            "{} {} for {}...",
            "Running".cyan(),
            pipeline.name(),
            context.run_date
        );
    }

    let report = LocalScheduler::new(warehouse, credentials)
        .with_max_parallel(config.pipeline.max_parallel)
        .run(&pipeline, context)
        .await?;

    report
        .save_to_file(report_path)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), report_path.display());
    }

    if let Some(mock) = &mock {
        println!("{}", "Dry run statements:".bold());
        for sql in mock.executed().await {
            println!("  {}", sql.lines().next().unwrap_or_default().dimmed());
        }
    }

    print_run_summary(&report);

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Pipeline Run Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Pipeline: {}", report.pipeline);
    println!("Run date: {}", report.context.run_date);
    if let Some(run_id) = &report.context.run_id {
        println!("Run id: {}", run_id);
    }
    println!("Started: {}", report.started_at);
    println!();

    println!("{}", "Summary:".bold());
    println!("  Stages:    {}", report.summary.total);
    println!("  Succeeded: {}", format!("{}", report.summary.succeeded).green());
    if report.summary.failed > 0 {
        println!("  Failed:    {}", format!("{}", report.summary.failed).red().bold());
    } else {
        println!("  Failed:    {}", format!("{}", report.summary.failed).green());
    }
    if report.summary.upstream_failed > 0 {
        println!("  Skipped:   {}", format!("{}", report.summary.upstream_failed).yellow());
    }
    println!("  Retries:   {}", report.summary.retries);
    println!();

    for stage in &report.stages {
        let outcome = match stage.outcome {
            StageOutcome::Succeeded => "OK".green().bold(),
            StageOutcome::Failed => "FAILED".red().bold(),
            StageOutcome::UpstreamFailed => "SKIPPED".yellow(),
        };
        println!("  [{}] {} ({} attempts)", outcome, stage.task_id, stage.attempts);
        if stage.outcome == StageOutcome::Failed {
            if let Some(error) = &stage.error {
                println!("    {}", error);
            }
        }
    }

    println!();
    if report.is_success() {
        println!("{}", "✓ Run succeeded".green().bold());
    } else {
        println!("{}", "✗ Run failed".red().bold());
    }
    println!("{}", "=".repeat(60).bright_blue());
}

/// Bootstrap command - create tables from the DDL entries
async fn bootstrap_command(config: &Config, print: bool, verbose: bool) -> Result<()> {
    let library = SqlLibrary::with_overrides(&config.sql).context("Invalid [sql] overrides")?;
    let ddl = library.ddl()?;

    if print {
        for (name, sql) in &ddl {
            println!("-- {}\n{};\n", name, sql.trim());
        }
        return Ok(());
    }

    let warehouse = connect(config, verbose).await?;
    for (name, sql) in &ddl {
        if verbose {
            eprintln!("  {} {}...", "Creating".cyan(), name);
        }
        warehouse
            .execute(sql)
            .await
            .with_context(|| format!("Failed to run {}", name))?;
    }

    println!("{} {} tables created", "✓".green(), ddl.len());
    Ok(())
}

/// Lint command - parse library entries and quality checks
fn lint_command(config: &Config) -> Result<()> {
    let library = SqlLibrary::with_overrides(&config.sql).context("Invalid [sql] overrides")?;
    let parser = SqlParser::for_flavor(config.warehouse.flavor);

    let mut findings = parser.lint_library(&library);
    for (i, check) in config.quality_checks.iter().enumerate() {
        if let Some(finding) = parser.lint(&format!("quality_checks[{}]", i), &check.sql, true) {
            findings.push(finding);
        }
    }

    let checked = library.len() + config.quality_checks.len();
    if findings.is_empty() {
        println!("{} {} statements parsed cleanly", "✓".green(), checked);
        return Ok(());
    }

    for finding in &findings {
        println!("  [{}] {}: {}", "ERROR".red().bold(), finding.name, finding.message);
    }
    println!();
    println!("{} of {} statements failed lint", findings.len().to_string().red(), checked);
    std::process::exit(1);
}

/// Sql command - print one entry or list all of them
fn sql_command(config: &Config, name: Option<&str>) -> Result<()> {
    let library = SqlLibrary::with_overrides(&config.sql).context("Invalid [sql] overrides")?;

    match name {
        Some(name) => println!("{}", library.get(name)?.trim()),
        None => {
            for name in library.names() {
                let marker = if config.sql.contains_key(name) {
                    " (overridden)".yellow().to_string()
                } else {
                    String::new()
                };
                println!("{}{}", name, marker);
            }
        }
    }
    Ok(())
}
