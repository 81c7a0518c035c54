//! PostgreSQL / Redshift warehouse client
//!
//! Works with:
//! - PostgreSQL 9.4+ (transactional DDL)
//! - Amazon Redshift (`TRUNCATE` commits implicitly, so truncate-insert
//!   pairs are not atomic)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let warehouse = PostgresWarehouse::connect(
//!     "host=localhost port=5432 dbname=sparkify user=etl password=secret",
//!     false,
//!     WarehouseFlavor::Postgres,
//! ).await?;
//!
//! warehouse.execute("TRUNCATE TABLE users").await?;
//! let rows = warehouse.query("SELECT COUNT(*) FROM users").await?;
//! ```

use crate::client::{AtomicBatchError, WarehouseClient, WarehouseError};
use starload_core::{Row, WarehouseFlavor};

#[cfg(feature = "postgres")]
use starload_core::Value;

#[cfg(feature = "postgres")]
use tokio_postgres::{config::Host, types::Type, Client, Config as PgConfig, NoTls};

#[cfg(feature = "postgres")]
use postgres_native_tls::MakeTlsConnector;

#[cfg(feature = "postgres")]
use native_tls::TlsConnector;

#[cfg(not(feature = "postgres"))]
const NOT_COMPILED: &str =
    "PostgreSQL/Redshift support not compiled. Rebuild with: cargo build --features postgres";

/// PostgreSQL / Redshift warehouse client
pub struct PostgresWarehouse {
    /// Single connection; statements from concurrent stages are serialized
    #[cfg(feature = "postgres")]
    client: tokio::sync::Mutex<Client>,

    flavor: WarehouseFlavor,

    #[cfg(feature = "postgres")]
    host: String,

    #[cfg(feature = "postgres")]
    port: u16,

    #[cfg(feature = "postgres")]
    database: String,
}

impl PostgresWarehouse {
    /// Connect using a libpq-style connection string
    ///
    /// # Arguments
    ///
    /// * `conn_str` - e.g. `host=... port=5439 dbname=dev user=... password=...`
    /// * `tls` - connect through native-tls
    /// * `flavor` - decides whether truncate-insert can run in a transaction
    #[cfg(feature = "postgres")]
    pub async fn connect(
        conn_str: &str,
        tls: bool,
        flavor: WarehouseFlavor,
    ) -> Result<Self, WarehouseError> {
        let config: PgConfig = conn_str
            .parse()
            .map_err(|e| WarehouseError::ConfigError(format!("Invalid connection string: {}", e)))?;

        let host = match config.get_hosts().first() {
            Some(Host::Tcp(host)) => host.clone(),
            Some(other) => format!("{:?}", other),
            None => "localhost".to_string(),
        };
        let port = config
            .get_ports()
            .first()
            .copied()
            .unwrap_or(default_port(flavor));
        let database = config.get_dbname().unwrap_or("postgres").to_string();
        let label = format!("{}:{}/{}", host, port, database);

        let client = if tls {
            let connector = TlsConnector::builder().build().map_err(|e| {
                WarehouseError::ConfigError(format!("Failed to create TLS connector: {}", e))
            })?;

            let (client, connection) = config
                .connect(MakeTlsConnector::new(connector))
                .await
                .map_err(|e| {
                    WarehouseError::ConnectionError(format!(
                        "Failed to connect to {} with TLS: {}",
                        label, e
                    ))
                })?;
            spawn_connection(connection, label.clone());
            client
        } else {
            let (client, connection) = config.connect(NoTls).await.map_err(|e| {
                WarehouseError::ConnectionError(format!("Failed to connect to {}: {}", label, e))
            })?;
            spawn_connection(connection, label.clone());
            client
        };

        tracing::info!(warehouse = %label, ?flavor, tls, "connected to warehouse");

        Ok(Self {
            client: tokio::sync::Mutex::new(client),
            flavor,
            host,
            port,
            database,
        })
    }

    /// Connect without postgres feature (returns error)
    #[cfg(not(feature = "postgres"))]
    pub async fn connect(
        _conn_str: &str,
        _tls: bool,
        _flavor: WarehouseFlavor,
    ) -> Result<Self, WarehouseError> {
        Err(WarehouseError::ConfigError(NOT_COMPILED.to_string()))
    }

    pub fn flavor(&self) -> WarehouseFlavor {
        self.flavor
    }

    #[cfg(feature = "postgres")]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[cfg(feature = "postgres")]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[cfg(feature = "postgres")]
    pub fn database(&self) -> &str {
        &self.database
    }
}

/// Default port for a flavour
pub fn default_port(flavor: WarehouseFlavor) -> u16 {
    match flavor {
        WarehouseFlavor::Redshift => 5439,
        WarehouseFlavor::Postgres => 5432,
    }
}

#[cfg(feature = "postgres")]
fn spawn_connection<F>(connection: F, label: String)
where
    F: std::future::Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(warehouse = %label, error = %e, "warehouse connection error");
        }
    });
}

#[cfg(feature = "postgres")]
fn map_pg_error(e: tokio_postgres::Error) -> WarehouseError {
    if let Some(db) = e.as_db_error() {
        return WarehouseError::from_message(db.message());
    }
    if e.is_closed() {
        return WarehouseError::ConnectionError(e.to_string());
    }
    WarehouseError::from_message(e.to_string())
}

#[cfg(feature = "postgres")]
fn decode_row(row: &tokio_postgres::Row) -> Result<Row, WarehouseError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| decode_cell(row, idx, column.name(), column.type_()))
        .collect()
}

/// Decode one cell; NULL of any supported type becomes `Value::Null`
#[cfg(feature = "postgres")]
fn decode_cell(
    row: &tokio_postgres::Row,
    idx: usize,
    name: &str,
    ty: &Type,
) -> Result<Value, WarehouseError> {
    let decoded = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).map(|v| v.map(Value::Bool))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx).map(|v| v.map(|n| Value::Int(n.into())))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx).map(|v| v.map(|n| Value::Int(n.into())))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::Int))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx).map(|v| v.map(|n| Value::Float(n.into())))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(|v| v.map(Value::Float))
    } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME].contains(ty) {
        row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::Text))
    } else {
        return Err(WarehouseError::UnsupportedType(format!(
            "column '{}' has type {}; cast it to bigint, double precision or varchar",
            name, ty
        )));
    };

    decoded
        .map(|v| v.unwrap_or(Value::Null))
        .map_err(|e| WarehouseError::QueryError(format!("column '{}': {}", name, e)))
}

#[cfg(feature = "postgres")]
#[async_trait::async_trait]
impl WarehouseClient for PostgresWarehouse {
    fn name(&self) -> &'static str {
        match self.flavor {
            WarehouseFlavor::Redshift => "Redshift",
            WarehouseFlavor::Postgres => "PostgreSQL",
        }
    }

    async fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        let client = self.client.lock().await;
        client.batch_execute(sql).await.map_err(map_pg_error)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        let client = self.client.lock().await;
        let rows = client.query(sql, &[]).await.map_err(map_pg_error)?;
        rows.iter().map(decode_row).collect()
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.flavor == WarehouseFlavor::Postgres
    }

    async fn execute_atomic(&self, statements: &[String]) -> Result<(), AtomicBatchError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await.map_err(|e| AtomicBatchError {
            statement: None,
            source: map_pg_error(e),
        })?;

        for (index, sql) in statements.iter().enumerate() {
            // Dropping the transaction on error rolls it back
            transaction
                .batch_execute(sql)
                .await
                .map_err(|e| AtomicBatchError {
                    statement: Some(index),
                    source: map_pg_error(e),
                })?;
        }

        transaction.commit().await.map_err(|e| AtomicBatchError {
            statement: None,
            source: map_pg_error(e),
        })
    }
}

#[cfg(not(feature = "postgres"))]
#[async_trait::async_trait]
impl WarehouseClient for PostgresWarehouse {
    fn name(&self) -> &'static str {
        "PostgreSQL (disabled)"
    }

    async fn execute(&self, _sql: &str) -> Result<(), WarehouseError> {
        Err(WarehouseError::ConfigError(NOT_COMPILED.to_string()))
    }

    async fn query(&self, _sql: &str) -> Result<Vec<Row>, WarehouseError> {
        Err(WarehouseError::ConfigError(NOT_COMPILED.to_string()))
    }

    async fn execute_atomic(&self, _statements: &[String]) -> Result<(), AtomicBatchError> {
        Err(AtomicBatchError {
            statement: None,
            source: WarehouseError::ConfigError(NOT_COMPILED.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        assert_eq!(default_port(WarehouseFlavor::Redshift), 5439);
        assert_eq!(default_port(WarehouseFlavor::Postgres), 5432);
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn connect_without_feature() {
        let result = PostgresWarehouse::connect("host=localhost", false, WarehouseFlavor::Postgres).await;
        assert!(matches!(result, Err(WarehouseError::ConfigError(_))));
    }

    #[cfg(feature = "postgres")]
    #[tokio::test]
    async fn rejects_malformed_connection_string() {
        let result = PostgresWarehouse::connect("host=localhost port=notaport", false, WarehouseFlavor::Postgres).await;
        assert!(matches!(result, Err(WarehouseError::ConfigError(_))));
    }
}
