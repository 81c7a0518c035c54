//! Warehouse and credential collaborators
//!
//! The stages only ever see the [`WarehouseClient`] and [`CredentialProvider`]
//! traits; concrete clients are injected per execution.
//!
//! ## Features
//!
//! Enable warehouse support via Cargo features:
//! - `postgres` - PostgreSQL/Redshift support
//!
//! ## Example
//!
//! ```rust,ignore
//! use starload_warehouse::{PostgresWarehouse, WarehouseClient};
//! use starload_core::WarehouseFlavor;
//!
//! let warehouse = PostgresWarehouse::connect(
//!     "host=cluster.example.com port=5439 dbname=dev user=awsuser password=secret",
//!     true,
//!     WarehouseFlavor::Redshift,
//! ).await?;
//! let rows = warehouse.query("SELECT COUNT(*) FROM songplays").await?;
//! ```

pub mod client;
pub mod credentials;
pub mod mock;
pub mod postgres;

pub use client::{AtomicBatchError, WarehouseClient, WarehouseError};
pub use credentials::{
    AwsCredentials, ChainCredentialProvider, CredentialError, CredentialProvider,
    EnvCredentialProvider, StaticCredentialProvider,
};
pub use mock::{CallKind, MockCall, MockWarehouse};
pub use postgres::PostgresWarehouse;
