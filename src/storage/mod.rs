//! Persistence collaborator
//!
//! The engine only talks to storage through the [`MonitoringStore`] trait.
//!
//! ## Backends
//!
//! - **SQLite** (`storage-sqlite`, default): embedded database with migrations
//! - **In-memory**: no persistence, used when no backend is configured and in tests
//!
//! ## Usage
//!
//! ```no_run
//! use client_monitoring::storage::{MonitoringStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./monitoring.db").await?;
//!     let health = store.health_check().await?;
//!     println!("{}", health.message);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{MonitoringStore, StoreHealth, StoredReport};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
#[cfg(feature = "storage-sqlite")]
pub use sqlite::SqliteStore;
