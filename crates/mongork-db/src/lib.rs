//! # mongork-db
//!
//! MongoDB backends for mongork.
//!
//! This crate provides:
//! - Client construction from [`Config`]
//! - The migration ledger and its transactional unit of work
//! - The distributed migration lock
//! - Oplog queries and change streams for the tailer
//! - Collection, index, and `$jsonSchema` helpers for step authors
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mongork_db::{CancellationToken, Config, Database, StepRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect(&Config::from_env()?).await?;
//!
//!     let registry = StepRegistry::from_steps(my_steps())?;
//!     let report = db.engine(Arc::new(registry)).up(None, &CancellationToken::new()).await?;
//!     println!("{}", report.plan);
//!     Ok(())
//! }
//! ```
pub mod collections;
pub mod connection;
pub mod context;
pub mod indexes;
pub mod ledger;
pub mod lock;
pub mod oplog;
pub mod schema;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_MONGO_URL
pub mod test_fixtures;

use std::sync::Arc;

use tracing::info;

// Re-export core types
pub use mongork_core::*;

pub use collections::{collection_exists, drop_collection, ensure_collection, CollectionSpec};
pub use connection::{client_options, create_client, ping, LazyClient};
pub use context::MongoContext;
pub use indexes::{create_indexes, create_indexes_named, drop_index, IndexNaming, IndexSpec};
pub use ledger::{MongoMigrationStore, MongoUnitOfWork};
pub use lock::MongoLock;
pub use oplog::{MongoChangeFeed, MongoChangeSource};
pub use schema::{Property, SchemaBuilder};

/// Engine over the MongoDB backends.
pub type MongoEngine = MigrationEngine<MongoMigrationStore>;

/// Registry of steps that run against a [`MongoContext`].
pub type MongoRegistry = StepRegistry<MongoContext>;

/// Connected client plus the stores built on it.
#[derive(Clone)]
pub struct Database {
    /// The underlying driver client.
    pub client: mongodb::Client,
    /// Target database handle.
    pub database: mongodb::Database,
    /// Migration ledger.
    pub ledger: MongoMigrationStore,
    /// Migration lock.
    pub lock: Arc<MongoLock>,
    /// Oplog and change-stream source.
    pub oplog: MongoChangeSource,
    config: Config,
}

impl Database {
    /// Build the stores over an existing client. Does no I/O.
    pub fn new(client: mongodb::Client, config: Config) -> Self {
        let database = client.database(&config.database);
        Self {
            ledger: MongoMigrationStore::new(
                client.clone(),
                database.clone(),
                &config.migrations_collection,
            ),
            lock: Arc::new(MongoLock::new(
                &database,
                &config.lock_collection,
                config.lock_ttl,
            )),
            oplog: MongoChangeSource::new(client.clone()),
            database,
            client,
            config,
        }
    }

    /// Validate `config`, connect, and ensure the ledger indexes.
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate()?;
        let client = create_client(config).await?;
        Self::prepare(client, config.clone()).await
    }

    /// Like [`Database::connect`], sharing the client held by `lazy`.
    pub async fn from_lazy(lazy: &LazyClient) -> Result<Self> {
        lazy.config().validate()?;
        let client = lazy.get().await?.clone();
        Self::prepare(client, lazy.config().clone()).await
    }

    async fn prepare(client: mongodb::Client, config: Config) -> Result<Self> {
        let db = Self::new(client, config);
        db.ledger.ensure_indexes().await?;
        info!(
            subsystem = "database",
            component = "ledger",
            database = %db.config.database,
            ledger = %db.config.migrations_collection,
            lock = %db.config.lock_collection,
            "Migration stores ready"
        );
        Ok(db)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Step handle outside any transaction.
    pub fn context(&self) -> MongoContext {
        MongoContext::new(self.database.clone())
    }

    /// Migration engine over this database's ledger and lock.
    pub fn engine(&self, registry: Arc<MongoRegistry>) -> MongoEngine {
        MigrationEngine::new(self.ledger.clone(), self.lock.clone(), registry)
            .with_release_grace(self.config.release_grace)
    }

    /// Tailer over this deployment's operation log.
    pub fn tailer(&self) -> OplogTailer<MongoChangeSource> {
        OplogTailer::new(self.oplog.clone())
    }
}
