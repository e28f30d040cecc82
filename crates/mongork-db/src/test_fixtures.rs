//! Test fixtures for MongoDB integration tests.
//!
//! Each [`TestDatabase`] gets a uniquely named database so tests can run in
//! parallel against one server. Transactions and change streams need a
//! replica set; a single-node one is enough.
//!
//! ## Configuration
//!
//! The server URL comes from `MONGO_URL`. If not set, defaults to
//! [`DEFAULT_TEST_MONGO_URL`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mongork_db::test_fixtures::TestDatabase;
//!
//! #[tokio::test]
//! #[ignore] // Requires database
//! async fn test_something() {
//!     let test_db = TestDatabase::new().await;
//!     let engine = test_db.db.engine(registry);
//!     // ...
//!     test_db.cleanup().await;
//! }
//! ```

use std::time::Duration;

use uuid::Uuid;

use crate::{Config, Database};

/// Default test server when MONGO_URL is not set.
///
/// Uses port 37017 and a single-node replica set named `rs0`.
pub const DEFAULT_TEST_MONGO_URL: &str = "mongodb://localhost:37017/?replicaSet=rs0&directConnection=true";

/// Test database with cleanup.
pub struct TestDatabase {
    pub db: Database,
    pub name: String,
}

impl TestDatabase {
    /// Connect and create a fresh, uniquely named database.
    pub async fn new() -> Self {
        let url = std::env::var("MONGO_URL").unwrap_or_else(|_| DEFAULT_TEST_MONGO_URL.to_string());
        let name = format!("mongork_test_{}", Uuid::new_v4().simple());

        let mut config = Config::new(&name).with_mongo_url(url);
        config.max_pool_size = 5;
        config.timeout = Duration::from_secs(10);
        config.release_grace = Duration::from_secs(2);

        let db = Database::connect(&config)
            .await
            .expect("Failed to connect to test MongoDB");
        Self { db, name }
    }

    /// Test config pointing at this database, for building extra stores.
    pub fn config(&self) -> &Config {
        self.db.config()
    }

    /// Drop the test database.
    pub async fn cleanup(self) {
        if let Err(e) = self.db.database.drop().await {
            eprintln!("Failed to drop test database {}: {}", self.name, e);
        }
    }
}

