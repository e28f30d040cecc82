//! Distributed migration lock backed by a single document.
//!
//! The lock collection carries a unique index on `lock_id`, so at most one
//! token can exist, and a TTL index on `acquired_at`, so a token left by a
//! crashed holder is eventually removed by the server's TTL monitor.

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use mongork_core::{defaults, Error, ExclusiveLock, LockToken, Result};

/// Index names match the server defaults, so a lock collection set up by
/// earlier tooling with unnamed indexes is reused as is.
pub const LOCK_ID_INDEX: &str = "lock_id_1";
pub const TTL_INDEX: &str = "acquired_at_1";

pub struct MongoLock {
    database: Database,
    collection: Collection<Document>,
    ttl: Duration,
    indexes: OnceCell<()>,
}

impl MongoLock {
    pub fn new(database: &Database, collection: &str, ttl: Duration) -> Self {
        Self {
            database: database.clone(),
            collection: database.collection(collection),
            ttl,
            indexes: OnceCell::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn ensure_indexes(&self) -> Result<()> {
        self.indexes
            .get_or_try_init(|| async {
                self.ensure_unique_index().await?;
                self.ensure_ttl_index().await?;
                debug!(
                    subsystem = "migration",
                    component = "lock",
                    ttl_secs = self.ttl.as_secs(),
                    "Lock indexes ensured"
                );
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// A conflicting index is acceptable only if it still makes `lock_id`
    /// unique; otherwise two runs could both insert a token.
    async fn ensure_unique_index(&self) -> Result<()> {
        let mut options = IndexOptions::default();
        options.name = Some(LOCK_ID_INDEX.to_string());
        options.unique = Some(true);
        let model = IndexModel::builder()
            .keys(doc! { "lock_id": 1 })
            .options(options)
            .build();

        let err = match self.collection.create_index(model).await {
            Ok(_) => return Ok(()),
            Err(e) => Error::from(e),
        };
        if !err.is_index_conflict() {
            return Err(err);
        }

        let indexes: Vec<IndexModel> = self.collection.list_indexes().await?.try_collect().await?;
        if !has_unique_lock_index(&indexes) {
            return Err(Error::Config(format!(
                "{} has an index on lock_id that is not unique: {}",
                self.collection.name(),
                err
            )));
        }
        warn!(
            subsystem = "migration",
            component = "lock",
            collection = self.collection.name(),
            error = %err,
            "Existing unique lock_id index kept"
        );
        Ok(())
    }

    async fn ensure_ttl_index(&self) -> Result<()> {
        let mut options = IndexOptions::default();
        options.name = Some(TTL_INDEX.to_string());
        options.expire_after = Some(self.ttl);
        let model = IndexModel::builder()
            .keys(doc! { "acquired_at": 1 })
            .options(options)
            .build();

        let err = match self.collection.create_index(model).await {
            Ok(_) => return Ok(()),
            Err(e) => Error::from(e),
        };
        if !err.is_index_conflict() {
            return Err(err);
        }

        // Usually a TTL configured differently by a previous run.
        let command = doc! {
            "collMod": self.collection.name(),
            "index": {
                "keyPattern": { "acquired_at": 1 },
                "expireAfterSeconds": self.ttl.as_secs() as i64,
            },
        };
        match self.database.run_command(command).await {
            Ok(_) => info!(
                subsystem = "migration",
                component = "lock",
                collection = self.collection.name(),
                ttl_secs = self.ttl.as_secs(),
                "Lock TTL index updated"
            ),
            Err(e) => warn!(
                subsystem = "migration",
                component = "lock",
                collection = self.collection.name(),
                conflict = %err,
                error = %e,
                "Could not update lock TTL index, stale tokens may need force-unlock"
            ),
        }
        Ok(())
    }
}

fn has_unique_lock_index(indexes: &[IndexModel]) -> bool {
    indexes.iter().any(|index| {
        index.keys == doc! { "lock_id": 1 }
            && index
                .options
                .as_ref()
                .and_then(|o| o.unique)
                .unwrap_or(false)
    })
}

fn token_to_document(token: &LockToken) -> Document {
    doc! {
        "lock_id": &token.lock_id,
        "acquired_at": bson::DateTime::from_chrono(token.acquired_at),
        "owner": &token.owner,
    }
}

fn document_to_token(document: &Document) -> Result<LockToken> {
    let acquired_at = match document.get("acquired_at") {
        Some(Bson::DateTime(at)) => at.to_chrono(),
        _ => {
            return Err(Error::Serialization(
                "lock token missing acquired_at".to_string(),
            ))
        }
    };
    Ok(LockToken {
        lock_id: document
            .get_str("lock_id")
            .map_err(|_| Error::Serialization("lock token missing lock_id".to_string()))?
            .to_string(),
        acquired_at,
        owner: document.get_str("owner").unwrap_or_default().to_string(),
    })
}

#[async_trait]
impl ExclusiveLock for MongoLock {
    #[instrument(skip(self), fields(subsystem = "migration", component = "lock", op = "acquire"))]
    async fn acquire(&self) -> Result<LockToken> {
        self.ensure_indexes().await?;

        let token = LockToken {
            lock_id: defaults::LOCK_ID.to_string(),
            acquired_at: Utc::now(),
            owner: Uuid::new_v4().to_string(),
        };
        match self
            .collection
            .insert_one(token_to_document(&token))
            .await
        {
            Ok(_) => {
                info!(owner = %token.owner, "Migration lock acquired");
                Ok(token)
            }
            Err(e) => {
                let err = Error::from(e);
                if err.is_duplicate_key() {
                    Err(Error::LockContention)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn release(&self) -> Result<()> {
        let result = self
            .collection
            .delete_one(doc! { "lock_id": defaults::LOCK_ID })
            .await?;
        debug!(
            subsystem = "migration",
            component = "lock",
            op = "release",
            deleted = result.deleted_count,
            "Lock token deleted"
        );
        Ok(())
    }

    async fn holder(&self) -> Result<Option<LockToken>> {
        self.collection
            .find_one(doc! { "lock_id": defaults::LOCK_ID })
            .await?
            .as_ref()
            .map(document_to_token)
            .transpose()
    }
}
