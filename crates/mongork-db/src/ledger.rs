//! Migration ledger stored in a MongoDB collection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::IndexOptions;
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use mongork_core::{Error, LedgerEntry, MigrationStore, Result, UnitOfWork};

use crate::context::MongoContext;

/// Name of the unique index on `version`.
pub const VERSION_INDEX: &str = "version_1";

pub(crate) fn entry_to_document(entry: &LedgerEntry) -> Document {
    let mut document = doc! {
        "version": &entry.version,
        "description": &entry.description,
        "applied_at": bson::DateTime::from_chrono(entry.applied_at),
        "checksum": &entry.checksum,
    };
    if entry.forced {
        document.insert("forced", true);
    }
    document
}

pub(crate) fn document_to_entry(document: &Document) -> Result<LedgerEntry> {
    let field = |name: &str| {
        document
            .get_str(name)
            .map(str::to_string)
            .map_err(|_| Error::Serialization(format!("ledger entry missing string field {name}")))
    };

    let applied_at = match document.get("applied_at") {
        Some(Bson::DateTime(at)) => at.to_chrono(),
        _ => {
            return Err(Error::Serialization(
                "ledger entry missing applied_at".to_string(),
            ))
        }
    };

    Ok(LedgerEntry {
        version: field("version")?,
        description: field("description")?,
        applied_at,
        checksum: field("checksum").unwrap_or_default(),
        forced: document.get_bool("forced").unwrap_or(false),
    })
}

/// [`MigrationStore`] over the `schema_migrations` collection.
#[derive(Clone)]
pub struct MongoMigrationStore {
    client: Client,
    collection: Collection<Document>,
    context: MongoContext,
}

impl MongoMigrationStore {
    pub fn new(client: Client, database: Database, collection: &str) -> Self {
        Self {
            collection: database.collection(collection),
            context: MongoContext::new(database),
            client,
        }
    }

    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }

    /// Create the unique index on `version`. Must run outside a transaction.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let mut options = IndexOptions::default();
        options.name = Some(VERSION_INDEX.to_string());
        options.unique = Some(true);

        let model = IndexModel::builder()
            .keys(doc! { "version": 1 })
            .options(options)
            .build();
        if let Err(e) = self.collection.create_index(model).await {
            let err = Error::from(e);
            if !err.is_index_conflict() {
                return Err(err);
            }
            warn!(
                subsystem = "migration",
                component = "ledger",
                collection = %self.collection.name(),
                error = %err,
                "Existing version index kept"
            );
        }
        debug!(
            subsystem = "migration",
            component = "ledger",
            collection = %self.collection.name(),
            "Ledger indexes ensured"
        );
        Ok(())
    }

    async fn find_all(&self, sort: Option<Document>) -> Result<Vec<LedgerEntry>> {
        let cursor = match sort {
            Some(sort) => self.collection.find(doc! {}).sort(sort).await?,
            None => self.collection.find(doc! {}).await?,
        };
        let documents: Vec<Document> = cursor.try_collect().await?;
        documents.iter().map(document_to_entry).collect()
    }
}

#[async_trait]
impl MigrationStore for MongoMigrationStore {
    type Db = MongoContext;
    type Unit = MongoUnitOfWork;

    async fn applied(&self) -> Result<HashMap<String, LedgerEntry>> {
        let entries = self.find_all(None).await?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.version.clone(), entry))
            .collect())
    }

    async fn find(&self, version: &str) -> Result<Option<LedgerEntry>> {
        self.collection
            .find_one(doc! { "version": version })
            .await?
            .as_ref()
            .map(document_to_entry)
            .transpose()
    }

    async fn list_applied(&self) -> Result<Vec<LedgerEntry>> {
        self.find_all(Some(doc! { "applied_at": -1, "version": -1 }))
            .await
    }

    async fn insert(&self, entry: &LedgerEntry) -> Result<()> {
        self.collection
            .insert_one(entry_to_document(entry))
            .await?;
        Ok(())
    }

    async fn remove(&self, version: &str) -> Result<()> {
        self.collection
            .delete_one(doc! { "version": version })
            .await?;
        Ok(())
    }

    fn db(&self) -> &MongoContext {
        &self.context
    }

    #[instrument(skip(self), fields(subsystem = "migration", component = "ledger", op = "begin"))]
    async fn begin(&self) -> Result<MongoUnitOfWork> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        let session = Arc::new(Mutex::new(session));

        Ok(MongoUnitOfWork {
            context: MongoContext::with_session(
                self.context.database().clone(),
                Arc::clone(&session),
            ),
            collection: self.collection.clone(),
            session,
        })
    }
}

/// One open transaction on the ledger's client.
pub struct MongoUnitOfWork {
    context: MongoContext,
    collection: Collection<Document>,
    session: Arc<Mutex<ClientSession>>,
}

#[async_trait]
impl UnitOfWork for MongoUnitOfWork {
    type Db = MongoContext;

    fn db(&self) -> &MongoContext {
        &self.context
    }

    async fn insert(&self, entry: &LedgerEntry) -> Result<()> {
        let mut session = self.session.lock().await;
        self.collection
            .insert_one(entry_to_document(entry))
            .session(&mut *session)
            .await?;
        Ok(())
    }

    async fn remove(&self, version: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        self.collection
            .delete_one(doc! { "version": version })
            .session(&mut *session)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.session.lock().await.commit_transaction().await?;
        Ok(())
    }

    async fn abort(self) -> Result<()> {
        self.session.lock().await.abort_transaction().await?;
        Ok(())
    }
}
