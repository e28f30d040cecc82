//! Step handle for MongoDB migrations.

use std::sync::Arc;

use bson::Document;
use mongodb::{ClientSession, Collection, Database};
use tokio::sync::Mutex;

use mongork_core::Result;

/// What a step body receives as its `db` argument.
///
/// When the engine runs a step inside a transaction the context carries the
/// session, and every helper below joins it. Steps that need a driver call
/// not covered here can use [`MongoContext::session`] directly.
#[derive(Clone)]
pub struct MongoContext {
    database: Database,
    session: Option<Arc<Mutex<ClientSession>>>,
}

impl MongoContext {
    /// Context without a session.
    pub fn new(database: Database) -> Self {
        Self {
            database,
            session: None,
        }
    }

    pub(crate) fn with_session(database: Database, session: Arc<Mutex<ClientSession>>) -> Self {
        Self {
            database,
            session: Some(session),
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }

    /// The open transaction's session, if any.
    pub fn session(&self) -> Option<&Arc<Mutex<ClientSession>>> {
        self.session.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.session.is_some()
    }

    pub async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        let coll = self.collection(collection);
        match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                coll.insert_one(document).session(&mut *session).await?;
            }
            None => {
                coll.insert_one(document).await?;
            }
        }
        Ok(())
    }

    pub async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let coll = self.collection(collection);
        match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                coll.insert_many(documents).session(&mut *session).await?;
            }
            None => {
                coll.insert_many(documents).await?;
            }
        }
        Ok(())
    }

    /// Returns the number of modified documents.
    pub async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<u64> {
        let coll = self.collection(collection);
        let result = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                coll.update_many(filter, update)
                    .session(&mut *session)
                    .await?
            }
            None => coll.update_many(filter, update).await?,
        };
        Ok(result.modified_count)
    }

    /// Returns the number of deleted documents.
    pub async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        let coll = self.collection(collection);
        let result = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                coll.delete_many(filter).session(&mut *session).await?
            }
            None => coll.delete_many(filter).await?,
        };
        Ok(result.deleted_count)
    }

    pub async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>> {
        let coll = self.collection(collection);
        let found = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                coll.find_one(filter).session(&mut *session).await?
            }
            None => coll.find_one(filter).await?,
        };
        Ok(found)
    }

    pub async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64> {
        let coll = self.collection(collection);
        let count = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                coll.count_documents(filter).session(&mut *session).await?
            }
            None => coll.count_documents(filter).await?,
        };
        Ok(count)
    }

    /// Run a database command.
    pub async fn run_command(&self, command: Document) -> Result<Document> {
        let reply = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                self.database
                    .run_command(command)
                    .session(&mut *session)
                    .await?
            }
            None => self.database.run_command(command).await?,
        };
        Ok(reply)
    }
}

impl std::fmt::Debug for MongoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoContext")
            .field("database", &self.database.name())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
