//! Operation log access: legacy oplog queries and change streams.

use std::time::Instant;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::change_stream::event::ResumeToken;
use mongodb::change_stream::ChangeStream;
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use mongodb::{Client, Collection};
use tracing::{debug, info, warn};

use mongork_core::error::{server_code, RESUME_POINT_LOST_CODES};
use mongork_core::{
    defaults, ChangeFeed, ChangeSource, Error, Result, WatchRequest, WatchScope,
};

/// Serialize a driver resume token into the bytes persisted between sessions.
pub fn encode_token(token: &ResumeToken) -> Result<Vec<u8>> {
    match bson::to_bson(token)? {
        Bson::Document(document) => Ok(bson::to_vec(&document)?),
        other => Err(Error::Serialization(format!(
            "resume token is not a document: {other}"
        ))),
    }
}

/// Inverse of [`encode_token`].
pub fn decode_token(bytes: &[u8]) -> Result<ResumeToken> {
    let document: Document = bson::from_slice(bytes)?;
    Ok(bson::from_bson(Bson::Document(document))?)
}

/// Map driver failures on an open or opening stream.
fn stream_error(err: mongodb::error::Error) -> Error {
    match server_code(&err) {
        Some(code) if RESUME_POINT_LOST_CODES.contains(&code) => {
            Error::ResumePointLost(err.to_string())
        }
        _ => Error::StreamDisconnected(err.to_string()),
    }
}

/// [`ChangeSource`] over a MongoDB deployment.
#[derive(Clone)]
pub struct MongoChangeSource {
    client: Client,
}

impl MongoChangeSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The replication log collection, preferring replica-set naming.
    async fn oplog_collection(&self) -> Result<Collection<Document>> {
        let local = self.client.database(defaults::OPLOG_DATABASE);
        let names = local.list_collection_names().await?;

        [defaults::OPLOG_COLLECTION, defaults::OPLOG_COLLECTION_LEGACY]
            .into_iter()
            .find(|candidate| names.iter().any(|n| n == candidate))
            .map(|name| local.collection(name))
            .ok_or(Error::OplogSourceNotFound)
    }
}

#[async_trait]
impl ChangeSource for MongoChangeSource {
    async fn query_log(&self, filter: Document, limit: Option<i64>) -> Result<Vec<Document>> {
        let start = Instant::now();
        let oplog = self.oplog_collection().await?;

        let find = oplog.find(filter).sort(doc! { "ts": -1 });
        let cursor = match limit {
            Some(limit) => find.limit(limit).await?,
            None => find.await?,
        };
        let entries: Vec<Document> = cursor.try_collect().await?;

        debug!(
            subsystem = "oplog",
            component = "source",
            op = "query",
            collection = %oplog.name(),
            result_count = entries.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Oplog query complete"
        );
        Ok(entries)
    }

    async fn watch(&self, request: WatchRequest) -> Result<Box<dyn ChangeFeed>> {
        let mut options = ChangeStreamOptions::default();
        if request.full_document {
            options.full_document = Some(FullDocumentType::UpdateLookup);
        }
        if let Some(bytes) = &request.resume_after {
            options.resume_after = Some(decode_token(bytes)?);
        } else if let Some(at) = request.start_at {
            options.start_at_operation_time = Some(at);
        }

        let stream = match &request.scope {
            WatchScope::Deployment => {
                self.client
                    .watch()
                    .pipeline(request.pipeline)
                    .with_options(options)
                    .await
            }
            WatchScope::Collection {
                database,
                collection,
            } => {
                self.client
                    .database(database)
                    .collection::<Document>(collection)
                    .watch()
                    .pipeline(request.pipeline)
                    .with_options(options)
                    .await
            }
        }
        .map_err(stream_error)?;

        info!(
            subsystem = "oplog",
            component = "source",
            op = "watch",
            scope = ?request.scope,
            "Change stream opened"
        );
        Ok(Box::new(MongoChangeFeed {
            stream: stream.with_type::<Document>(),
            token: None,
        }))
    }
}

/// Open change stream yielding raw event documents.
pub struct MongoChangeFeed {
    stream: ChangeStream<Document>,
    token: Option<Vec<u8>>,
}

#[async_trait]
impl ChangeFeed for MongoChangeFeed {
    async fn next_change(&mut self) -> Result<Option<Document>> {
        match self.stream.next().await {
            Some(Ok(event)) => {
                self.token = match self.stream.resume_token() {
                    Some(token) => Some(encode_token(&token)?),
                    None => {
                        warn!(
                            subsystem = "oplog",
                            component = "source",
                            "Change event arrived without a resume token"
                        );
                        None
                    }
                };
                Ok(Some(event))
            }
            Some(Err(e)) => Err(stream_error(e)),
            None => Ok(None),
        }
    }

    fn resume_token(&self) -> Option<Vec<u8>> {
        self.token.clone()
    }
}
