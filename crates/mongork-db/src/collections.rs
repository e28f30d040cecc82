//! Collection helpers for step authors.

use bson::{doc, Document};
use mongodb::options::{
    CreateCollectionOptions, TimeseriesGranularity, TimeseriesOptions, ValidationAction,
    ValidationLevel,
};
use mongodb::Database;
use tracing::{debug, info};

use mongork_core::Result;

use crate::schema::SchemaBuilder;

/// Options applied when [`ensure_collection`] creates a collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionSpec {
    pub validator: Option<Document>,
    pub validation_level: Option<ValidationLevel>,
    pub validation_action: Option<ValidationAction>,
    /// Capped collection size in bytes.
    pub capped_size: Option<u64>,
    pub capped_max_documents: Option<u64>,
    pub timeseries: Option<TimeseriesOptions>,
}

impl CollectionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON-schema (or query-operator) validator.
    pub fn validator(mut self, validator: Document) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Validator built from a `$jsonSchema`.
    pub fn json_schema(self, schema: SchemaBuilder) -> Self {
        self.validator(schema.build())
    }

    pub fn validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = Some(level);
        self
    }

    pub fn validation_action(mut self, action: ValidationAction) -> Self {
        self.validation_action = Some(action);
        self
    }

    pub fn capped(mut self, size_bytes: u64, max_documents: Option<u64>) -> Self {
        self.capped_size = Some(size_bytes);
        self.capped_max_documents = max_documents;
        self
    }

    /// Time-series collection keyed on `time_field`, optionally grouped by
    /// `meta_field`. The server picks the bucket granularity when none is given.
    pub fn timeseries(
        mut self,
        time_field: impl Into<String>,
        meta_field: Option<String>,
        granularity: Option<TimeseriesGranularity>,
    ) -> Self {
        self.timeseries = Some(
            TimeseriesOptions::builder()
                .time_field(time_field.into())
                .meta_field(meta_field)
                .granularity(granularity)
                .build(),
        );
        self
    }

    pub(crate) fn to_options(&self) -> CreateCollectionOptions {
        let mut options = CreateCollectionOptions::default();
        options.validator = self.validator.clone();
        options.validation_level = self.validation_level.clone();
        options.validation_action = self.validation_action.clone();
        if let Some(size) = self.capped_size {
            options.capped = Some(true);
            options.size = Some(size);
            options.max = self.capped_max_documents;
        }
        options.timeseries = self.timeseries.clone();
        options
    }
}

pub async fn collection_exists(database: &Database, name: &str) -> Result<bool> {
    let names = database
        .list_collection_names()
        .filter(doc! { "name": name })
        .await?;
    Ok(!names.is_empty())
}

/// Create `name` with `spec` unless it already exists. Returns whether the
/// collection was created. An existing collection is left untouched, even
/// when its options differ from `spec`.
pub async fn ensure_collection(database: &Database, name: &str, spec: &CollectionSpec) -> Result<bool> {
    if collection_exists(database, name).await? {
        debug!(
            subsystem = "migration",
            component = "collections",
            collection = name,
            "Collection exists, skipping create"
        );
        return Ok(false);
    }

    database
        .create_collection(name)
        .with_options(spec.to_options())
        .await?;
    info!(
        subsystem = "migration",
        component = "collections",
        op = "create",
        collection = name,
        capped = spec.capped_size.is_some(),
        timeseries = spec.timeseries.is_some(),
        "Collection created"
    );
    Ok(true)
}

/// Drop `name` if it exists. Returns whether it existed.
pub async fn drop_collection(database: &Database, name: &str) -> Result<bool> {
    if !collection_exists(database, name).await? {
        return Ok(false);
    }
    database.collection::<Document>(name).drop().await?;
    info!(
        subsystem = "migration",
        component = "collections",
        op = "drop",
        collection = name,
        "Collection dropped"
    );
    Ok(true)
}
