//! Index helpers for step authors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use tracing::info;

use mongork_core::Result;

/// Declarative index definition.
///
/// ```rust,ignore
/// let spec = IndexSpec::new()
///     .asc("tenant_id")
///     .desc("created_at")
///     .name("tenant_recent")
///     .unique();
/// create_indexes(ctx.database(), "orders", &[spec]).await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    keys: Document,
    name: Option<String>,
    unique: bool,
    sparse: bool,
    ttl: Option<Duration>,
    partial_filter: Option<Document>,
}

impl IndexSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, field: &str) -> Self {
        self.keys.insert(field, 1);
        self
    }

    pub fn desc(mut self, field: &str) -> Self {
        self.keys.insert(field, -1);
        self
    }

    pub fn text(mut self, field: &str) -> Self {
        self.keys.insert(field, "text");
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Expire documents `ttl` after the indexed date field.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn partial(mut self, filter: Document) -> Self {
        self.partial_filter = Some(filter);
        self
    }

    pub fn keys(&self) -> &Document {
        &self.keys
    }

    /// Explicit name, or the server's default `field_1_other_-1` form.
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(field, direction)| match direction {
                Bson::Int32(n) => format!("{field}_{n}"),
                Bson::String(s) => format!("{field}_{s}"),
                other => format!("{field}_{other}"),
            })
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn to_model(&self) -> IndexModel {
        self.to_model_named(&IndexNaming::default())
    }

    /// Model whose name has been passed through `naming`.
    pub fn to_model_named(&self, naming: &IndexNaming) -> IndexModel {
        let mut options = IndexOptions::default();
        options.name = Some(naming.apply(&self.index_name()));
        if self.unique {
            options.unique = Some(true);
        }
        if self.sparse {
            options.sparse = Some(true);
        }
        options.expire_after = self.ttl;
        options.partial_filter_expression = self.partial_filter.clone();

        IndexModel::builder()
            .keys(self.keys.clone())
            .options(options)
            .build()
    }
}

type Rename = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Rewrites index names at creation time, e.g. to namespace them per tenant.
///
/// The rename runs first, then the prefix and suffix are added. Explicit and
/// generated names are treated alike.
#[derive(Clone, Default)]
pub struct IndexNaming {
    prefix: String,
    suffix: String,
    rename: Option<Rename>,
}

impl fmt::Debug for IndexNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexNaming")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("rename", &self.rename.is_some())
            .finish()
    }
}

impl IndexNaming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn rename<F>(mut self, rename: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.rename = Some(Arc::new(rename));
        self
    }

    pub fn apply(&self, name: &str) -> String {
        let base = match &self.rename {
            Some(rename) => rename(name),
            None => name.to_string(),
        };
        format!("{}{}{}", self.prefix, base, self.suffix)
    }
}

/// Create every index in `specs` on `collection`. Returns the index names.
pub async fn create_indexes(
    database: &Database,
    collection: &str,
    specs: &[IndexSpec],
) -> Result<Vec<String>> {
    create_indexes_named(database, collection, specs, &IndexNaming::default()).await
}

/// Like [`create_indexes`], with every name rewritten by `naming`.
pub async fn create_indexes_named(
    database: &Database,
    collection: &str,
    specs: &[IndexSpec],
    naming: &IndexNaming,
) -> Result<Vec<String>> {
    if specs.is_empty() {
        return Ok(Vec::new());
    }
    let result = database
        .collection::<Document>(collection)
        .create_indexes(specs.iter().map(|spec| spec.to_model_named(naming)))
        .await?;
    info!(
        subsystem = "migration",
        component = "indexes",
        op = "create",
        collection,
        index_count = result.index_names.len(),
        "Indexes created"
    );
    Ok(result.index_names)
}

pub async fn drop_index(database: &Database, collection: &str, name: &str) -> Result<()> {
    database
        .collection::<Document>(collection)
        .drop_index(name)
        .await?;
    info!(
        subsystem = "migration",
        component = "indexes",
        op = "drop",
        collection,
        index = name,
        "Index dropped"
    );
    Ok(())
}
