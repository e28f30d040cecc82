//! Filter criteria for oplog queries and change streams.
//!
//! One set of criteria produces two encodings: a `find` filter over the
//! legacy oplog collection, and a `$match` stage for a change stream.

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::operation::OperationKind;
use crate::temporal::{parse_optional_time, to_bson_timestamp, to_bson_timestamp_ceiling};

/// Criteria shared by one-shot and follow mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterBuilder {
    namespace: Option<String>,
    namespace_regex: Option<String>,
    operations: Vec<OperationKind>,
    object_id: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact `db.collection`. Mutually exclusive with [`Self::namespace_regex`].
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = non_blank(namespace.into());
        self
    }

    pub fn namespace_regex(mut self, pattern: impl Into<String>) -> Self {
        self.namespace_regex = non_blank(pattern.into());
        self
    }

    pub fn operations(mut self, kinds: impl IntoIterator<Item = OperationKind>) -> Self {
        self.operations = Vec::new();
        for kind in kinds {
            if !self.operations.contains(&kind) {
                self.operations.push(kind);
            }
        }
        self
    }

    /// Parse and set operations from a list such as `"i,u"` or `"insert,update"`.
    pub fn operations_str(self, list: &str) -> Result<Self> {
        let kinds = OperationKind::parse_list(list)?;
        Ok(self.operations(kinds))
    }

    pub fn object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = non_blank(id.into());
        self
    }

    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Parse `from` and `to` bounds (RFC 3339 or `YYYY-MM-DD`); blank input is ignored.
    pub fn time_range(mut self, from: Option<&str>, to: Option<&str>) -> Result<Self> {
        self.from = parse_optional_time(from)?;
        self.to = parse_optional_time(to)?;
        Ok(self)
    }

    pub fn exact_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn from_time(&self) -> Option<DateTime<Utc>> {
        self.from
    }

    /// Reject combinations that cannot be encoded.
    pub fn validate(&self, follow: bool) -> Result<()> {
        if self.namespace.is_some() && self.namespace_regex.is_some() {
            return Err(Error::InvalidFilterCombination(
                "use an exact namespace or a namespace regex, not both".to_string(),
            ));
        }
        if follow && self.to.is_some() {
            return Err(Error::InvalidFilterCombination(
                "an end time is not supported when following".to_string(),
            ));
        }
        Ok(())
    }

    /// Filter document for the legacy oplog collection.
    pub fn oplog_filter(&self) -> Document {
        let mut filter = Document::new();

        if let Some(ns) = &self.namespace {
            filter.insert("ns", ns.as_str());
        }
        if let Some(pattern) = &self.namespace_regex {
            filter.insert(
                "ns",
                Bson::RegularExpression(bson::Regex {
                    pattern: pattern.clone(),
                    options: String::new(),
                }),
            );
        }
        if !self.operations.is_empty() {
            let codes: Vec<&str> = self.operations.iter().map(|k| k.code()).collect();
            filter.insert("op", doc! { "$in": codes });
        }
        if let Some(id) = &self.object_id {
            let id = id_value(id);
            filter.insert(
                "$or",
                vec![doc! { "o._id": id.clone() }, doc! { "o2._id": id }],
            );
        }

        let mut ts = Document::new();
        if let Some(from) = self.from {
            ts.insert("$gte", to_bson_timestamp(from));
        }
        if let Some(to) = self.to {
            ts.insert("$lte", to_bson_timestamp_ceiling(to));
        }
        if !ts.is_empty() {
            filter.insert("ts", ts);
        }
        filter
    }

    /// Change-stream pipeline: at most one `$match` stage.
    ///
    /// The exact namespace is not encoded here; it selects the stream scope.
    pub fn change_stream_pipeline(&self) -> Vec<Document> {
        let mut matcher = Document::new();

        if let Some(pattern) = &self.namespace_regex {
            matcher.insert(
                "$or",
                vec![
                    doc! { "ns.db": { "$regex": pattern.as_str() } },
                    doc! { "ns.coll": { "$regex": pattern.as_str() } },
                ],
            );
        }
        if let Some(id) = &self.object_id {
            matcher.insert("documentKey._id", id_value(id));
        }
        if !self.operations.is_empty() {
            let names: Vec<&str> = self.operations.iter().map(|k| k.name()).collect();
            matcher.insert("operationType", doc! { "$in": names });
        }

        if matcher.is_empty() {
            Vec::new()
        } else {
            vec![doc! { "$match": matcher }]
        }
    }
}

/// 24-hex ids match as ObjectId, anything else as a string.
fn id_value(id: &str) -> Bson {
    match ObjectId::parse_str(id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(id.to_string()),
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
