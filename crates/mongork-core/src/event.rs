//! Normalized change events.

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::operation::OperationKind;
use crate::temporal::from_bson_timestamp;

/// One replicated write, regardless of whether it came from the legacy
/// oplog or a change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub timestamp: DateTime<Utc>,
    /// Canonical name (`insert`, `update`, `delete`, `command`, `noop`), or
    /// the raw kind for anything else (e.g. `replace`).
    pub operation: String,
    /// `db.collection`, empty for deployment-wide entries.
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl ChangeEvent {
    /// Build from a legacy oplog entry (`ts`, `op`, `ns`, `o`, `o2`, `wall`).
    pub fn from_oplog(raw: &Document) -> Result<Self> {
        let op = raw
            .get_str("op")
            .map_err(|_| Error::EventDecode("oplog entry has no op".to_string()))?;

        let timestamp = match (raw.get("wall"), raw.get("ts")) {
            (Some(Bson::DateTime(wall)), _) => wall.to_chrono(),
            (_, Some(Bson::Timestamp(ts))) => from_bson_timestamp(*ts),
            _ => {
                return Err(Error::EventDecode(
                    "oplog entry has no ts or wall time".to_string(),
                ))
            }
        };

        let object = raw.get_document("o").ok();
        let object_id = [object, raw.get_document("o2").ok()]
            .into_iter()
            .flatten()
            .find_map(|d| d.get("_id"))
            .map(display_id);

        Ok(Self {
            timestamp,
            operation: OperationKind::canonical_name(op),
            namespace: raw.get_str("ns").unwrap_or_default().to_string(),
            object_id,
            document: object.cloned(),
        })
    }

    /// Build from a change-stream event (`operationType`, `ns`, `documentKey`,
    /// `fullDocument`, `clusterTime`, `wallTime`).
    ///
    /// Update events without a full document carry their `updateDescription`.
    pub fn from_change_stream(raw: &Document) -> Result<Self> {
        let operation = raw
            .get_str("operationType")
            .map_err(|_| Error::EventDecode("change event has no operationType".to_string()))?;

        let timestamp = match (raw.get("wallTime"), raw.get("clusterTime")) {
            (Some(Bson::DateTime(wall)), _) => wall.to_chrono(),
            (_, Some(Bson::Timestamp(ts))) => from_bson_timestamp(*ts),
            _ => {
                return Err(Error::EventDecode(
                    "change event has no clusterTime or wallTime".to_string(),
                ))
            }
        };

        let namespace = raw
            .get_document("ns")
            .map(|ns| {
                let db = ns.get_str("db").unwrap_or_default();
                match ns.get_str("coll") {
                    Ok(coll) if !coll.is_empty() => format!("{db}.{coll}"),
                    _ => db.to_string(),
                }
            })
            .unwrap_or_default();

        let object_id = raw
            .get_document("documentKey")
            .ok()
            .and_then(|key| key.get("_id"))
            .map(display_id);

        let document = raw
            .get_document("fullDocument")
            .or_else(|_| raw.get_document("updateDescription"))
            .ok()
            .cloned();

        Ok(Self {
            timestamp,
            operation: OperationKind::from_name(operation)
                .map(|k| k.name().to_string())
                .unwrap_or_else(|| operation.to_string()),
            namespace,
            object_id,
            document,
        })
    }

    /// Known kind, if the operation is one of the five oplog kinds.
    pub fn kind(&self) -> Option<OperationKind> {
        OperationKind::from_name(&self.operation)
    }
}

fn display_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}
