//! Versioned record model

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Logical timestamp in Unix milliseconds. Zero is the "never synced" epoch.
pub type Timestamp = i64;

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Top-level keys the wire format uses next to a flattened payload
pub const RESERVED_PAYLOAD_KEYS: [&str; 5] =
    ["id", "parentId", "updatedAt", "deletedAt", "deleted"];

/// First reserved key a payload object carries, if any
pub fn reserved_payload_key(payload: &Value) -> Option<&'static str> {
    let fields = payload.as_object()?;
    RESERVED_PAYLOAD_KEYS
        .into_iter()
        .find(|key| fields.contains_key(*key))
}

/// A payload plus the timestamps the sync protocol reasons about.
///
/// `updated_at` and `deleted_at` are independent write timestamps; a record
/// with `deleted_at` set is a tombstone that is retained so the deletion can
/// propagate. On the wire the payload fields are flattened next to the
/// metadata: `{"id": .., ..payload.., "updatedAt": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord<P> {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RecordId>,
    #[serde(flatten)]
    pub payload: P,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl<P> VersionedRecord<P> {
    /// Create a live record
    pub const fn new(
        id: RecordId,
        parent_id: Option<RecordId>,
        payload: P,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id,
            parent_id,
            payload,
            updated_at,
            deleted_at: None,
        }
    }

    /// The timestamp the conflict resolver compares against:
    /// `max(updated_at, deleted_at ?? 0)`
    pub fn effective_timestamp(&self) -> Timestamp {
        self.updated_at.max(self.deleted_at.unwrap_or(0))
    }

    /// Whether this record is a tombstone
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Replace the payload while keeping the sync metadata
    pub fn map_payload<Q>(self, f: impl FnOnce(P) -> Q) -> VersionedRecord<Q> {
        VersionedRecord {
            id: self.id,
            parent_id: self.parent_id,
            payload: f(self.payload),
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

impl VersionedRecord<Value> {
    /// Decode the JSON payload into a typed payload
    pub fn decode<P: DeserializeOwned>(self) -> serde_json::Result<VersionedRecord<P>> {
        let Self {
            id,
            parent_id,
            payload,
            updated_at,
            deleted_at,
        } = self;
        Ok(VersionedRecord {
            id,
            parent_id,
            payload: serde_json::from_value(payload)?,
            updated_at,
            deleted_at,
        })
    }
}

impl<P: Serialize> VersionedRecord<P> {
    /// Encode the typed payload as a JSON object
    pub fn encode(&self) -> serde_json::Result<VersionedRecord<Value>> {
        Ok(VersionedRecord {
            id: self.id,
            parent_id: self.parent_id,
            payload: serde_json::to_value(&self.payload)?,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// Wire marker for a deleted record: `{"deleted": true, "id": .., "deletedAt": ..}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub deleted: bool,
    pub id: RecordId,
    pub deleted_at: Timestamp,
}

impl Tombstone {
    pub const fn new(id: RecordId, deleted_at: Timestamp) -> Self {
        Self {
            deleted: true,
            id,
            deleted_at,
        }
    }
}

/// One element of a "changed since" response: either a live record or a
/// tombstone marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RemoteChange {
    Tombstone(Tombstone),
    Live(VersionedRecord<Value>),
}

impl RemoteChange {
    /// Describe a stored record the way the remote authority publishes it
    pub fn from_record(record: VersionedRecord<Value>) -> Self {
        match record.deleted_at {
            Some(deleted_at) => Self::Tombstone(Tombstone::new(record.id, deleted_at)),
            None => Self::Live(record),
        }
    }

    pub const fn id(&self) -> RecordId {
        match self {
            Self::Tombstone(tombstone) => tombstone.id,
            Self::Live(record) => record.id,
        }
    }
}

impl<'de> Deserialize<'de> for RemoteChange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let is_tombstone = value
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if is_tombstone {
            serde_json::from_value(value)
                .map(Self::Tombstone)
                .map_err(D::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(Self::Live)
                .map_err(D::Error::custom)
        }
    }
}
