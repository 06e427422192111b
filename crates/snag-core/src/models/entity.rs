//! Entity kinds and sync scopes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::RecordId;

/// The synchronizable entity types of the tracker.
///
/// The collection name doubles as the queue scope id, the HTTP collection
/// segment, and the storage discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Project,
    Structure,
    Finding,
    Client,
    Inspection,
}

impl EntityKind {
    /// Every kind, in dependency order (parents before children)
    pub const ALL: [Self; 5] = [
        Self::Client,
        Self::Project,
        Self::Structure,
        Self::Finding,
        Self::Inspection,
    ];

    /// Plural collection name used on the wire and in storage
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Structure => "structures",
            Self::Finding => "findings",
            Self::Client => "clients",
            Self::Inspection => "inspections",
        }
    }

    /// Parse a collection name (`"findings"`) or a singular kind (`"finding"`)
    pub fn from_collection(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| {
            kind.collection() == value || kind.collection().strip_suffix('s') == Some(value.as_str())
        })
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_collection(s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown entity kind: {s}")))
    }
}

/// The unit of pull serialization: an entity kind, optionally narrowed to
/// the children of one parent record (e.g. findings of one structure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncScopeKey {
    pub kind: EntityKind,
    pub parent_id: Option<RecordId>,
}

impl SyncScopeKey {
    /// Scope covering the whole collection
    pub const fn collection(kind: EntityKind) -> Self {
        Self {
            kind,
            parent_id: None,
        }
    }

    /// Scope covering the children of `parent_id`
    pub const fn children_of(kind: EntityKind, parent_id: RecordId) -> Self {
        Self {
            kind,
            parent_id: Some(parent_id),
        }
    }
}

impl From<EntityKind> for SyncScopeKey {
    fn from(kind: EntityKind) -> Self {
        Self::collection(kind)
    }
}

impl fmt::Display for SyncScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent_id {
            Some(parent_id) => write!(f, "{}@{parent_id}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl FromStr for SyncScopeKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((kind, parent)) => {
                let parent_id = parent.parse::<RecordId>().map_err(|_| {
                    crate::Error::InvalidInput(format!("Invalid scope parent id: {parent}"))
                })?;
                Ok(Self::children_of(kind.parse()?, parent_id))
            }
            None => Ok(Self::collection(s.parse()?)),
        }
    }
}
