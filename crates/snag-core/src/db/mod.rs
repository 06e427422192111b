//! Database layer for Snag

mod checkpoint_store;
mod conflict_log;
mod connection;
mod migrations;
mod record_store;
mod sync_queue;

pub use checkpoint_store::{LibSqlPullSyncTimestampStore, PullSyncTimestampStore};
pub use conflict_log::ConflictLog;
pub use connection::Database;
pub use record_store::{LibSqlRecordStore, RecordChange, RecordStore};
pub use sync_queue::{LibSqlSyncQueue, SyncQueue};

use crate::error::Result;
use libsql::Value;

/// Bind an optional string, mapping `None` to SQL `NULL`
fn nullable_text(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

/// Read a nullable text column
fn optional_text(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Text(value) => Ok(Some(value)),
        _ => Ok(None),
    }
}

/// Read a nullable integer column
fn optional_integer(row: &libsql::Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Integer(value) => Ok(Some(value)),
        _ => Ok(None),
    }
}
