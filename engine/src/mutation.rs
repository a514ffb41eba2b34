//! Pending mutations and change events.
//!
//! Writes made while disconnected are recorded as [`PendingMutation`]s in a
//! durable queue and replayed against the remote backend later. Successful
//! remote writes are announced as [`ChangeEvent`]s.

use crate::{error::Result, KeyValue, RecordKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a recorded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    DeleteAll,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
            MutationKind::DeleteAll => "deleteAll",
        };
        f.write_str(name)
    }
}

/// A locally applied write awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation<R> {
    /// Queue position; strictly increasing
    pub sequence: u64,
    pub kind: MutationKind,
    /// Local identity targeted; `None` for DeleteAll
    pub key: Option<KeyValue>,
    /// Record snapshot at the time of the write
    pub record: Option<R>,
    /// Failed replay attempts so far
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub queued_at: DateTime<Utc>,
}

impl<R> PendingMutation<R> {
    fn new(sequence: u64, kind: MutationKind, key: Option<KeyValue>, record: Option<R>) -> Self {
        Self {
            sequence,
            kind,
            key,
            record,
            attempts: 0,
            last_error: None,
            queued_at: Utc::now(),
        }
    }

    pub fn insert(sequence: u64, key: KeyValue, record: R) -> Self {
        Self::new(sequence, MutationKind::Insert, Some(key), Some(record))
    }

    pub fn update(sequence: u64, key: KeyValue, record: R) -> Self {
        Self::new(sequence, MutationKind::Update, Some(key), Some(record))
    }

    pub fn delete(sequence: u64, key: KeyValue, record: Option<R>) -> Self {
        Self::new(sequence, MutationKind::Delete, Some(key), record)
    }

    pub fn delete_all(sequence: u64) -> Self {
        Self::new(sequence, MutationKind::DeleteAll, None, None)
    }

    /// Typed local identity targeted by this mutation.
    pub fn local_key<K: RecordKey>(&self) -> Result<Option<K>> {
        self.key.clone().map(K::from_key_value).transpose()
    }

    /// Note a failed replay attempt.
    pub fn record_failure(&mut self, error: impl std::fmt::Display) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.to_string());
    }
}

/// Notification that a record (or a whole table) changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub table: String,
    /// Affected identity; `None` when the whole table was cleared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyValue>,
    pub kind: MutationKind,
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>, key: Option<KeyValue>, kind: MutationKind) -> Self {
        Self {
            table: table.into(),
            key,
            kind,
        }
    }

    pub fn cleared(table: impl Into<String>) -> Self {
        Self::new(table, None, MutationKind::DeleteAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mutation_serialization() {
        let m = PendingMutation::insert(3, KeyValue::Int(-1), json!({"name": "Ada"}));
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["sequence"], 3);
        assert_eq!(value["kind"], "insert");
        assert_eq!(value["key"], -1);
        assert_eq!(value["attempts"], 0);
        assert!(value.get("lastError").is_none());

        let back: PendingMutation<serde_json::Value> = serde_json::from_value(value).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn delete_all_has_no_key() {
        let m: PendingMutation<()> = PendingMutation::delete_all(9);
        assert_eq!(m.kind, MutationKind::DeleteAll);
        assert_eq!(m.local_key::<i32>().unwrap(), None);
        assert_eq!(serde_json::to_value(m.kind).unwrap(), json!("deleteAll"));
    }

    #[test]
    fn typed_keys() {
        let m = PendingMutation::update(1, KeyValue::Text("local-x".into()), ());
        assert_eq!(m.local_key::<String>().unwrap(), Some("local-x".to_string()));
        assert!(m.local_key::<i32>().is_err());
    }

    #[test]
    fn failures_are_counted() {
        let mut m = PendingMutation::delete(1, KeyValue::Int(4), None::<()>);
        m.record_failure("connection refused");
        m.record_failure("connection refused");
        assert_eq!(m.attempts, 2);
        assert_eq!(m.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn change_event_wire_format() {
        let event = ChangeEvent::new("customers", Some(KeyValue::Int(7)), MutationKind::Update);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"table": "customers", "key": 7, "kind": "update"})
        );
        assert_eq!(
            serde_json::to_value(ChangeEvent::cleared("customers")).unwrap(),
            json!({"table": "customers", "kind": "deleteAll"})
        );
    }
}
