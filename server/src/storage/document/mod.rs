//! Local document storage.
//!
//! A [`DocumentStore`] is an opaque key/value table API: named tables of JSON
//! documents addressed by key, with a scan and a field-equality lookup but no
//! query language. [`DocumentTable`] layers the record repository on top and
//! filters in memory.

mod file;
mod memory;
mod table;

pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;
pub use table::DocumentTable;

use std::collections::BTreeMap;

use async_trait::async_trait;
use quarry_engine::{Error, KeyValue, Result};
use serde_json::Value;

/// Opaque key/value table storage.
///
/// Tables spring into existence on first use; `open` only makes that
/// explicit. Scans return documents in key order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn open(&self, table: &str) -> Result<()>;

    async fn clear(&self, table: &str) -> Result<()>;

    /// Add a new document. Fails with duplicate-key if the key is taken.
    async fn add(&self, table: &str, key: KeyValue, doc: Value) -> Result<()>;

    /// Replace an existing document. Returns `false` if the key is absent.
    async fn update(&self, table: &str, key: &KeyValue, doc: Value) -> Result<bool>;

    /// Insert or replace.
    async fn put(&self, table: &str, key: KeyValue, doc: Value) -> Result<()>;

    async fn delete(&self, table: &str, key: &KeyValue) -> Result<bool>;

    /// Add several documents. Nothing is written if any key is taken.
    async fn bulk_add(&self, table: &str, entries: Vec<(KeyValue, Value)>) -> Result<()>;

    async fn get(&self, table: &str, key: &KeyValue) -> Result<Option<Value>>;

    /// Every document in key order.
    async fn to_array(&self, table: &str) -> Result<Vec<Value>>;

    /// Documents whose top-level `field` equals `value`.
    async fn find_by_index(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Value>>;
}

type Documents = BTreeMap<KeyValue, Value>;

fn duplicate(table: &str, key: &KeyValue) -> Error {
    Error::DuplicateKey(format!("{table}/{key}"))
}

fn add_one(table: &str, docs: &mut Documents, key: KeyValue, doc: Value) -> Result<()> {
    if docs.contains_key(&key) {
        return Err(duplicate(table, &key));
    }
    docs.insert(key, doc);
    Ok(())
}

fn add_many(table: &str, docs: &mut Documents, entries: Vec<(KeyValue, Value)>) -> Result<()> {
    for (i, (key, _)) in entries.iter().enumerate() {
        if docs.contains_key(key) || entries[..i].iter().any(|(k, _)| k == key) {
            return Err(duplicate(table, key));
        }
    }
    docs.extend(entries);
    Ok(())
}

fn replace(docs: &mut Documents, key: &KeyValue, doc: Value) -> bool {
    match docs.get_mut(key) {
        Some(slot) => {
            *slot = doc;
            true
        }
        None => false,
    }
}

fn matching(docs: &Documents, field: &str, value: &Value) -> Vec<Value> {
    docs.values()
        .filter(|doc| doc.get(field) == Some(value))
        .cloned()
        .collect()
}
