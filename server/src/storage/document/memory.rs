//! Process-local document store.

use async_trait::async_trait;
use dashmap::DashMap;
use quarry_engine::{KeyValue, Result};
use serde_json::Value;

use super::{add_many, add_one, matching, replace, DocumentStore, Documents};

/// Document tables held in memory, one ordered map per table.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    tables: DashMap<String, Documents>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn open(&self, table: &str) -> Result<()> {
        self.tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn clear(&self, table: &str) -> Result<()> {
        if let Some(mut docs) = self.tables.get_mut(table) {
            docs.clear();
        }
        Ok(())
    }

    async fn add(&self, table: &str, key: KeyValue, doc: Value) -> Result<()> {
        let mut docs = self.tables.entry(table.to_string()).or_default();
        add_one(table, &mut *docs, key, doc)
    }

    async fn update(&self, table: &str, key: &KeyValue, doc: Value) -> Result<bool> {
        Ok(self
            .tables
            .get_mut(table)
            .map(|mut docs| replace(&mut *docs, key, doc))
            .unwrap_or(false))
    }

    async fn put(&self, table: &str, key: KeyValue, doc: Value) -> Result<()> {
        self.tables.entry(table.to_string()).or_default().insert(key, doc);
        Ok(())
    }

    async fn delete(&self, table: &str, key: &KeyValue) -> Result<bool> {
        Ok(self
            .tables
            .get_mut(table)
            .map(|mut docs| docs.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn bulk_add(&self, table: &str, entries: Vec<(KeyValue, Value)>) -> Result<()> {
        let mut docs = self.tables.entry(table.to_string()).or_default();
        add_many(table, &mut *docs, entries)
    }

    async fn get(&self, table: &str, key: &KeyValue) -> Result<Option<Value>> {
        Ok(self.tables.get(table).and_then(|docs| docs.get(key).cloned()))
    }

    async fn to_array(&self, table: &str) -> Result<Vec<Value>> {
        Ok(self
            .tables
            .get(table)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_by_index(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Value>> {
        Ok(self
            .tables
            .get(table)
            .map(|docs| matching(&*docs, field, value))
            .unwrap_or_default())
    }
}
