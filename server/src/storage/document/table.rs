//! Record repository over a document store.

use std::sync::Arc;

use async_trait::async_trait;
use quarry_engine::{Entity, Error, KeyKind, KeyValue, QueryFilter, RecordKey, Result, Shape};
use serde_json::Value;

use super::DocumentStore;
use crate::storage::{entity_shape, filter_in_memory, not_found, Repository};

/// Repository storing each record as a document keyed by its identity.
///
/// The store has no query language, so every filter loads the whole table
/// and evaluates in memory.
pub struct DocumentTable<R: Entity> {
    store: Arc<dyn DocumentStore>,
    shape: Shape<R>,
}

impl<R: Entity> std::fmt::Debug for DocumentTable<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentTable")
            .field("table", &self.shape.table)
            .finish()
    }
}

impl<R: Entity> DocumentTable<R> {
    pub async fn new(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let shape = entity_shape::<R>()?;
        store.open(&shape.table).await?;
        Ok(Self { store, shape })
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Insert or replace a record under its own key.
    pub async fn put(&self, record: &R) -> Result<()> {
        self.store
            .put(&self.shape.table, record.key().to_key_value(), encode(record)?)
            .await
    }

    /// Identities of every stored record.
    pub async fn keys(&self) -> Result<Vec<R::Key>> {
        Ok(self.fetch_all().await?.iter().map(Entity::key).collect())
    }

    async fn allocate_key(&self) -> Result<R::Key> {
        if R::Key::KIND == KeyKind::String {
            return R::Key::from_key_value(KeyValue::Text(uuid::Uuid::new_v4().to_string()));
        }
        let keys = self.keys().await?;
        R::Key::successor(keys.iter().max()).ok_or_else(|| {
            Error::Configuration(format!("table '{}' cannot derive a next key", self.shape.table))
        })
    }
}

fn encode<R: Entity>(record: &R) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| Error::Transport(format!("cannot encode record: {e}")))
}

fn decode<R: Entity>(table: &str, doc: Value) -> Result<R> {
    serde_json::from_value(doc)
        .map_err(|e| Error::Transport(format!("document in '{table}' does not decode: {e}")))
}

#[async_trait]
impl<R: Entity> Repository<R> for DocumentTable<R> {
    fn shape(&self) -> &Shape<R> {
        &self.shape
    }

    async fn fetch_all(&self) -> Result<Vec<R>> {
        self.store
            .to_array(&self.shape.table)
            .await?
            .into_iter()
            .map(|doc| decode(&self.shape.table, doc))
            .collect()
    }

    async fn fetch_filtered(&self, filter: &QueryFilter) -> Result<Vec<R>> {
        let records = self.fetch_all().await?;
        filter_in_memory(&self.shape, filter, records)
    }

    async fn fetch_by_id(&self, id: &R::Key) -> Result<Option<R>> {
        self.store
            .get(&self.shape.table, &id.to_key_value())
            .await?
            .map(|doc| decode(&self.shape.table, doc))
            .transpose()
    }

    async fn insert(&self, mut record: R) -> Result<R> {
        if record.key().is_unset() {
            record.set_key(self.allocate_key().await?);
        }
        self.store
            .add(&self.shape.table, record.key().to_key_value(), encode(&record)?)
            .await?;
        tracing::debug!(table = %self.shape.table, key = %record.key(), "Stored document");
        Ok(record)
    }

    async fn update(&self, record: R) -> Result<R> {
        let key = record.key();
        let replaced = self
            .store
            .update(&self.shape.table, &key.to_key_value(), encode(&record)?)
            .await?;
        if !replaced {
            return Err(not_found::<R>(&self.shape.table, &key));
        }
        Ok(record)
    }

    async fn delete_by_id(&self, id: &R::Key) -> Result<bool> {
        self.store.delete(&self.shape.table, &id.to_key_value()).await
    }

    async fn delete_all(&self) -> Result<()> {
        self.store.clear(&self.shape.table).await
    }
}
