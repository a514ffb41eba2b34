//! Persisted identity reconciliation map.

use std::sync::Arc;

use quarry_engine::{Error, KeyMap, KeyMapping, RecordKey, Result};
use tokio::sync::RwLock;

use crate::storage::DocumentStore;

/// A [`KeyMap`] mirrored into the `<table>_keymap` document table, one
/// document per mapping keyed by local identity.
pub struct KeyStore<K: RecordKey> {
    store: Arc<dyn DocumentStore>,
    table: String,
    map: RwLock<KeyMap<K>>,
}

impl<K: RecordKey> KeyStore<K> {
    pub async fn open(store: Arc<dyn DocumentStore>, table: &str) -> Result<Self> {
        let table = format!("{table}_keymap");
        store.open(&table).await?;

        let mut mappings = Vec::new();
        for doc in store.to_array(&table).await? {
            let mapping: KeyMapping<K> = serde_json::from_value(doc).map_err(|e| {
                Error::Transport(format!("entry in '{table}' does not decode: {e}"))
            })?;
            mappings.push(mapping);
        }

        Ok(Self {
            store,
            map: RwLock::new(KeyMap::from_mappings(mappings)),
            table,
        })
    }

    /// Copy of the current map.
    pub async fn snapshot(&self) -> KeyMap<K> {
        self.map.read().await.clone()
    }

    pub async fn remote_for(&self, local_id: &K) -> Option<K> {
        self.map.read().await.remote_for(local_id).cloned()
    }

    pub async fn local_for(&self, remote_id: &K) -> Option<K> {
        self.map.read().await.local_for(remote_id).cloned()
    }

    pub async fn resolve_remote(&self, local_id: &K) -> K {
        self.map.read().await.resolve_remote(local_id)
    }

    pub async fn resolve_local(&self, remote_id: &K) -> K {
        self.map.read().await.resolve_local(remote_id)
    }

    pub async fn mappings(&self) -> Vec<KeyMapping<K>> {
        self.map.read().await.mappings()
    }

    /// Record a link, dropping any mapping it displaces.
    pub async fn link(&self, local_id: K, remote_id: K) -> Result<()> {
        let mut map = self.map.write().await;
        for old in map.insert(local_id.clone(), remote_id.clone()) {
            if old.local_id != local_id {
                self.store
                    .delete(&self.table, &old.local_id.to_key_value())
                    .await?;
            }
        }

        let mapping = KeyMapping::new(local_id, remote_id);
        let doc = serde_json::to_value(&mapping)
            .map_err(|e| Error::Transport(format!("cannot encode key mapping: {e}")))?;
        self.store
            .put(&self.table, mapping.local_id.to_key_value(), doc)
            .await?;
        tracing::debug!(
            table = %self.table,
            local = %mapping.local_id,
            remote = %mapping.remote_id,
            "Linked keys"
        );
        Ok(())
    }

    pub async fn unlink_local(&self, local_id: &K) -> Result<()> {
        let mut map = self.map.write().await;
        if map.remove_local(local_id).is_some() {
            self.store.delete(&self.table, &local_id.to_key_value()).await?;
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let mut map = self.map.write().await;
        map.clear();
        self.store.clear(&self.table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;

    #[tokio::test]
    async fn test_links_persist_across_reopen() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        {
            let keys = KeyStore::<i32>::open(Arc::clone(&store), "customers").await.unwrap();
            keys.link(5, 101).await.unwrap();
            keys.link(-2, 102).await.unwrap();
        }

        let keys = KeyStore::<i32>::open(store, "customers").await.unwrap();
        assert_eq!(keys.remote_for(&5).await, Some(101));
        assert_eq!(keys.resolve_local(&102).await, -2);
        assert_eq!(keys.resolve_remote(&7).await, 7);
        assert_eq!(keys.mappings().await.len(), 2);
    }

    #[tokio::test]
    async fn test_displaced_links_are_deleted() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let keys = KeyStore::<String>::open(Arc::clone(&store), "notes").await.unwrap();

        keys.link("local-a".into(), "a".into()).await.unwrap();
        keys.link("local-b".into(), "a".into()).await.unwrap();
        assert_eq!(store.to_array("notes_keymap").await.unwrap().len(), 1);
        assert_eq!(keys.resolve_local(&"a".to_string()).await, "local-b");

        keys.unlink_local(&"local-b".to_string()).await.unwrap();
        assert!(keys.mappings().await.is_empty());

        keys.link("local-c".into(), "c".into()).await.unwrap();
        keys.clear().await.unwrap();
        assert!(store.to_array("notes_keymap").await.unwrap().is_empty());
    }
}
