//! File-backed document store.
//!
//! Each table is one JSON file, `<dir>/<table>.json`, holding an array of
//! `{key, doc}` entries in key order. Tables are loaded lazily and cached;
//! every write rewrites the whole file through a temp file and a rename, so
//! a crash leaves either the old or the new contents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quarry_engine::{Error, KeyValue, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{add_many, add_one, matching, replace, DocumentStore, Documents};

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    key: KeyValue,
    doc: Value,
}

/// Document tables persisted as JSON files in a directory.
///
/// Single-writer: one process owns the directory.
#[derive(Debug)]
pub struct FileDocumentStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Documents>>,
}

impl FileDocumentStore {
    /// Use `dir`, creating it if needed.
    pub async fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        tracing::debug!(dir = %dir.display(), "Opened document directory");
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> Result<PathBuf> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::Configuration(format!(
                "'{table}' is not a valid document table name"
            )));
        }
        Ok(self.dir.join(format!("{table}.json")))
    }

    async fn load(&self, table: &str) -> Result<Documents> {
        let path = self.table_path(table)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Documents::new()),
            Err(e) => return Err(io_error(&path, e)),
        };

        let entries: Vec<StoredDocument> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Transport(format!("{} is corrupt: {e}", path.display())))?;
        Ok(entries.into_iter().map(|e| (e.key, e.doc)).collect())
    }

    async fn save(&self, table: &str, docs: &Documents) -> Result<()> {
        let path = self.table_path(table)?;
        let entries: Vec<StoredDocument> = docs
            .iter()
            .map(|(key, doc)| StoredDocument {
                key: key.clone(),
                doc: doc.clone(),
            })
            .collect();
        let content = serde_json::to_vec_pretty(&entries)
            .map_err(|e| Error::Transport(format!("cannot encode table '{table}': {e}")))?;

        let tmp_file = self.dir.join(format!(".{table}-{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp_file, content)
            .await
            .map_err(|e| io_error(&tmp_file, e))?;
        tokio::fs::rename(&tmp_file, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(())
    }

    async fn loaded<'a>(
        &self,
        cache: &'a mut HashMap<String, Documents>,
        table: &str,
    ) -> Result<&'a mut Documents> {
        if !cache.contains_key(table) {
            let docs = self.load(table).await?;
            cache.insert(table.to_string(), docs);
        }
        cache
            .get_mut(table)
            .ok_or_else(|| Error::Transport(format!("table '{table}' vanished from cache")))
    }

    async fn read_table<T>(&self, table: &str, f: impl FnOnce(&Documents) -> T + Send) -> Result<T> {
        let mut cache = self.cache.lock().await;
        Ok(f(self.loaded(&mut cache, table).await?))
    }

    /// Run `f` against a copy of a table's documents. When it reports a
    /// change the copy is saved and only then replaces the cached table.
    async fn write_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Documents) -> Result<(T, bool)> + Send,
    ) -> Result<T> {
        let mut cache = self.cache.lock().await;
        let docs = self.loaded(&mut cache, table).await?;

        let mut next = docs.clone();
        let (out, changed) = f(&mut next)?;
        if changed {
            self.save(table, &next).await?;
            *docs = next;
        }
        Ok(out)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    tracing::warn!(path = %path.display(), error = %err, "Document store IO failed");
    Error::Transport(format!("{}: {err}", path.display()))
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn open(&self, table: &str) -> Result<()> {
        let path = self.table_path(table)?;
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        self.write_table(table, |_| Ok(((), !exists))).await
    }

    async fn clear(&self, table: &str) -> Result<()> {
        self.write_table(table, |docs| {
            docs.clear();
            Ok(((), true))
        })
        .await
    }

    async fn add(&self, table: &str, key: KeyValue, doc: Value) -> Result<()> {
        self.write_table(table, |docs| add_one(table, docs, key, doc).map(|()| ((), true)))
            .await
    }

    async fn update(&self, table: &str, key: &KeyValue, doc: Value) -> Result<bool> {
        self.write_table(table, |docs| {
            let replaced = replace(docs, key, doc);
            Ok((replaced, replaced))
        })
        .await
    }

    async fn put(&self, table: &str, key: KeyValue, doc: Value) -> Result<()> {
        self.write_table(table, |docs| {
            docs.insert(key, doc);
            Ok(((), true))
        })
        .await
    }

    async fn delete(&self, table: &str, key: &KeyValue) -> Result<bool> {
        self.write_table(table, |docs| {
            let removed = docs.remove(key).is_some();
            Ok((removed, removed))
        })
        .await
    }

    async fn bulk_add(&self, table: &str, entries: Vec<(KeyValue, Value)>) -> Result<()> {
        self.write_table(table, |docs| add_many(table, docs, entries).map(|()| ((), true)))
            .await
    }

    async fn get(&self, table: &str, key: &KeyValue) -> Result<Option<Value>> {
        self.read_table(table, |docs| docs.get(key).cloned()).await
    }

    async fn to_array(&self, table: &str) -> Result<Vec<Value>> {
        self.read_table(table, |docs| docs.values().cloned().collect())
            .await
    }

    async fn find_by_index(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Value>> {
        self.read_table(table, |docs| matching(docs, field, value))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::tests::exercise_store;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_contract() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::open_dir(dir.path()).await.unwrap();
        exercise_store(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let store = FileDocumentStore::open_dir(dir.path()).await.unwrap();
            store
                .add("notes", KeyValue::Text("a".into()), json!({"id": "a"}))
                .await
                .unwrap();
            store
                .add("notes", KeyValue::Int(3), json!({"id": 3}))
                .await
                .unwrap();
        }

        let reopened = FileDocumentStore::open_dir(dir.path()).await.unwrap();
        assert_eq!(
            reopened.to_array("notes").await.unwrap(),
            vec![json!({"id": 3}), json!({"id": "a"})]
        );
        assert!(dir.path().join("notes.json").exists());

        // no temp files are left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_cache_unchanged() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("docs");
        let store = FileDocumentStore::open_dir(&root).await.unwrap();
        store
            .add("notes", KeyValue::Int(1), json!({"id": 1}))
            .await
            .unwrap();

        std::fs::remove_dir_all(&root).unwrap();
        assert!(matches!(
            store.put("notes", KeyValue::Int(2), json!({"id": 2})).await,
            Err(Error::Transport(_))
        ));
        assert!(matches!(
            store.delete("notes", &KeyValue::Int(1)).await,
            Err(Error::Transport(_))
        ));

        assert_eq!(store.to_array("notes").await.unwrap(), vec![json!({"id": 1})]);
        assert!(store.get("notes", &KeyValue::Int(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_creates_file_and_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::open_dir(dir.path()).await.unwrap();

        store.open("customers_pending").await.unwrap();
        assert!(dir.path().join("customers_pending.json").exists());

        assert!(matches!(
            store.open("../escape").await,
            Err(Error::Configuration(_))
        ));
    }
}
