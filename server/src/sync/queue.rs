//! Durable pending-mutation queue.
//!
//! Entries live in the `<table>_pending` document table keyed by sequence
//! number, so a scan returns them in the order they were appended. Entries
//! that exhaust their retries move to `<table>_deadletter`.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quarry_engine::{Entity, Error, KeyValue, PendingMutation, Result};
use serde_json::Value;

use crate::storage::DocumentStore;

pub struct PendingQueue<R> {
    store: Arc<dyn DocumentStore>,
    pending: String,
    dead: String,
    last_sequence: AtomicU64,
    _record: PhantomData<fn() -> R>,
}

impl<R: Entity> PendingQueue<R> {
    /// Open the queue tables for `table` and resume numbering after the
    /// highest sequence already stored.
    pub async fn open(store: Arc<dyn DocumentStore>, table: &str) -> Result<Self> {
        let pending = format!("{table}_pending");
        let dead = format!("{table}_deadletter");
        store.open(&pending).await?;
        store.open(&dead).await?;

        let mut last = 0;
        for name in [&pending, &dead] {
            for doc in store.to_array(name).await? {
                let mutation: PendingMutation<R> = decode(name, doc)?;
                last = last.max(mutation.sequence);
            }
        }

        Ok(Self {
            store,
            pending,
            dead,
            last_sequence: AtomicU64::new(last),
            _record: PhantomData,
        })
    }

    /// Append an entry built for the next sequence number.
    pub async fn append(
        &self,
        build: impl FnOnce(u64) -> PendingMutation<R> + Send,
    ) -> Result<PendingMutation<R>> {
        let sequence = self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mutation = build(sequence);
        self.store
            .add(&self.pending, seq_key(sequence), encode(&mutation)?)
            .await?;
        tracing::debug!(
            queue = %self.pending,
            sequence,
            kind = %mutation.kind,
            "Queued mutation"
        );
        Ok(mutation)
    }

    /// Every queued entry in sequence order.
    pub async fn pending(&self) -> Result<Vec<PendingMutation<R>>> {
        self.store
            .to_array(&self.pending)
            .await?
            .into_iter()
            .map(|doc| decode(&self.pending, doc))
            .collect()
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.to_array(&self.pending).await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Persist a changed entry (attempt count, last error).
    pub async fn save(&self, mutation: &PendingMutation<R>) -> Result<()> {
        self.store
            .put(&self.pending, seq_key(mutation.sequence), encode(mutation)?)
            .await
    }

    pub async fn remove(&self, sequence: u64) -> Result<bool> {
        self.store.delete(&self.pending, &seq_key(sequence)).await
    }

    /// Move an entry out of the queue into the dead-letter table.
    pub async fn dead_letter(&self, mutation: &PendingMutation<R>) -> Result<()> {
        self.store
            .put(&self.dead, seq_key(mutation.sequence), encode(mutation)?)
            .await?;
        self.remove(mutation.sequence).await?;
        tracing::warn!(
            queue = %self.pending,
            sequence = mutation.sequence,
            attempts = mutation.attempts,
            error = mutation.last_error.as_deref().unwrap_or(""),
            "Mutation dead-lettered"
        );
        Ok(())
    }

    pub async fn dead_letters(&self) -> Result<Vec<PendingMutation<R>>> {
        self.store
            .to_array(&self.dead)
            .await?
            .into_iter()
            .map(|doc| decode(&self.dead, doc))
            .collect()
    }

    /// Drop every queued entry. Dead letters are kept.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear(&self.pending).await
    }
}

fn seq_key(sequence: u64) -> KeyValue {
    // sequences stay far below i64::MAX
    KeyValue::Int(sequence as i64)
}

fn encode<R: Entity>(mutation: &PendingMutation<R>) -> Result<Value> {
    serde_json::to_value(mutation)
        .map_err(|e| Error::Transport(format!("cannot encode queued mutation: {e}")))
}

fn decode<R: Entity>(table: &str, doc: Value) -> Result<PendingMutation<R>> {
    serde_json::from_value(doc)
        .map_err(|e| Error::Transport(format!("entry in '{table}' does not decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Customer;
    use crate::storage::MemoryDocumentStore;
    use quarry_engine::MutationKind;

    #[tokio::test]
    async fn test_append_and_scan_in_order() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let queue = PendingQueue::<Customer>::open(store, "customers").await.unwrap();

        queue
            .append(|seq| PendingMutation::insert(seq, KeyValue::Int(-1), Customer::new("Ada")))
            .await
            .unwrap();
        queue
            .append(|seq| PendingMutation::delete(seq, KeyValue::Int(-1), None))
            .await
            .unwrap();

        let entries = queue.pending().await.unwrap();
        assert_eq!(
            entries.iter().map(|m| (m.sequence, m.kind)).collect::<Vec<_>>(),
            vec![(1, MutationKind::Insert), (2, MutationKind::Delete)]
        );

        assert!(queue.remove(1).await.unwrap());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_numbering_resumes_after_reopen() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        {
            let queue = PendingQueue::<Customer>::open(Arc::clone(&store), "customers")
                .await
                .unwrap();
            for _ in 0..3 {
                queue.append(PendingMutation::delete_all).await.unwrap();
            }
            let mut first = queue.pending().await.unwrap().remove(0);
            first.record_failure("boom");
            queue.dead_letter(&first).await.unwrap();
            queue.remove(2).await.unwrap();
            queue.remove(3).await.unwrap();
        }

        let queue = PendingQueue::<Customer>::open(store, "customers").await.unwrap();
        assert!(queue.is_empty().await.unwrap());
        let next = queue.append(PendingMutation::delete_all).await.unwrap();
        assert_eq!(next.sequence, 4);

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("boom"));
    }
}
