//! In-memory table.
//!
//! Records live in a concurrent map keyed by identity, so writers to
//! different keys never contend on a single lock. Each row carries the
//! sequence number of its insert, which gives `fetch_all` a stable
//! insertion order.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use quarry_engine::{Entity, Error, KeyKind, KeyValue, QueryFilter, RecordKey, Result, Shape};

use super::{entity_shape, filter_in_memory, not_found, Repository};

#[derive(Debug, Clone)]
struct Row<R> {
    sequence: u64,
    record: R,
}

/// Repository backed by process memory.
#[derive(Debug)]
pub struct MemoryTable<R: Entity> {
    shape: Shape<R>,
    rows: DashMap<R::Key, Row<R>>,
    sequence: AtomicU64,
    last_key: AtomicI64,
}

impl<R: Entity> MemoryTable<R> {
    pub fn new() -> Result<Self> {
        Ok(Self {
            shape: entity_shape::<R>()?,
            rows: DashMap::new(),
            sequence: AtomicU64::new(0),
            last_key: AtomicI64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn allocate_key(&self) -> Result<R::Key> {
        let value = match R::Key::KIND {
            KeyKind::String => KeyValue::Text(uuid::Uuid::new_v4().to_string()),
            KeyKind::Int32 | KeyKind::Int64 => {
                KeyValue::Int(self.last_key.fetch_add(1, Ordering::SeqCst) + 1)
            }
        };
        R::Key::from_key_value(value)
    }

    fn note_key(&self, key: &R::Key) {
        if let KeyValue::Int(v) = key.to_key_value() {
            self.last_key.fetch_max(v, Ordering::SeqCst);
        }
    }

    fn store(&self, mut record: R) -> Result<R> {
        let requested = record.key();

        if !requested.is_unset() {
            return match self.rows.entry(requested.clone()) {
                Entry::Occupied(_) => Err(Error::DuplicateKey(format!(
                    "{}/{requested}",
                    self.shape.table
                ))),
                Entry::Vacant(slot) => {
                    self.note_key(&requested);
                    slot.insert(Row {
                        sequence: self.next_sequence(),
                        record: record.clone(),
                    });
                    Ok(record)
                }
            };
        }

        // Keys supplied by callers can sit ahead of the allocator, so skip
        // over any that are taken.
        loop {
            let key = self.allocate_key()?;
            if let Entry::Vacant(slot) = self.rows.entry(key.clone()) {
                record.set_key(key);
                slot.insert(Row {
                    sequence: self.next_sequence(),
                    record: record.clone(),
                });
                return Ok(record);
            }
        }
    }

    fn replace(&self, record: R) -> Option<R> {
        let mut row = self.rows.get_mut(&record.key())?;
        row.record = record.clone();
        Some(record)
    }

    fn snapshot(&self) -> Vec<R> {
        let mut rows: Vec<Row<R>> = self.rows.iter().map(|entry| entry.value().clone()).collect();
        rows.sort_by_key(|row| row.sequence);
        rows.into_iter().map(|row| row.record).collect()
    }
}

#[async_trait]
impl<R: Entity> Repository<R> for MemoryTable<R> {
    fn shape(&self) -> &Shape<R> {
        &self.shape
    }

    async fn fetch_all(&self) -> Result<Vec<R>> {
        Ok(self.snapshot())
    }

    async fn fetch_filtered(&self, filter: &QueryFilter) -> Result<Vec<R>> {
        filter_in_memory(&self.shape, filter, self.snapshot())
    }

    async fn fetch_by_id(&self, id: &R::Key) -> Result<Option<R>> {
        Ok(self.rows.get(id).map(|row| row.record.clone()))
    }

    async fn insert(&self, record: R) -> Result<R> {
        let stored = self.store(record)?;
        tracing::debug!(table = %self.shape.table, key = %stored.key(), "Inserted record");
        Ok(stored)
    }

    async fn update(&self, record: R) -> Result<R> {
        let key = record.key();
        self.replace(record)
            .ok_or_else(|| not_found::<R>(&self.shape.table, &key))
    }

    async fn delete_by_id(&self, id: &R::Key) -> Result<bool> {
        let removed = self.rows.remove(id).is_some();
        if removed {
            tracing::debug!(table = %self.shape.table, key = %id, "Deleted record");
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<()> {
        self.rows.clear();
        tracing::debug!(table = %self.shape.table, "Cleared table");
        Ok(())
    }
}
