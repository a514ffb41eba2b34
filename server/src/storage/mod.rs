//! Storage adapters.
//!
//! Every backend implements the same [`Repository`] contract, so callers
//! (routes, the sync coordinator, tests) are written once and the backend is
//! chosen at startup.

pub mod document;
pub mod http;
pub mod memory;
pub mod sqlite;

pub use document::{DocumentStore, DocumentTable, FileDocumentStore, MemoryDocumentStore};
pub use http::HttpTable;
pub use memory::MemoryTable;
pub use sqlite::{OrmTable, SqlTable};

use async_trait::async_trait;
use quarry_engine::{CompiledFilter, Entity, Error, QueryFilter, Result, Shape};
use serde_json::Value;

/// Uniform CRUD contract implemented by every backend.
///
/// "Not found" is an expected outcome: lookups return `None` and deletes
/// return `false`. Only `update` reports it as [`Error::NotFound`].
#[async_trait]
pub trait Repository<R: Entity>: Send + Sync {
    /// Shape of the stored record type.
    fn shape(&self) -> &Shape<R>;

    fn table(&self) -> &str {
        &self.shape().table
    }

    /// Every record, in the backend's natural order.
    async fn fetch_all(&self) -> Result<Vec<R>>;

    /// Records matching a filter. Projection is ignored.
    async fn fetch_filtered(&self, filter: &QueryFilter) -> Result<Vec<R>>;

    /// Records matching a filter, serialized with only the included fields.
    async fn fetch_projected(&self, filter: &QueryFilter) -> Result<Vec<Value>> {
        let compiled = CompiledFilter::compile(self.shape(), filter)?;
        let records = self.fetch_filtered(filter).await?;
        records.iter().map(|r| compiled.project(r)).collect()
    }

    async fn fetch_by_id(&self, id: &R::Key) -> Result<Option<R>>;

    /// Store a new record. An unset key is assigned by the backend.
    async fn insert(&self, record: R) -> Result<R>;

    async fn update(&self, record: R) -> Result<R>;

    async fn delete_by_id(&self, id: &R::Key) -> Result<bool>;

    async fn delete_record(&self, record: &R) -> Result<bool> {
        self.delete_by_id(&record.key()).await
    }

    async fn delete_all(&self) -> Result<()>;
}

/// Compile and apply a filter to a fully loaded record set.
pub fn filter_in_memory<R>(shape: &Shape<R>, filter: &QueryFilter, records: Vec<R>) -> Result<Vec<R>> {
    let compiled = CompiledFilter::compile(shape, filter)?;
    if filter.is_identity() {
        return Ok(records);
    }
    Ok(compiled.evaluate(records))
}

/// Build and validate the shape for an entity.
pub fn entity_shape<R: Entity>() -> Result<Shape<R>> {
    let shape = R::shape();
    shape.validate(<R::Key as quarry_engine::RecordKey>::KIND)?;
    Ok(shape)
}

/// Error for an update whose key does not exist.
pub fn not_found<R: Entity>(table: &str, key: &R::Key) -> Error {
    Error::NotFound(format!("{table}/{key}"))
}
