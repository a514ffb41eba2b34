//! # Quarry Engine
//!
//! Backend-agnostic query filters and offline sync planning.
//!
//! This crate holds the pure logic behind Quarry's repository layer: typed
//! record shapes, a serializable filter description, the comparators that
//! evaluate it in memory, the renderer that turns it into parameterized SQL,
//! and the bookkeeping used to replay offline writes against a remote backend.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or databases
//! - **Resolve once**: Field names are resolved against a [`Shape`] when a
//!   filter is compiled, never per record
//! - **Fail loudly**: Unknown fields, illegal operators and unparseable
//!   literals are errors, not empty results
//! - **Bound values only**: Rendered SQL never contains caller-supplied text
//!
//! ## Core Concepts
//!
//! ### Shapes
//!
//! A record type implements [`Entity`] and describes itself with a
//! [`Shape`]: table name, identity field and a typed getter per field.
//!
//! ### Filters
//!
//! A [`QueryFilter`] is a flat AND of [`FilterCondition`]s with optional
//! ordering and projection:
//! - [`CompiledFilter`] - evaluates it over records in memory
//! - [`SqlRenderer`] - renders it as a parameterized `SELECT`
//!
//! ### Sync
//!
//! Offline writes become [`PendingMutation`]s. A [`ReplayPass`] plans each
//! remote call, translating provisional identities through a [`KeyMap`].
//!
//! ## Quick Start
//!
//! ```rust
//! use quarry_engine::{CompiledFilter, ComparisonOp, Entity, FieldType, QueryFilter, Shape};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Customer {
//!     id: i32,
//!     name: String,
//! }
//!
//! impl Entity for Customer {
//!     type Key = i32;
//!
//!     fn shape() -> Shape<Self> {
//!         Shape::<Self>::new("customers", "id")
//!             .field("id", FieldType::Int32, |c| c.id.into())
//!             .field("name", FieldType::String, |c| c.name.clone().into())
//!     }
//!
//!     fn key(&self) -> i32 {
//!         self.id
//!     }
//!
//!     fn set_key(&mut self, key: i32) {
//!         self.id = key;
//!     }
//! }
//!
//! let records = vec![
//!     Customer { id: 1, name: "Isadora Jarr".into() },
//!     Customer { id: 2, name: "Jenny Jones".into() },
//! ];
//!
//! let filter = QueryFilter::new()
//!     .filter("Name", ComparisonOp::StartsWith, "j")
//!     .order_by("Name");
//!
//! let matched = CompiledFilter::compile(&Customer::shape(), &filter)
//!     .unwrap()
//!     .evaluate(records);
//! assert_eq!(matched.len(), 1);
//! assert_eq!(matched[0].name, "Jenny Jones");
//! ```

pub mod compare;
pub mod error;
pub mod filter;
pub mod keymap;
pub mod mutation;
pub mod query;
pub mod replay;
pub mod shape;
pub mod sql;
pub mod value;

// Re-export main types at crate root
pub use compare::{check_operator, Comparator};
pub use error::{Error, Result};
pub use filter::{ComparisonOp, FilterCondition, QueryFilter};
pub use keymap::{KeyMap, KeyMapping};
pub use mutation::{ChangeEvent, MutationKind, PendingMutation};
pub use query::CompiledFilter;
pub use replay::{
    remote_insert_copy, FailureOutcome, ReplayPass, ReplayReport, ReplayStep, DEFAULT_MAX_ATTEMPTS,
};
pub use shape::{Entity, Field, KeyKind, KeyValue, RecordKey, Shape, PROVISIONAL_PREFIX};
pub use sql::{Dialect, SqlParam, SqlRenderer, SqlStatement};
pub use value::{canonical_timestamp, parse_datetime, FieldType, FieldValue};
