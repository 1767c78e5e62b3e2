//! burrow — query execution core of an embedded, multi-backend row
//! database.
//!
//! A structured [`Query`] descriptor is dispatched against a pluggable
//! [`StorageAdapter`] offering point and range operations. On top of that
//! seam the core maintains secondary indexes, tokenized full-text search
//! indexes (exact and fuzzy), trie prefix indexes, denormalized view
//! projections and ORM back-references, and serves reads through a
//! per-table result cache keyed by query fingerprint.

pub mod analysis;
pub mod core;
pub mod index;
pub mod orm;
pub mod query;
pub mod schema;
pub mod search;
pub mod storage;
pub mod view;
pub mod writer;

pub use crate::core::config::Config;
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{Row, RowKey, Value};
pub use crate::query::descriptor::{
    Action, ActionArgs, Condition, JoinArgs, JoinType, Operator, OrmArgs, OrmInclude, Query,
    QueryResult, SortOrder, TableRef, TrieArgs, WhereExpr, WhereItem, WriteSummary,
};
pub use crate::schema::table::{
    ColumnDef, ColumnKind, OrmEdge, SearchColumn, TableSchema, TokenizeMode, ViewDef, ViewMode,
};
pub use crate::storage::adapter::{RangeSpec, StorageAdapter, TableShape};
pub use crate::storage::memory::MemoryBackend;
