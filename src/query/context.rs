use parking_lot::RwLock;
use std::collections::HashMap;

use crate::analysis::tokenizer::TokenizerHook;
use crate::core::config::Config;
use crate::query::cache::QueryCache;
use crate::query::functions::FunctionRegistry;
use crate::schema::table::SchemaRegistry;
use crate::search::prefix::PrefixIndex;
use crate::storage::adapter::StorageAdapter;

/// Everything a component needs to execute a query. One context object is
/// threaded through dispatcher, selector, mutator, writer, projector and
/// synchronizer; there is no hidden global state.
pub struct Ctx<'a> {
    pub config: &'a Config,
    pub adapter: &'a dyn StorageAdapter,
    pub schema: &'a SchemaRegistry,
    pub functions: &'a FunctionRegistry,
    /// In-memory prefix indexes, one per (table, trie column).
    pub tries: &'a RwLock<HashMap<(String, String), PrefixIndex>>,
    pub cache: &'a QueryCache,
    pub tokenizer_hook: Option<&'a TokenizerHook>,
}
