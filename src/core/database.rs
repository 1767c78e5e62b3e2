use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::analysis::tokenizer::TokenizerHook;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::{value_to_key, Row, Value};
use crate::orm::sync as orm_sync;
use crate::writer::row_writer;
use crate::query::cache::{CacheStats, QueryCache};
use crate::query::context::Ctx;
use crate::query::descriptor::{Query, QueryResult};
use crate::query::dispatcher;
use crate::query::functions::FunctionRegistry;
use crate::schema::table::{SchemaRegistry, TableSchema};
use crate::search::prefix::PrefixIndex;
use crate::storage::adapter::{
    idx_table, search_fuzzy_table, search_table, search_tokens_table, RangeSpec, StorageAdapter,
    TableShape,
};
use crate::storage::memory::MemoryBackend;

/// The embedded database core: one adapter, the registered table
/// descriptors, the per-table result cache, the function registry and the
/// in-memory trie indexes. All query execution flows through
/// [`Database::query`].
pub struct Database {
    config: Config,
    adapter: Arc<dyn StorageAdapter>,
    schema: RwLock<SchemaRegistry>,
    functions: RwLock<FunctionRegistry>,
    cache: QueryCache,
    tries: RwLock<HashMap<(String, String), PrefixIndex>>,
    tokenizer_hook: Option<TokenizerHook>,
}

impl Database {
    /// Connect through the given storage adapter.
    pub fn connect(adapter: Arc<dyn StorageAdapter>, config: Config) -> Result<Self> {
        adapter.connect()?;
        Ok(Database {
            cache: QueryCache::new(config.cache_entries_per_table),
            config,
            adapter,
            schema: RwLock::new(SchemaRegistry::new()),
            functions: RwLock::new(FunctionRegistry::with_builtins()),
            tries: RwLock::new(HashMap::new()),
            tokenizer_hook: None,
        })
    }

    /// Connect over the built-in memory backend.
    pub fn connect_memory(config: Config) -> Result<Self> {
        Database::connect(Arc::new(MemoryBackend::new()), config)
    }

    /// Replace the tokenizer pipeline with a user hook; returning `None`
    /// from the hook falls back to the built-in pipeline.
    pub fn with_tokenizer_hook(mut self, hook: TokenizerHook) -> Self {
        self.tokenizer_hook = Some(hook);
        self
    }

    /// Register a table: validate it against the view graph, create its
    /// backing table and every derived index table, and (re)build its trie
    /// indexes from whatever the backend already holds.
    pub fn register_table(&self, table: TableSchema) -> Result<()> {
        let name = table.name.clone();
        self.schema.write().register(table)?;
        let registry = self.schema.read();
        let schema = registry.get(&name)?;

        self.adapter.make_table(
            &name,
            TableShape {
                primary_key: schema.primary_key.clone(),
                pk_numeric: schema.pk_numeric,
            },
        )?;
        let derived_shape = || TableShape {
            primary_key: "id".to_string(),
            pk_numeric: false,
        };
        for column in &schema.secondary_indexes {
            self.adapter
                .make_table(&idx_table(&name, column), derived_shape())?;
        }
        for column in schema.search_columns.keys() {
            self.adapter
                .make_table(&search_table(&name, column), derived_shape())?;
            self.adapter
                .make_table(&search_fuzzy_table(&name, column), derived_shape())?;
            self.adapter
                .make_table(&search_tokens_table(&name, column), derived_shape())?;
        }

        if !schema.trie_columns.is_empty() {
            let mut tries = self.tries.write();
            for column in &schema.trie_columns {
                tries.insert((name.clone(), column.clone()), PrefixIndex::new());
            }
            self.adapter
                .range_read(&name, RangeSpec::FULL, &mut |row: Row, _| {
                    let pk = row.get(&schema.primary_key).and_then(value_to_key);
                    for column in &schema.trie_columns {
                        if let (Some(pk), Some(value)) = (&pk, row.get(column)) {
                            if !value.is_null() {
                                if let Some(trie) =
                                    tries.get_mut(&(name.clone(), column.clone()))
                                {
                                    trie.insert(&value.stringify(), pk.clone());
                                }
                            }
                        }
                    }
                    Ok(())
                })?;
        }

        debug!(table = %name, "table registered");
        Ok(())
    }

    /// Execute one structured query.
    pub fn query(&self, query: &Query) -> Result<QueryResult> {
        self.with_ctx(|ctx| dispatcher::execute(ctx, query))
    }

    fn with_ctx<R>(&self, f: impl FnOnce(&Ctx) -> Result<R>) -> Result<R> {
        let schema = self.schema.read();
        let functions = self.functions.read();
        let ctx = Ctx {
            config: &self.config,
            adapter: self.adapter.as_ref(),
            schema: &schema,
            functions: &functions,
            tries: &self.tries,
            cache: &self.cache,
            tokenizer_hook: self.tokenizer_hook.as_ref(),
        };
        f(&ctx)
    }

    pub fn register_scalar_function<F>(&self, name: &str, f: F)
    where
        F: Fn(&Row, &[String]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.write().register_scalar(name, f);
    }

    pub fn register_aggregate_function<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Row], &[String]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.write().register_aggregate(name, f);
    }

    /// Recovery routine: push every row of a table back through the write
    /// path with the search-rebuild flag set, rewriting its word records
    /// and token records from scratch.
    pub fn rebuild_search_index(&self, table: &str) -> Result<()> {
        self.with_ctx(|ctx| {
            let schema = ctx.schema.get(table)?;
            let flags = row_writer::WriteFlags {
                skip_orm: true,
                rebuild_search: true,
                depth: 0,
            };
            for row in all_rows(ctx, table)? {
                row_writer::write_row(ctx, schema, row, &flags)?;
            }
            Ok(())
        })
    }

    /// Recovery routine: re-assert the ORM back-references held by every
    /// row of a table. Add-only; it does not undo references a desynced
    /// remote row still carries.
    pub fn rebuild_orm(&self, table: &str) -> Result<()> {
        self.with_ctx(|ctx| {
            let schema = ctx.schema.get(table)?;
            for row in all_rows(ctx, table)? {
                if let Some(pk) = row.get(&schema.primary_key).and_then(value_to_key) {
                    orm_sync::sync_on_write(ctx, schema, None, &row, &pk, 0)?;
                }
            }
            Ok(())
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn disconnect(&self) -> Result<()> {
        self.adapter.disconnect()
    }

    /// Tear down adapter state, descriptors, caches and tries.
    pub fn destroy(&self) -> Result<()> {
        self.adapter.destroy()?;
        let mut schema = self.schema.write();
        for table in schema.table_names() {
            schema.remove(&table);
        }
        self.cache.clear();
        self.tries.write().clear();
        Ok(())
    }
}

fn all_rows(ctx: &Ctx, table: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    ctx.adapter.range_read(table, RangeSpec::FULL, &mut |row, _| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}
