use crate::core::error::Result;
use crate::core::types::{Row, RowKey};

/// What an adapter needs to know to create a table.
#[derive(Debug, Clone)]
pub struct TableShape {
    pub primary_key: String,
    pub pk_numeric: bool,
}

/// Bounds for a range read: positional over pk order, or by pk value
/// (inclusive on both ends, the BETWEEN contract).
#[derive(Debug, Clone, Copy)]
pub enum RangeSpec<'a> {
    Offsets { from: usize, to: usize },
    Keys { from: &'a RowKey, to: &'a RowKey },
}

impl RangeSpec<'_> {
    pub const FULL: RangeSpec<'static> = RangeSpec::Offsets {
        from: 0,
        to: usize::MAX,
    };
}

/// Uniform point/range surface over a backend. The core only ever talks to
/// storage through this trait; backends (memory, LevelDB-style stores,
/// SQLite, ...) live behind it.
///
/// Rows handed out by an adapter are treated as frozen: every mutation path
/// in the core copies before writing.
pub trait StorageAdapter: Send + Sync {
    fn connect(&self) -> Result<()>;
    fn disconnect(&self) -> Result<()>;

    fn make_table(&self, name: &str, shape: TableShape) -> Result<()>;

    /// Write a row. `pk = None` asks the adapter to assign one: monotone
    /// for numeric-pk tables, uuid for string-pk tables. Returns the stored
    /// row with its primary key set.
    fn write(&self, table: &str, pk: Option<&RowKey>, row: Row) -> Result<Row>;

    fn read(&self, table: &str, pk: &RowKey) -> Result<Option<Row>>;

    /// Point-read many keys. Missing keys are skipped, not errors.
    fn batch_read(&self, table: &str, pks: &[RowKey]) -> Result<Vec<Row>>;

    /// Stream rows in pk order through `per_row` with their scan index.
    fn range_read(
        &self,
        table: &str,
        range: RangeSpec,
        per_row: &mut dyn FnMut(Row, usize) -> Result<()>,
    ) -> Result<()>;

    fn delete(&self, table: &str, pk: &RowKey) -> Result<()>;

    fn drop_table(&self, table: &str) -> Result<()>;

    /// All primary keys of a table, in order.
    fn index_keys(&self, table: &str) -> Result<Vec<RowKey>>;

    fn row_count(&self, table: &str) -> Result<usize>;

    /// Tear down everything the adapter holds.
    fn destroy(&self) -> Result<()>;
}

// Reserved table names in the adapter namespace. The core owns these
// prefixes; user tables must not collide with them.

pub fn idx_table(table: &str, column: &str) -> String {
    format!("_{}_idx_{}", table, column)
}

pub fn search_table(table: &str, column: &str) -> String {
    format!("_{}_search_{}", table, column)
}

pub fn search_fuzzy_table(table: &str, column: &str) -> String {
    format!("_{}_search_fuzzy_{}", table, column)
}

pub fn search_tokens_table(table: &str, column: &str) -> String {
    format!("_{}_search_tokens_{}", table, column)
}
