use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::types::{Row, RowKey, Value};

/// Free-form row predicate supplied by the caller in place of a WHERE tree.
/// Forces a full table scan and makes the query uncacheable.
pub type RowPredicate = Arc<dyn Fn(&Row, usize) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Select,
    Upsert,
    Delete,
    Drop,
    ShowTables,
    Describe,
}

/// Queries run against a named table or an ad-hoc in-memory row list.
#[derive(Debug, Clone, Serialize)]
pub enum TableRef {
    Name(String),
    Rows(Vec<Row>),
}

#[derive(Debug, Clone, Serialize)]
pub enum ActionArgs {
    None,
    /// Selection expressions: plain paths, `table.*`, or
    /// `FN(arg, ...) AS alias`.
    Columns(Vec<String>),
    /// The row being upserted.
    Row(Row),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Regex,
    Like,
    NotLike,
    Between,
    Have,
    NotHave,
    Intersect,
    NotIntersect,
}

/// A WHERE leaf: dotted path (optionally `.length`-suffixed, or a
/// `search(col, ...)` expression), operator, comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub path: String,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(path: &str, op: Operator, value: Value) -> Self {
        Condition {
            path: path.to_string(),
            op,
            value,
        }
    }
}

/// WHERE trees are either a single leaf or a flat list of leaves joined by
/// connectives, evaluated left-to-right without precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WhereExpr {
    Leaf(Condition),
    List(Vec<WhereItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WhereItem {
    Cond(Condition),
    And,
    Or,
}

impl WhereExpr {
    pub fn leaf(path: &str, op: Operator, value: Value) -> Self {
        WhereExpr::Leaf(Condition::new(path, op, value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Left,
    Inner,
    Right,
    Outer,
    Cross,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinArgs {
    pub kind: JoinType,
    pub table: String,
    /// `(left path, operator, right path)`; absent for cross joins.
    pub on: Option<(String, Operator, String)>,
}

/// Prefix lookup over a trie-indexed column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrieArgs {
    pub column: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum OrmInclude {
    /// Expand the relation behind this column with default settings.
    Key(String),
    Spec(OrmArgs),
}

#[derive(Debug, Clone, Serialize)]
pub struct OrmArgs {
    pub key: String,
    pub select: Option<Vec<String>>,
    pub where_: Option<WhereExpr>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order_by: Vec<(String, SortOrder)>,
    pub group_by: Vec<(String, SortOrder)>,
}

impl OrmArgs {
    pub fn key(key: &str) -> Self {
        OrmArgs {
            key: key.to_string(),
            select: None,
            where_: None,
            limit: None,
            offset: None,
            order_by: Vec::new(),
            group_by: Vec::new(),
        }
    }
}

/// A structured query. Queries arrive pre-built; there is no string query
/// language in the core.
#[derive(Clone, Serialize)]
pub struct Query {
    pub action: Action,
    pub table: TableRef,
    pub args: ActionArgs,
    pub where_: Option<WhereExpr>,
    #[serde(skip)]
    pub where_fn: Option<RowPredicate>,
    /// `(limit, offset)` over pk order; a negative limit counts from the
    /// tail of the table.
    pub range: Option<(i64, usize)>,
    pub trie: Option<TrieArgs>,
    pub join: Option<JoinArgs>,
    pub group_by: Vec<(String, SortOrder)>,
    pub order_by: Vec<(String, SortOrder)>,
    pub having: Option<WhereExpr>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub orm: Vec<OrmInclude>,
    /// Execution flags riding along with the query, e.g. `_orm_skip`,
    /// `_rebuild_search_index`.
    pub comments: Vec<String>,
    /// Transient id; cleared before fingerprinting.
    pub query_id: Option<String>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("action", &self.action)
            .field("table", &self.table)
            .field("where_", &self.where_)
            .field("has_where_fn", &self.where_fn.is_some())
            .finish_non_exhaustive()
    }
}

impl Query {
    pub fn new(action: Action, table: TableRef) -> Self {
        Query {
            action,
            table,
            args: ActionArgs::None,
            where_: None,
            where_fn: None,
            range: None,
            trie: None,
            join: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            having: None,
            offset: None,
            limit: None,
            orm: Vec::new(),
            comments: Vec::new(),
            query_id: None,
        }
    }

    pub fn select(table: &str) -> Self {
        Query::new(Action::Select, TableRef::Name(table.to_string()))
    }

    pub fn upsert(table: &str, row: Row) -> Self {
        let mut q = Query::new(Action::Upsert, TableRef::Name(table.to_string()));
        q.args = ActionArgs::Row(row);
        q
    }

    pub fn delete(table: &str) -> Self {
        Query::new(Action::Delete, TableRef::Name(table.to_string()))
    }

    pub fn drop(table: &str) -> Self {
        Query::new(Action::Drop, TableRef::Name(table.to_string()))
    }

    pub fn show_tables() -> Self {
        Query::new(Action::ShowTables, TableRef::Name(String::new()))
    }

    pub fn describe(table: &str) -> Self {
        Query::new(Action::Describe, TableRef::Name(table.to_string()))
    }

    pub fn where_(mut self, expr: WhereExpr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn where_fn(mut self, f: RowPredicate) -> Self {
        self.where_fn = Some(f);
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.args = ActionArgs::Columns(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn range(mut self, limit: i64, offset: usize) -> Self {
        self.range = Some((limit, offset));
        self
    }

    pub fn trie(mut self, column: &str, prefix: &str) -> Self {
        self.trie = Some(TrieArgs {
            column: column.to_string(),
            prefix: prefix.to_string(),
        });
        self
    }

    pub fn join(mut self, join: JoinArgs) -> Self {
        self.join = Some(join);
        self
    }

    pub fn group_by(mut self, column: &str, order: SortOrder) -> Self {
        self.group_by.push((column.to_string(), order));
        self
    }

    pub fn order_by(mut self, column: &str, order: SortOrder) -> Self {
        self.order_by.push((column.to_string(), order));
        self
    }

    pub fn having(mut self, expr: WhereExpr) -> Self {
        self.having = Some(expr);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn orm(mut self, include: OrmInclude) -> Self {
        self.orm.push(include);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comments.push(comment.to_string());
        self
    }

    pub fn has_comment(&self, comment: &str) -> bool {
        self.comments.iter().any(|c| c == comment)
    }

    pub fn table_name(&self) -> Option<&str> {
        match &self.table {
            TableRef::Name(name) => Some(name),
            TableRef::Rows(_) => None,
        }
    }
}

/// Result envelope for writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteSummary {
    pub msg: String,
    pub affected_pks: Vec<RowKey>,
    pub affected_rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryResult {
    Rows(Vec<Row>),
    Write(WriteSummary),
}

impl QueryResult {
    pub fn rows(self) -> Vec<Row> {
        match self {
            QueryResult::Rows(rows) => rows,
            QueryResult::Write(summary) => summary.affected_rows,
        }
    }

    pub fn write_summary(self) -> Option<WriteSummary> {
        match self {
            QueryResult::Write(summary) => Some(summary),
            QueryResult::Rows(_) => None,
        }
    }
}
