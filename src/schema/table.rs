use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::error::{Error, Result};
use crate::core::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Int,
    Float,
    String,
    Bool,
    Array,
    Object,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub default: Option<Value>,
}

/// How a search-indexed column turns text into index terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenizeMode {
    /// Normalized form is the lowercased word itself.
    Raw,
    /// Metaphone over the stemmed word.
    English,
    EnglishStem,
    EnglishMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchColumn {
    pub boost: f64,
    pub mode: TokenizeMode,
}

/// On source-row deletion, Live projections are nulled; Ghost projections
/// keep the last copied snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewMode {
    Live,
    Ghost,
}

/// A denormalized projection: columns copied into this table from a row of
/// `source_table`, addressed by the local `pk_column` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDef {
    pub source_table: String,
    /// Local column holding the source row's primary key.
    pub pk_column: String,
    /// Pairs of (local column, source column).
    pub columns: Vec<(String, String)>,
    pub mode: ViewMode,
}

/// A directed ORM edge. For every value `q` in `this_column` of row `p`,
/// the related row `from_table[q].from_column` must reference `p` back,
/// scalar or as an array member depending on arity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrmEdge {
    pub this_column: String,
    pub this_many: bool,
    pub from_table: String,
    pub from_column: String,
    pub from_many: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub primary_key: String,
    pub pk_numeric: bool,
    pub columns: Vec<ColumnDef>,
    pub secondary_indexes: BTreeSet<String>,
    pub search_columns: BTreeMap<String, SearchColumn>,
    pub trie_columns: BTreeSet<String>,
    pub views: Vec<ViewDef>,
    pub orm_edges: Vec<OrmEdge>,
}

impl TableSchema {
    pub fn new(name: &str, primary_key: &str, pk_numeric: bool) -> Self {
        TableSchema {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            pk_numeric,
            columns: Vec::new(),
            secondary_indexes: BTreeSet::new(),
            search_columns: BTreeMap::new(),
            trie_columns: BTreeSet::new(),
            views: Vec::new(),
            orm_edges: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, kind: ColumnKind) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            kind,
            default: None,
        });
        self
    }

    pub fn column_with_default(mut self, name: &str, kind: ColumnKind, default: Value) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            kind,
            default: Some(default),
        });
        self
    }

    pub fn index(mut self, column: &str) -> Self {
        self.secondary_indexes.insert(column.to_string());
        self
    }

    pub fn search(mut self, column: &str, boost: f64, mode: TokenizeMode) -> Self {
        self.search_columns
            .insert(column.to_string(), SearchColumn { boost, mode });
        self
    }

    pub fn trie(mut self, column: &str) -> Self {
        self.trie_columns.insert(column.to_string());
        self
    }

    pub fn view(mut self, view: ViewDef) -> Self {
        self.views.push(view);
        self
    }

    pub fn orm(mut self, edge: OrmEdge) -> Self {
        self.orm_edges.push(edge);
        self
    }

    pub fn orm_edge_for(&self, column: &str) -> Option<&OrmEdge> {
        self.orm_edges.iter().find(|e| e.this_column == column)
    }
}

/// All registered table descriptors. Remote-view fan-out and view-cycle
/// rejection both derive from the same view graph.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry {
            tables: BTreeMap::new(),
        }
    }

    /// Register a table. View pk columns are promoted to secondary indexes
    /// so remote projection fan-out is a single index read, and a view
    /// graph that would cycle is rejected outright.
    pub fn register(&mut self, mut schema: TableSchema) -> Result<()> {
        for view in &schema.views {
            schema.secondary_indexes.insert(view.pk_column.clone());
        }
        let name = schema.name.clone();
        self.tables.insert(name.clone(), schema);

        if let Some(cycle_at) = self.find_view_cycle() {
            self.tables.remove(&name);
            return Err(Error::schema(format!(
                "view projection cycle through table '{}'",
                cycle_at
            )));
        }
        Ok(())
    }

    pub fn get(&self, table: &str) -> Result<&TableSchema> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::schema(format!("unknown table '{}'", table)))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn remove(&mut self, table: &str) {
        self.tables.remove(table);
    }

    /// Tables that project columns out of `source`, with the view doing it.
    pub fn remote_views<'a>(&'a self, source: &str) -> Vec<(&'a TableSchema, &'a ViewDef)> {
        let mut out = Vec::new();
        for schema in self.tables.values() {
            for view in &schema.views {
                if view.source_table == source {
                    out.push((schema, view));
                }
            }
        }
        out
    }

    /// DFS over the projects-from graph. Returns a table on a cycle, if any.
    /// Edges to tables not yet registered are ignored.
    fn find_view_cycle(&self) -> Option<String> {
        fn visit(
            registry: &SchemaRegistry,
            node: &str,
            active: &mut BTreeSet<String>,
            done: &mut BTreeSet<String>,
        ) -> Option<String> {
            if done.contains(node) {
                return None;
            }
            let schema = registry.tables.get(node)?;
            if !active.insert(node.to_string()) {
                return Some(node.to_string());
            }
            for view in &schema.views {
                if let Some(found) = visit(registry, &view.source_table, active, done) {
                    return Some(found);
                }
            }
            active.remove(node);
            done.insert(node.to_string());
            None
        }

        let mut active = BTreeSet::new();
        let mut done = BTreeSet::new();
        for name in self.tables.keys().cloned().collect::<Vec<_>>() {
            if let Some(found) = visit(self, &name, &mut active, &mut done) {
                return Some(found);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(source: &str, pk_column: &str) -> ViewDef {
        ViewDef {
            source_table: source.to_string(),
            pk_column: pk_column.to_string(),
            columns: vec![("userName".to_string(), "name".to_string())],
            mode: ViewMode::Live,
        }
    }

    #[test]
    fn view_pk_column_becomes_secondary_index() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                TableSchema::new("orders", "id", true)
                    .column("userId", ColumnKind::Int)
                    .view(view("users", "userId")),
            )
            .unwrap();
        assert!(registry
            .get("orders")
            .unwrap()
            .secondary_indexes
            .contains("userId"));
    }

    #[test]
    fn cyclic_view_graph_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(TableSchema::new("a", "id", true).view(view("b", "bId")))
            .unwrap();
        let err = registry
            .register(TableSchema::new("b", "id", true).view(view("a", "aId")))
            .unwrap_err();
        assert!(err.context.contains("cycle"));
        // the failed registration must not leave the table behind
        assert!(!registry.contains("b"));
    }

    #[test]
    fn remote_views_lists_projecting_tables() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(TableSchema::new("users", "id", true))
            .unwrap();
        registry
            .register(TableSchema::new("orders", "id", true).view(view("users", "userId")))
            .unwrap();
        let remotes = registry.remote_views("users");
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].0.name, "orders");
    }
}
