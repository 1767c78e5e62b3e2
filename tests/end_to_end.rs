use std::sync::Arc;

use burrow::{
    ColumnKind, Condition, Config, Database, JoinArgs, JoinType, MemoryBackend, Operator, OrmArgs,
    OrmEdge, OrmInclude, Query, QueryResult, Row, RowKey, SortOrder, StorageAdapter, TableRef,
    TableSchema, TokenizeMode, Value, ViewDef, ViewMode, WhereExpr, WhereItem,
};

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn num(n: f64) -> Value {
    Value::Number(n)
}

fn text(s: &str) -> Value {
    Value::String(s.to_string())
}

fn rows_of(result: QueryResult) -> Vec<Row> {
    match result {
        QueryResult::Rows(rows) => rows,
        QueryResult::Write(summary) => summary.affected_rows,
    }
}

fn ids(rows: &[Row]) -> Vec<f64> {
    rows.iter()
        .filter_map(|r| r.get("id").and_then(Value::as_f64))
        .collect()
}

/// docs{id PK, body search(english-meta, boost 1)} with two sample rows.
fn docs_db() -> Database {
    let db = Database::connect_memory(Config::default()).unwrap();
    db.register_table(
        TableSchema::new("docs", "id", true)
            .column("body", ColumnKind::String)
            .search("body", 1.0, TokenizeMode::EnglishMeta),
    )
    .unwrap();
    db.query(&Query::upsert(
        "docs",
        row(&[("id", num(1.0)), ("body", text("The quick brown fox"))]),
    ))
    .unwrap();
    db.query(&Query::upsert(
        "docs",
        row(&[("id", num(2.0)), ("body", text("Slow brown dog"))]),
    ))
    .unwrap();
    db
}

fn users_db() -> Database {
    let db = Database::connect_memory(Config::default()).unwrap();
    db.register_table(
        TableSchema::new("users", "id", true)
            .column("age", ColumnKind::Int)
            .column("city", ColumnKind::String)
            .index("age")
            .index("city"),
    )
    .unwrap();
    for (id, age, city) in [(1.0, 30.0, "A"), (2.0, 30.0, "B"), (3.0, 40.0, "A")] {
        db.query(&Query::upsert(
            "users",
            row(&[("id", num(id)), ("age", num(age)), ("city", text(city))]),
        ))
        .unwrap();
    }
    db
}

// --- search, index, view and orm scenarios -------------------------------

#[test]
fn search_exact_contiguous_phrase() {
    let db = docs_db();
    let result = db
        .query(&Query::select("docs").where_(WhereExpr::leaf(
            "search(body)",
            Operator::Eq,
            text("brown fox"),
        )))
        .unwrap();
    let rows = rows_of(result);

    assert_eq!(ids(&rows), vec![1.0]);
    let weight = rows[0].get("_weight").and_then(Value::as_f64).unwrap();
    assert!((weight - 1.0).abs() < 1e-9);
    assert!(rows[0].get("_locations").is_some());
}

#[test]
fn search_fuzzy_ranks_by_weight() {
    let db = docs_db();
    let result = db
        .query(&Query::select("docs").where_(WhereExpr::leaf(
            "search(body)",
            Operator::Gt,
            Value::Array(vec![text("browm"), num(0.0)]),
        )))
        .unwrap();
    let rows = rows_of(result);

    assert_eq!(ids(&rows), vec![1.0, 2.0]);
    let w1 = rows[0].get("_weight").and_then(Value::as_f64).unwrap();
    let w2 = rows[1].get("_weight").and_then(Value::as_f64).unwrap();
    assert!((w1 - 1.0).abs() < 1e-9);
    assert!(w2 < w1);
    assert!(w2 > 0.0);
}

#[test]
fn compound_secondary_index_lookup() {
    let db = users_db();
    let result = db
        .query(&Query::select("users").where_(WhereExpr::List(vec![
            WhereItem::Cond(Condition::new("age", Operator::Eq, num(30.0))),
            WhereItem::And,
            WhereItem::Cond(Condition::new("city", Operator::Eq, text("A"))),
        ])))
        .unwrap();
    let rows = rows_of(result);

    assert_eq!(ids(&rows), vec![1.0]);
    assert_eq!(rows[0].get("city"), Some(&text("A")));
}

#[test]
fn orm_array_relation_stays_symmetric() {
    let db = Database::connect_memory(Config::default()).unwrap();
    db.register_table(
        TableSchema::new("posts", "id", true)
            .column("tags", ColumnKind::Array)
            .orm(OrmEdge {
                this_column: "tags".to_string(),
                this_many: true,
                from_table: "tags".to_string(),
                from_column: "posts".to_string(),
                from_many: true,
            }),
    )
    .unwrap();
    db.register_table(
        TableSchema::new("tags", "id", true)
            .column("posts", ColumnKind::Array)
            .orm(OrmEdge {
                this_column: "posts".to_string(),
                this_many: true,
                from_table: "posts".to_string(),
                from_column: "tags".to_string(),
                from_many: true,
            }),
    )
    .unwrap();
    for id in [1.0, 2.0, 3.0] {
        db.query(&Query::upsert(
            "tags",
            row(&[("id", num(id)), ("posts", Value::Array(vec![]))]),
        ))
        .unwrap();
    }

    db.query(&Query::upsert(
        "posts",
        row(&[("id", num(9.0)), ("tags", Value::Array(vec![num(1.0), num(2.0)]))]),
    ))
    .unwrap();

    let tag_posts = |id: f64| -> Vec<f64> {
        let rows = rows_of(
            db.query(&Query::select("tags").where_(WhereExpr::leaf("id", Operator::Eq, num(id))))
                .unwrap(),
        );
        rows[0]
            .get("posts")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default()
    };

    assert_eq!(tag_posts(1.0), vec![9.0]);
    assert_eq!(tag_posts(2.0), vec![9.0]);
    assert_eq!(tag_posts(3.0), Vec::<f64>::new());

    // re-point the relation: 1 loses the back-reference, 3 gains it
    db.query(&Query::upsert(
        "posts",
        row(&[("id", num(9.0)), ("tags", Value::Array(vec![num(2.0), num(3.0)]))]),
    ))
    .unwrap();

    assert_eq!(tag_posts(1.0), Vec::<f64>::new());
    assert_eq!(tag_posts(2.0), vec![9.0]);
    assert_eq!(tag_posts(3.0), vec![9.0]);
}

#[test]
fn live_view_projection_local_and_remote() {
    let db = Database::connect_memory(Config::default()).unwrap();
    db.register_table(
        TableSchema::new("users", "id", true).column("name", ColumnKind::String),
    )
    .unwrap();
    db.register_table(
        TableSchema::new("orders", "id", true)
            .column("userId", ColumnKind::Int)
            .column("userName", ColumnKind::String)
            .view(ViewDef {
                source_table: "users".to_string(),
                pk_column: "userId".to_string(),
                columns: vec![("userName".to_string(), "name".to_string())],
                mode: ViewMode::Live,
            }),
    )
    .unwrap();

    db.query(&Query::upsert(
        "users",
        row(&[("id", num(5.0)), ("name", text("Ada"))]),
    ))
    .unwrap();
    db.query(&Query::upsert(
        "orders",
        row(&[("id", num(1.0)), ("userId", num(5.0))]),
    ))
    .unwrap();

    let order = |id: f64| -> Row {
        rows_of(
            db.query(&Query::select("orders").where_(WhereExpr::leaf("id", Operator::Eq, num(id))))
                .unwrap(),
        )
        .remove(0)
    };
    assert_eq!(order(1.0).get("userName"), Some(&text("Ada")));

    // writing the source row propagates to the projection
    db.query(&Query::upsert(
        "users",
        row(&[("id", num(5.0)), ("name", text("Grace"))]),
    ))
    .unwrap();
    assert_eq!(order(1.0).get("userName"), Some(&text("Grace")));

    // LIVE mode nulls the projection when the source row goes away
    db.query(
        &Query::delete("users").where_(WhereExpr::leaf("id", Operator::Eq, num(5.0))),
    )
    .unwrap();
    assert_eq!(order(1.0).get("userName"), Some(&Value::Null));
}

#[test]
fn inner_join_order_by_limit() {
    let db = Database::connect_memory(Config::default()).unwrap();
    db.register_table(
        TableSchema::new("users", "id", true).column("name", ColumnKind::String),
    )
    .unwrap();
    db.register_table(
        TableSchema::new("orders", "id", true).column("userId", ColumnKind::Int),
    )
    .unwrap();
    for (id, name) in [(1.0, "Carol"), (2.0, "Alice"), (3.0, "Bob")] {
        db.query(&Query::upsert(
            "users",
            row(&[("id", num(id)), ("name", text(name))]),
        ))
        .unwrap();
    }
    for (id, user) in [(10.0, 1.0), (11.0, 2.0), (12.0, 3.0)] {
        db.query(&Query::upsert(
            "orders",
            row(&[("id", num(id)), ("userId", num(user))]),
        ))
        .unwrap();
    }

    let result = db
        .query(
            &Query::select("orders")
                .join(JoinArgs {
                    kind: JoinType::Inner,
                    table: "users".to_string(),
                    on: Some(("orders.userId".to_string(), Operator::Eq, "users.id".to_string())),
                })
                .order_by("users.name", SortOrder::Asc)
                .limit(2),
        )
        .unwrap();
    let rows = rows_of(result);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("users.name"), Some(&text("Alice")));
    assert_eq!(rows[0].get("orders.id"), Some(&num(11.0)));
    assert_eq!(rows[1].get("users.name"), Some(&text("Bob")));
    assert_eq!(rows[1].get("orders.id"), Some(&num(12.0)));
}

// --- quantified invariants ----------------------------------------------

#[test]
fn secondary_index_tracks_row_updates_and_deletes() {
    let backend = Arc::new(MemoryBackend::new());
    let db = Database::connect(backend.clone(), Config::default()).unwrap();
    db.register_table(TableSchema::new("users", "id", true).index("age")).unwrap();

    db.query(&Query::upsert("users", row(&[("id", num(1.0)), ("age", num(30.0))])))
        .unwrap();
    db.query(&Query::upsert("users", row(&[("id", num(1.0)), ("age", num(40.0))])))
        .unwrap();

    // the age=30 record is gone entirely, age=40 holds the pk
    assert!(backend.read("_users_idx_age", &RowKey::Int(30)).unwrap().is_none());
    let record = backend.read("_users_idx_age", &RowKey::Int(40)).unwrap().unwrap();
    assert_eq!(
        record.get("rows"),
        Some(&Value::Array(vec![num(1.0)]))
    );

    db.query(&Query::delete("users").where_(WhereExpr::leaf("id", Operator::Eq, num(1.0))))
        .unwrap();
    assert!(backend.read("_users_idx_age", &RowKey::Int(40)).unwrap().is_none());
}

#[test]
fn search_index_diff_follows_content_changes() {
    let db = Database::connect_memory(Config::default()).unwrap();
    db.register_table(
        TableSchema::new("docs", "id", true).search("body", 1.0, TokenizeMode::Raw),
    )
    .unwrap();

    db.query(&Query::upsert(
        "docs",
        row(&[("id", num(1.0)), ("body", text("alpha beta"))]),
    ))
    .unwrap();
    db.query(&Query::upsert(
        "docs",
        row(&[("id", num(1.0)), ("body", text("alpha gamma"))]),
    ))
    .unwrap();

    let search = |term: &str| -> Vec<f64> {
        ids(&rows_of(
            db.query(&Query::select("docs").where_(WhereExpr::leaf(
                "search(body)",
                Operator::Eq,
                text(term),
            )))
            .unwrap(),
        ))
    };
    assert_eq!(search("alpha"), vec![1.0]);
    assert_eq!(search("gamma"), vec![1.0]);
    assert_eq!(search("beta"), Vec::<f64>::new());
}

#[test]
fn cache_entries_die_on_first_write() {
    let db = users_db();
    let select = Query::select("users").where_(WhereExpr::leaf("age", Operator::Eq, num(30.0)));

    let before = rows_of(db.query(&select).unwrap());
    assert_eq!(before.len(), 2);
    // second run is served from cache
    assert_eq!(rows_of(db.query(&select).unwrap()).len(), 2);
    assert!(db.cache_stats().hit_count >= 1);

    db.query(&Query::upsert(
        "users",
        row(&[("id", num(4.0)), ("age", num(30.0)), ("city", text("C"))]),
    ))
    .unwrap();

    // the write invalidated the cached result
    let after = rows_of(db.query(&select).unwrap());
    assert_eq!(after.len(), 3);
}

#[test]
fn upsert_select_round_trip_and_idempotence() {
    let backend = Arc::new(MemoryBackend::new());
    let db = Database::connect(backend.clone(), Config::default()).unwrap();
    db.register_table(TableSchema::new("users", "id", true).index("age")).unwrap();

    let payload = row(&[("id", num(7.0)), ("age", num(21.0)), ("name", text("Sam"))]);
    db.query(&Query::upsert("users", payload.clone())).unwrap();
    let first = backend.read("users", &RowKey::Int(7)).unwrap().unwrap();

    let selected = rows_of(
        db.query(&Query::select("users").where_(WhereExpr::leaf("id", Operator::Eq, num(7.0))))
            .unwrap(),
    );
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].get("name"), Some(&text("Sam")));

    // applying the identical upsert changes neither row nor index state
    db.query(&Query::upsert("users", payload)).unwrap();
    let second = backend.read("users", &RowKey::Int(7)).unwrap().unwrap();
    assert_eq!(first, second);
    let index_record = backend.read("_users_idx_age", &RowKey::Int(21)).unwrap().unwrap();
    assert_eq!(index_record.get("rows"), Some(&Value::Array(vec![num(7.0)])));
}

#[test]
fn exact_search_requires_order_and_contiguity() {
    let db = docs_db();
    db.query(&Query::upsert(
        "docs",
        row(&[("id", num(3.0)), ("body", text("fox quick brown"))]),
    ))
    .unwrap();

    let result = db
        .query(&Query::select("docs").where_(WhereExpr::leaf(
            "search(body)",
            Operator::Eq,
            text("brown fox"),
        )))
        .unwrap();
    // doc 3 has both words but not adjacent in order
    assert_eq!(ids(&rows_of(result)), vec![1.0]);
}

// --- selector strategies -------------------------------------------------

#[test]
fn pk_between_uses_range_read() {
    let db = users_db();
    let result = db
        .query(&Query::select("users").where_(WhereExpr::leaf(
            "id",
            Operator::Between,
            Value::Array(vec![num(2.0), num(3.0)]),
        )))
        .unwrap();
    assert_eq!(ids(&rows_of(result)), vec![2.0, 3.0]);
}

#[test]
fn secondary_between_and_in() {
    let db = users_db();
    let between = db
        .query(&Query::select("users").where_(WhereExpr::leaf(
            "age",
            Operator::Between,
            Value::Array(vec![num(35.0), num(45.0)]),
        )))
        .unwrap();
    assert_eq!(ids(&rows_of(between)), vec![3.0]);

    let in_list = db
        .query(&Query::select("users").where_(WhereExpr::leaf(
            "city",
            Operator::In,
            Value::Array(vec![text("A"), text("B")]),
        )))
        .unwrap();
    assert_eq!(rows_of(in_list).len(), 3);
}

#[test]
fn fast_list_or_unions_in_first_seen_order() {
    let db = users_db();
    let result = db
        .query(&Query::select("users").where_(WhereExpr::List(vec![
            WhereItem::Cond(Condition::new("age", Operator::Eq, num(40.0))),
            WhereItem::Or,
            WhereItem::Cond(Condition::new("city", Operator::Eq, text("A"))),
        ])))
        .unwrap();
    // age=40 yields 3 first; city=A adds 1 (3 deduplicated)
    assert_eq!(ids(&rows_of(result)), vec![3.0, 1.0]);
}

#[test]
fn hybrid_fast_prefix_with_slow_residue() {
    let db = users_db();
    // age is indexed, name is not: fast prefix then evaluator
    db.query(&Query::upsert(
        "users",
        row(&[("id", num(5.0)), ("age", num(30.0)), ("city", text("A")), ("nick", text("zed"))]),
    ))
    .unwrap();
    let result = db
        .query(&Query::select("users").where_(WhereExpr::List(vec![
            WhereItem::Cond(Condition::new("age", Operator::Eq, num(30.0))),
            WhereItem::And,
            WhereItem::Cond(Condition::new("nick", Operator::Eq, text("zed"))),
        ])))
        .unwrap();
    assert_eq!(ids(&rows_of(result)), vec![5.0]);
}

#[test]
fn range_selects_offsets_and_tail() {
    let db = users_db();
    let head = db.query(&Query::select("users").range(2, 1)).unwrap();
    assert_eq!(ids(&rows_of(head)), vec![2.0, 3.0]);

    // negative limit reads from the tail, skipping from the end
    let tail = db.query(&Query::select("users").range(-2, 1)).unwrap();
    assert_eq!(ids(&rows_of(tail)), vec![1.0, 2.0]);
}

#[test]
fn where_fn_runs_full_scan() {
    let db = users_db();
    let result = db
        .query(&Query::select("users").where_fn(Arc::new(|row, _| {
            row.get("age").and_then(Value::as_f64).map(|a| a > 35.0).unwrap_or(false)
        })))
        .unwrap();
    assert_eq!(ids(&rows_of(result)), vec![3.0]);
}

#[test]
fn trie_prefix_lookup() {
    let db = Database::connect_memory(Config::default()).unwrap();
    db.register_table(
        TableSchema::new("users", "id", true)
            .column("name", ColumnKind::String)
            .trie("name"),
    )
    .unwrap();
    for (id, name) in [(1.0, "billy"), (2.0, "bill"), (3.0, "jeb")] {
        db.query(&Query::upsert(
            "users",
            row(&[("id", num(id)), ("name", text(name))]),
        ))
        .unwrap();
    }

    let result = db.query(&Query::select("users").trie("name", "bil")).unwrap();
    let mut found = ids(&rows_of(result));
    found.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(found, vec![1.0, 2.0]);

    // deletes retract trie entries
    db.query(&Query::delete("users").where_(WhereExpr::leaf("id", Operator::Eq, num(2.0))))
        .unwrap();
    let result = db.query(&Query::select("users").trie("name", "bil")).unwrap();
    assert_eq!(ids(&rows_of(result)), vec![1.0]);
}

// --- mutator stages ------------------------------------------------------

#[test]
fn group_by_with_aggregates() {
    let db = users_db();
    let result = db
        .query(
            &Query::select("users")
                .columns(&["city", "COUNT(*) AS total", "AVG(age) AS avg_age"])
                .group_by("city", SortOrder::Asc),
        )
        .unwrap();
    let rows = rows_of(result);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("city"), Some(&text("A")));
    assert_eq!(rows[0].get("total"), Some(&num(2.0)));
    assert_eq!(rows[0].get("avg_age"), Some(&num(35.0)));
    assert_eq!(rows[1].get("city"), Some(&text("B")));
    assert_eq!(rows[1].get("total"), Some(&num(1.0)));
}

#[test]
fn aggregate_without_group_by_collapses_to_one_row() {
    let db = users_db();
    let rows = rows_of(
        db.query(&Query::select("users").columns(&["MAX(age) AS oldest"]))
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("oldest"), Some(&num(40.0)));
}

#[test]
fn scalar_functions_and_aliases_project_per_row() {
    let db = users_db();
    let rows = rows_of(
        db.query(
            &Query::select("users")
                .columns(&["id", "UPPER(city) AS loud_city"])
                .order_by("id", SortOrder::Asc),
        )
        .unwrap(),
    );
    assert_eq!(rows[0].get("loud_city"), Some(&text("A")));
    assert_eq!(rows[0].get("id"), Some(&num(1.0)));
    // projection keeps only the selected columns
    assert!(rows[0].get("age").is_none());
}

#[test]
fn user_registered_functions_join_the_builtins() {
    let db = users_db();
    db.register_scalar_function("AGE_GROUP", |row, args| {
        let age = args
            .first()
            .map(|a| burrow::core::types::path_value(row, a))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        Ok(text(if age < 35.0 { "young" } else { "old" }))
    });

    let rows = rows_of(
        db.query(
            &Query::select("users")
                .columns(&["id", "AGE_GROUP(age) AS bracket"])
                .order_by("id", SortOrder::Asc),
        )
        .unwrap(),
    );
    assert_eq!(rows[0].get("bracket"), Some(&text("young")));
    assert_eq!(rows[2].get("bracket"), Some(&text("old")));
}

#[test]
fn unknown_function_is_fatal() {
    let db = users_db();
    let err = db
        .query(&Query::select("users").columns(&["NOPE(age) AS x"]))
        .unwrap_err();
    assert!(err.context.contains("unknown function"));
}

#[test]
fn having_order_offset_limit_pipeline() {
    let db = users_db();
    let rows = rows_of(
        db.query(
            &Query::select("users")
                .columns(&["city", "COUNT(*) AS total"])
                .group_by("city", SortOrder::Asc)
                .having(WhereExpr::leaf("total", Operator::Ge, num(1.0)))
                .order_by("total", SortOrder::Desc)
                .limit(1),
        )
        .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("city"), Some(&text("A")));
}

#[test]
fn orm_expansion_resolves_related_rows() {
    let db = Database::connect_memory(Config::default()).unwrap();
    db.register_table(
        TableSchema::new("posts", "id", true)
            .column("tags", ColumnKind::Array)
            .orm(OrmEdge {
                this_column: "tags".to_string(),
                this_many: true,
                from_table: "tags".to_string(),
                from_column: "posts".to_string(),
                from_many: true,
            }),
    )
    .unwrap();
    db.register_table(
        TableSchema::new("tags", "id", true)
            .column("label", ColumnKind::String)
            .column("posts", ColumnKind::Array),
    )
    .unwrap();
    for (id, label) in [(1.0, "rust"), (2.0, "db")] {
        db.query(&Query::upsert(
            "tags",
            row(&[("id", num(id)), ("label", text(label))]),
        ))
        .unwrap();
    }
    db.query(&Query::upsert(
        "posts",
        row(&[("id", num(9.0)), ("tags", Value::Array(vec![num(1.0), num(2.0)]))]),
    ))
    .unwrap();

    let rows = rows_of(
        db.query(&Query::select("posts").orm(OrmInclude::Spec(OrmArgs {
            limit: Some(1),
            ..OrmArgs::key("tags")
        })))
        .unwrap(),
    );
    let expanded = rows[0].get("tags").and_then(Value::as_array).unwrap();
    assert_eq!(expanded.len(), 1);
    let Value::Object(tag) = &expanded[0] else {
        panic!("expanded relation should hold row objects");
    };
    assert_eq!(tag.get("label"), Some(&text("rust")));
}

// --- dispatcher ----------------------------------------------------------

#[test]
fn show_tables_and_describe() {
    let db = users_db();
    let tables = rows_of(db.query(&Query::show_tables()).unwrap());
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].get("table"), Some(&text("users")));

    let columns = rows_of(db.query(&Query::describe("users")).unwrap());
    let names: Vec<&str> = columns
        .iter()
        .filter_map(|r| r.get("column").and_then(Value::as_str))
        .collect();
    assert_eq!(names, vec!["age", "city"]);
}

#[test]
fn instance_table_path() {
    let rows = vec![
        row(&[("id", num(1.0)), ("age", num(10.0))]),
        row(&[("id", num(2.0)), ("age", num(20.0))]),
        row(&[("id", num(3.0)), ("age", num(30.0))]),
    ];
    let db = Database::connect_memory(Config::default()).unwrap();

    let select = Query::new(burrow::Action::Select, TableRef::Rows(rows.clone()))
        .where_(WhereExpr::leaf("age", Operator::Gt, num(15.0)));
    assert_eq!(ids(&rows_of(db.query(&select).unwrap())), vec![2.0, 3.0]);

    let mut upsert = Query::new(burrow::Action::Upsert, TableRef::Rows(rows.clone()))
        .where_(WhereExpr::leaf("id", Operator::Eq, num(2.0)));
    upsert.args = burrow::ActionArgs::Row(row(&[("age", num(99.0))]));
    let upserted = rows_of(db.query(&upsert).unwrap());
    assert_eq!(upserted.len(), 3);
    assert_eq!(upserted[1].get("age"), Some(&num(99.0)));

    let delete = Query::new(burrow::Action::Delete, TableRef::Rows(rows.clone()))
        .where_(WhereExpr::leaf("id", Operator::Eq, num(1.0)));
    assert_eq!(ids(&rows_of(db.query(&delete).unwrap())), vec![2.0, 3.0]);

    let drop = Query::new(burrow::Action::Drop, TableRef::Rows(rows));
    assert!(rows_of(db.query(&drop).unwrap()).is_empty());
}

#[test]
fn schema_misuse_is_rejected() {
    let db = users_db();

    let err = db
        .query(
            &Query::select("users")
                .where_(WhereExpr::leaf("id", Operator::Eq, num(1.0)))
                .range(1, 0),
        )
        .unwrap_err();
    assert_eq!(err.kind, burrow::ErrorKind::Schema);

    let err = db
        .query(
            &Query::select("users")
                .join(JoinArgs {
                    kind: JoinType::Inner,
                    table: "users".to_string(),
                    on: None,
                })
                .orm(OrmInclude::Key("tags".to_string())),
        )
        .unwrap_err();
    assert_eq!(err.kind, burrow::ErrorKind::Schema);

    let err = db.query(&Query::select("missing")).unwrap_err();
    assert_eq!(err.kind, burrow::ErrorKind::Schema);
}

#[test]
fn write_envelope_reports_affected_rows() {
    let db = users_db();
    let summary = db
        .query(
            &Query::upsert("users", row(&[("age", num(31.0))]))
                .where_(WhereExpr::leaf("city", Operator::Eq, text("A"))),
        )
        .unwrap()
        .write_summary()
        .unwrap();

    assert_eq!(summary.affected_pks, vec![RowKey::Int(1), RowKey::Int(3)]);
    assert_eq!(summary.affected_rows.len(), 2);
    assert!(summary.msg.contains("2 row(s)"));
}

#[test]
fn delete_without_where_empties_the_table() {
    let db = users_db();
    let summary = db
        .query(&Query::delete("users"))
        .unwrap()
        .write_summary()
        .unwrap();
    assert_eq!(summary.affected_rows.len(), 3);
    assert!(rows_of(db.query(&Query::select("users")).unwrap()).is_empty());
}

#[test]
fn drop_clears_rows_and_derived_tables() {
    let backend = Arc::new(MemoryBackend::new());
    let db = Database::connect(backend.clone(), Config::default()).unwrap();
    db.register_table(TableSchema::new("users", "id", true).index("age")).unwrap();
    db.query(&Query::upsert("users", row(&[("id", num(1.0)), ("age", num(30.0))])))
        .unwrap();

    db.query(&Query::drop("users")).unwrap();
    assert_eq!(backend.row_count("users").unwrap(), 0);
    assert_eq!(backend.row_count("_users_idx_age").unwrap(), 0);
}

#[test]
fn rebuild_orm_reasserts_back_references() {
    let backend = Arc::new(MemoryBackend::new());
    let db = Database::connect(backend.clone(), Config::default()).unwrap();
    db.register_table(
        TableSchema::new("posts", "id", true)
            .column("tags", ColumnKind::Array)
            .orm(OrmEdge {
                this_column: "tags".to_string(),
                this_many: true,
                from_table: "tags".to_string(),
                from_column: "posts".to_string(),
                from_many: true,
            }),
    )
    .unwrap();
    db.register_table(TableSchema::new("tags", "id", true).column("posts", ColumnKind::Array))
        .unwrap();
    db.query(&Query::upsert("tags", row(&[("id", num(1.0))]))).unwrap();
    db.query(&Query::upsert(
        "posts",
        row(&[("id", num(9.0)), ("tags", Value::Array(vec![num(1.0)]))]),
    ))
    .unwrap();

    // simulate a desynced remote row behind the core's back
    backend
        .write(
            "tags",
            Some(&RowKey::Int(1)),
            row(&[("id", num(1.0)), ("posts", Value::Array(vec![]))]),
        )
        .unwrap();

    db.rebuild_orm("posts").unwrap();
    let tag = backend.read("tags", &RowKey::Int(1)).unwrap().unwrap();
    assert_eq!(tag.get("posts"), Some(&Value::Array(vec![num(9.0)])));
}

#[test]
fn rebuild_search_index_comment_reindexes() {
    let backend = Arc::new(MemoryBackend::new());
    let db = Database::connect(backend.clone(), Config::default()).unwrap();
    db.register_table(
        TableSchema::new("docs", "id", true).search("body", 1.0, TokenizeMode::Raw),
    )
    .unwrap();
    db.query(&Query::upsert(
        "docs",
        row(&[("id", num(1.0)), ("body", text("alpha"))]),
    ))
    .unwrap();

    // wipe the word record behind the core's back, then force a rebuild
    backend
        .delete("_docs_search_body", &RowKey::Str("alpha".to_string()))
        .unwrap();
    db.query(
        &Query::upsert("docs", row(&[("id", num(1.0)), ("body", text("alpha"))]))
            .comment("_rebuild_search_index"),
    )
    .unwrap();

    let found = rows_of(
        db.query(&Query::select("docs").where_(WhereExpr::leaf(
            "search(body)",
            Operator::Eq,
            text("alpha"),
        )))
        .unwrap(),
    );
    assert_eq!(ids(&found), vec![1.0]);
}
