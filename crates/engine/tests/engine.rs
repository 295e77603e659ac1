//! Engine lifecycle: DDL, schema evolution, persistence, index
//! maintenance, and maintenance operations.

use catalog::Column;
use engine::{
    ColumnType, Condition, Config, DbError, Engine, EvictionPolicy, RowMap, SelectOptions, Value,
};
use predicate::Filter;
use tempfile::tempdir;

fn engine_at(dir: &std::path::Path) -> Engine {
    Engine::open(
        Config::builder()
            .data_dir(dir.to_path_buf())
            .buffer_frames(8)
            .eviction(EvictionPolicy::Lru)
            .build(),
    )
    .unwrap()
}

fn record(pairs: &[(&str, Value)]) -> RowMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn users(engine: &mut Engine) {
    engine
        .create_table(
            "users",
            vec![
                Column::new("id", ColumnType::Integer).primary_key(),
                Column::new("username", ColumnType::String).max_length(50).not_null(),
                Column::new("age", ColumnType::Integer),
                Column::new("active", ColumnType::Boolean).default_value(Value::Bool(true)),
            ],
        )
        .unwrap();
}

fn user(id: i64, name: &str, age: i64) -> RowMap {
    record(&[
        ("id", Value::Int(id)),
        ("username", Value::Text(name.into())),
        ("age", Value::Int(age)),
    ])
}

#[test]
fn ddl_round_trip() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);

    assert_eq!(engine.list_tables(), vec!["users".to_string()]);
    let info = engine.table_info("users").unwrap();
    assert_eq!(info.primary_key.as_deref(), Some("id"));
    assert_eq!(info.page_count, 1);
    assert!(info.created_at > 0);

    assert!(matches!(
        engine.create_table("users", vec![Column::new("id", ColumnType::Integer)]),
        Err(DbError::Conflict(_))
    ));

    engine.drop_table("users").unwrap();
    assert!(engine.list_tables().is_empty());
    assert!(matches!(
        engine.table_info("users"),
        Err(DbError::NotFound(_))
    ));
}

#[test]
fn data_persists_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let mut engine = engine_at(dir.path());
        users(&mut engine);
        engine.insert("users", user(1, "alice", 25)).unwrap();
        engine.insert("users", user(2, "bob", 30)).unwrap();
        engine
            .create_index("age_idx", "users", &["age"], false)
            .unwrap();
        engine.shutdown().unwrap();
    }

    let mut engine = engine_at(dir.path());
    let rows = engine.select("users", SelectOptions::all()).unwrap();
    assert_eq!(rows.len(), 2);

    assert_eq!(engine.list_indexes(), vec!["age_idx".to_string()]);
    let rids = engine
        .index("age_idx")
        .unwrap()
        .range_search(&[Value::Int(0)], &[Value::Int(100)])
        .unwrap();
    assert_eq!(rids.len(), 2);
}

#[test]
fn select_supports_projection_and_limit() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    for i in 0..10 {
        engine.insert("users", user(i, &format!("u{i}"), 20 + i)).unwrap();
    }

    let rows = engine
        .select(
            "users",
            SelectOptions::all()
                .columns(vec!["username".to_string()])
                .limit(3),
        )
        .unwrap();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.len(), 1);
        assert!(row.contains_key("username"));
    }
}

#[test]
fn defaults_apply_on_insert() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    engine.insert("users", user(1, "alice", 25)).unwrap();

    let rows = engine.select("users", SelectOptions::all()).unwrap();
    assert_eq!(rows[0].get("active"), Some(&Value::Bool(true)));
}

#[test]
fn schema_violations_reject_the_write() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);

    // wrong type
    let err = engine
        .insert(
            "users",
            record(&[("id", Value::Text("x".into())), ("username", Value::Text("a".into()))]),
        )
        .unwrap_err();
    assert!(matches!(err, DbError::SchemaViolation(_)));

    // string over max_length
    let err = engine
        .insert(
            "users",
            record(&[("id", Value::Int(1)), ("username", Value::Text("x".repeat(51)))]),
        )
        .unwrap_err();
    assert!(matches!(err, DbError::SchemaViolation(_)));

    assert!(engine.select("users", SelectOptions::all()).unwrap().is_empty());
}

#[test]
fn add_and_drop_column_evolve_existing_rows() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    engine.insert("users", user(1, "alice", 25)).unwrap();

    engine
        .add_column(
            "users",
            Column::new("email", ColumnType::String).default_value(Value::Text("n/a".into())),
        )
        .unwrap();
    let rows = engine.select("users", SelectOptions::all()).unwrap();
    assert_eq!(rows[0].get("email"), Some(&Value::Text("n/a".into())));

    engine.drop_column("users", "age").unwrap();
    let rows = engine.select("users", SelectOptions::all()).unwrap();
    assert!(!rows[0].contains_key("age"));
}

#[test]
fn dropping_an_indexed_column_drops_the_index() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    engine
        .create_index("age_idx", "users", &["age"], false)
        .unwrap();

    engine.drop_column("users", "age").unwrap();
    assert!(engine.list_indexes().is_empty());
}

#[test]
fn unique_index_rejects_duplicate_inserts_exactly_once() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    engine
        .create_index("username_uq", "users", &["username"], true)
        .unwrap();

    engine.insert("users", user(1, "alice", 25)).unwrap();
    let err = engine.insert("users", user(2, "alice", 30)).unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));

    // the rejected insert left no trace in the table
    let rows = engine.select("users", SelectOptions::all()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
}

#[test]
fn create_index_bulk_loads_existing_rows() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    for i in 0..5 {
        engine.insert("users", user(i, &format!("u{i}"), 20 + i)).unwrap();
    }

    engine
        .create_index("age_idx", "users", &["age"], false)
        .unwrap();
    let rids = engine
        .index("age_idx")
        .unwrap()
        .range_search(&[Value::Int(21)], &[Value::Int(23)])
        .unwrap();
    assert_eq!(rids.len(), 3);
}

#[test]
fn unique_bulk_load_over_duplicates_fails_cleanly() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    engine.insert("users", user(1, "same", 25)).unwrap();
    engine.insert("users", user(2, "same", 30)).unwrap();

    let err = engine
        .create_index("username_uq", "users", &["username"], true)
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));
    assert!(engine.list_indexes().is_empty());
}

#[test]
fn create_index_validates_table_and_columns() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);

    assert!(matches!(
        engine.create_index("i", "ghosts", &["id"], false),
        Err(DbError::NotFound(_))
    ));
    assert!(matches!(
        engine.create_index("i", "users", &["ghost"], false),
        Err(DbError::NotFound(_))
    ));
    assert!(matches!(
        engine.create_index("i", "users", &[], false),
        Err(DbError::SchemaViolation(_))
    ));
}

#[test]
fn updates_and_deletes_keep_indexes_consistent() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    engine
        .create_index("age_idx", "users", &["age"], false)
        .unwrap();
    for i in 0..6 {
        engine.insert("users", user(i, &format!("u{i}"), 20 + i)).unwrap();
    }

    engine
        .update(
            "users",
            record(&[("age", Value::Int(99))]),
            Some(Filter::from([(
                "id".to_string(),
                Condition::lt(Value::Int(3)),
            )])),
        )
        .unwrap();

    let old = engine
        .index("age_idx")
        .unwrap()
        .range_search(&[Value::Int(20)], &[Value::Int(22)])
        .unwrap();
    assert!(old.is_empty(), "updated keys must leave the index");
    let bumped = engine
        .index("age_idx")
        .unwrap()
        .search(&[Value::Int(99)])
        .unwrap();
    assert_eq!(bumped.len(), 3);

    engine
        .delete(
            "users",
            Some(Filter::from([(
                "age".to_string(),
                Condition::eq(Value::Int(99)),
            )])),
        )
        .unwrap();
    let gone = engine
        .index("age_idx")
        .unwrap()
        .search(&[Value::Int(99)])
        .unwrap();
    assert!(gone.is_empty());
}

#[test]
fn index_selection_is_transparent_to_results() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    engine
        .create_index("age_idx", "users", &["age"], false)
        .unwrap();
    for i in 0..8 {
        engine.insert("users", user(i, &format!("u{i}"), 20 + i)).unwrap();
    }

    let filter = Filter::from([("age".to_string(), Condition::ge(Value::Int(24)))]);
    let with_index = engine
        .select(
            "users",
            SelectOptions::all().filter(filter.clone()).use_index(true),
        )
        .unwrap();
    let without_index = engine
        .select(
            "users",
            SelectOptions::all().filter(filter).use_index(false),
        )
        .unwrap();

    assert_eq!(with_index.len(), 4);
    assert_eq!(with_index.len(), without_index.len());
}

#[test]
fn flush_all_is_idempotent_at_the_engine_level() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);
    engine.insert("users", user(1, "alice", 25)).unwrap();

    assert!(engine.flush_all().unwrap() > 0);
    assert_eq!(engine.flush_all().unwrap(), 0);
}

#[test]
fn stats_track_operations() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    users(&mut engine);

    engine.insert("users", user(1, "alice", 25)).unwrap();
    engine.insert("users", user(2, "bob", 30)).unwrap();
    engine.select("users", SelectOptions::all()).unwrap();
    engine
        .update(
            "users",
            record(&[("age", Value::Int(26))]),
            Some(Filter::from([(
                "id".to_string(),
                Condition::eq(Value::Int(1)),
            )])),
        )
        .unwrap();
    engine.delete("users", None).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.records_inserted, 2);
    assert_eq!(stats.queries_executed, 1);
    assert_eq!(stats.records_updated, 1);
    assert_eq!(stats.records_deleted, 2);

    let pool = engine.pool_stats();
    assert!(pool.cache_hits + pool.cache_misses > 0);
}

#[test]
fn eviction_pressure_does_not_lose_data() {
    let dir = tempdir().unwrap();
    // two frames only: table pages and index pages contend hard
    let mut engine = Engine::open(
        Config::builder()
            .data_dir(dir.path().to_path_buf())
            .buffer_frames(2)
            .eviction(EvictionPolicy::Clock)
            .build(),
    )
    .unwrap();

    users(&mut engine);
    engine
        .create_index("age_idx", "users", &["age"], false)
        .unwrap();
    for i in 0..30 {
        engine.insert("users", user(i, &format!("user-{i}"), i)).unwrap();
    }

    let rows = engine.select("users", SelectOptions::all()).unwrap();
    assert_eq!(rows.len(), 30);

    let rids = engine
        .index("age_idx")
        .unwrap()
        .range_search(&[Value::Int(10)], &[Value::Int(19)])
        .unwrap();
    assert_eq!(rids.len(), 10);
    assert!(engine.pool_stats().evictions > 0);
}
