//! Transaction semantics: a single active transaction with a LIFO undo log.

use catalog::Column;
use engine::{ColumnType, Condition, Config, Engine, RowMap, SelectOptions, Value};
use predicate::Filter;
use tempfile::tempdir;

fn engine_at(dir: &std::path::Path) -> Engine {
    Engine::open(Config::builder().data_dir(dir.to_path_buf()).build()).unwrap()
}

fn record(pairs: &[(&str, Value)]) -> RowMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn accounts(engine: &mut Engine) {
    engine
        .create_table(
            "accounts",
            vec![
                Column::new("id", ColumnType::Integer).primary_key(),
                Column::new("owner", ColumnType::String).not_null(),
                Column::new("balance", ColumnType::Integer).not_null(),
            ],
        )
        .unwrap();
    for (id, owner, balance) in [(1, "alice", 100), (2, "bob", 250), (3, "carol", 40)] {
        engine
            .insert(
                "accounts",
                record(&[
                    ("id", Value::Int(id)),
                    ("owner", Value::Text(owner.into())),
                    ("balance", Value::Int(balance)),
                ]),
            )
            .unwrap();
    }
}

fn all_sorted(engine: &mut Engine) -> Vec<(i64, String, i64)> {
    let mut rows: Vec<(i64, String, i64)> = engine
        .select("accounts", SelectOptions::all())
        .unwrap()
        .into_iter()
        .map(|row| {
            let id = match row.get("id") {
                Some(Value::Int(id)) => *id,
                other => panic!("bad id: {other:?}"),
            };
            let owner = match row.get("owner") {
                Some(Value::Text(owner)) => owner.clone(),
                other => panic!("bad owner: {other:?}"),
            };
            let balance = match row.get("balance") {
                Some(Value::Int(balance)) => *balance,
                other => panic!("bad balance: {other:?}"),
            };
            (id, owner, balance)
        })
        .collect();
    rows.sort();
    rows
}

#[test]
fn rollback_undoes_an_insert() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    accounts(&mut engine);

    engine.begin_transaction();
    assert!(engine.in_transaction());
    engine
        .insert(
            "accounts",
            record(&[
                ("id", Value::Int(4)),
                ("owner", Value::Text("dave".into())),
                ("balance", Value::Int(7)),
            ]),
        )
        .unwrap();
    engine.rollback_transaction().unwrap();

    assert!(!engine.in_transaction());
    assert_eq!(all_sorted(&mut engine).len(), 3);
}

#[test]
fn rollback_restores_after_mixed_writes() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    accounts(&mut engine);
    let baseline = all_sorted(&mut engine);

    engine.begin_transaction();
    engine
        .insert(
            "accounts",
            record(&[
                ("id", Value::Int(9)),
                ("owner", Value::Text("eve".into())),
                ("balance", Value::Int(0)),
            ]),
        )
        .unwrap();
    engine
        .update(
            "accounts",
            record(&[("balance", Value::Int(999))]),
            Some(Filter::from([(
                "owner".to_string(),
                Condition::eq(Value::Text("alice".into())),
            )])),
        )
        .unwrap();
    engine
        .delete(
            "accounts",
            Some(Filter::from([(
                "id".to_string(),
                Condition::eq(Value::Int(3)),
            )])),
        )
        .unwrap();
    engine.rollback_transaction().unwrap();

    assert_eq!(all_sorted(&mut engine), baseline);
}

#[test]
fn commit_keeps_writes_and_clears_the_log() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    accounts(&mut engine);

    engine.begin_transaction();
    engine
        .delete(
            "accounts",
            Some(Filter::from([(
                "id".to_string(),
                Condition::eq(Value::Int(2)),
            )])),
        )
        .unwrap();
    engine.commit_transaction();

    // a rollback after commit must not resurrect anything
    engine.rollback_transaction().unwrap();
    let rows = all_sorted(&mut engine);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|(id, _, _)| *id != 2));
}

#[test]
fn rollback_without_transaction_is_a_no_op() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    accounts(&mut engine);

    engine.rollback_transaction().unwrap();
    assert_eq!(all_sorted(&mut engine).len(), 3);
}

#[test]
fn begin_clears_entries_from_an_abandoned_transaction() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    accounts(&mut engine);

    engine.begin_transaction();
    engine
        .delete(
            "accounts",
            Some(Filter::from([(
                "id".to_string(),
                Condition::eq(Value::Int(1)),
            )])),
        )
        .unwrap();

    // a new begin discards the earlier undo entries: the delete sticks
    engine.begin_transaction();
    engine.rollback_transaction().unwrap();
    assert_eq!(all_sorted(&mut engine).len(), 2);
}

#[test]
fn indexes_follow_transactional_writes_and_rollbacks() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path());
    accounts(&mut engine);
    engine
        .create_index("balance_idx", "accounts", &["balance"], false)
        .unwrap();

    engine.begin_transaction();
    engine
        .delete(
            "accounts",
            Some(Filter::from([(
                "owner".to_string(),
                Condition::eq(Value::Text("bob".into())),
            )])),
        )
        .unwrap();
    let remaining = engine
        .index("balance_idx")
        .unwrap()
        .range_search(&[Value::Int(0)], &[Value::Int(1000)])
        .unwrap();
    assert_eq!(remaining.len(), 2);

    engine.rollback_transaction().unwrap();
    let restored = engine
        .index("balance_idx")
        .unwrap()
        .range_search(&[Value::Int(0)], &[Value::Int(1000)])
        .unwrap();
    assert_eq!(restored.len(), 3);
}
