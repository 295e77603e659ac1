use super::*;

fn record(pairs: &[(&str, Value)]) -> RowMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn bare_equality_matches() {
    let filter = Filter::from([("id".to_string(), Condition::eq(Value::Int(2)))]);
    let row = record(&[("id", Value::Int(2)), ("name", Value::Text("bob".into()))]);
    assert!(matches_record(&filter, &row));

    let other = record(&[("id", Value::Int(3))]);
    assert!(!matches_record(&filter, &other));
}

#[test]
fn operator_bounds_apply() {
    let row = record(&[("grade", Value::Float(85.5))]);

    assert!(Condition::gt(Value::Int(80)).matches(&row["grade"]));
    assert!(!Condition::gt(Value::Int(90)).matches(&row["grade"]));
    assert!(Condition::le(Value::Float(85.5)).matches(&row["grade"]));
    assert!(Condition::ne(Value::Int(90)).matches(&row["grade"]));
}

#[test]
fn between_is_inclusive() {
    let cond = Condition::between(Value::Int(3), Value::Int(7));
    assert!(cond.matches(&Value::Int(3)));
    assert!(cond.matches(&Value::Int(5)));
    assert!(cond.matches(&Value::Int(7)));
    assert!(!cond.matches(&Value::Int(8)));
}

#[test]
fn missing_column_never_matches() {
    let filter = Filter::from([("age".to_string(), Condition::gt(Value::Int(18)))]);
    let row = record(&[("id", Value::Int(1))]);
    assert!(!matches_record(&filter, &row));
}

#[test]
fn incomparable_types_do_not_match() {
    let cond = Condition::gt(Value::Int(10));
    assert!(!cond.matches(&Value::Text("10".into())));
    assert!(!cond.matches(&Value::Null));
}

#[test]
fn every_condition_must_hold() {
    let filter = Filter::from([
        ("age".to_string(), Condition::ge(Value::Int(20))),
        ("active".to_string(), Condition::eq(Value::Bool(true))),
    ]);
    let good = record(&[("age", Value::Int(25)), ("active", Value::Bool(true))]);
    let bad = record(&[("age", Value::Int(25)), ("active", Value::Bool(false))]);
    assert!(matches_record(&filter, &good));
    assert!(!matches_record(&filter, &bad));
}

#[test]
fn empty_filter_matches_everything() {
    let filter = Filter::new();
    assert!(matches_record(&filter, &record(&[("x", Value::Int(1))])));
    assert!(matches_record(&filter, &RowMap::new()));
}

#[test]
fn exact_match_round_trips_a_record() {
    let row = record(&[
        ("id", Value::Int(10)),
        ("name", Value::Text("x".into())),
        ("note", Value::Null),
    ]);
    let filter = exact_match(&row);
    assert!(matches_record(&filter, &row));

    let mut changed = row.clone();
    changed.insert("name".into(), Value::Text("y".into()));
    assert!(!matches_record(&filter, &changed));
}

#[test]
fn leading_op_reports_the_operator() {
    assert_eq!(Condition::eq(Value::Int(1)).leading_op(), CompareOp::Eq);
    assert_eq!(Condition::lt(Value::Int(1)).leading_op(), CompareOp::Lt);
    assert_eq!(CompareOp::Ge.symbol(), ">=");
}
