use std::collections::BTreeMap;

use serde_json::json;
use tabula::{
    MutationContext, Record, RuntimeConfig, SchemaError, SchemaParser, SchemaRuntime, Value,
};

fn runtime(source: &str) -> SchemaRuntime {
    let schema = SchemaParser::with_env(BTreeMap::new()).parse(source).unwrap();
    SchemaRuntime::new(schema).unwrap()
}

fn row(value: serde_json::Value) -> Record {
    match Value::from(value) {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other:?}"),
    }
}

const TASKS: &str = r#"
name: todo
version: 1
tables:
  tasks:
    columns:
      - id: title
        type: text
        required: true
      - id: done
        type: checkbox
        default: false
"#;

#[test]
fn test_end_to_end_insert_update() {
    let runtime = runtime(TASKS);
    let tasks = runtime.get_table("tasks").unwrap();

    let id = tasks.insert(row(json!({"title": "Write draft"}))).unwrap();
    assert!(id.starts_with("tasks_"), "{id}");

    let stored = tasks.get(&id).unwrap().unwrap();
    assert_eq!(stored["done"], Value::Boolean(false));
    assert_eq!(stored["id"], Value::Text(id.clone()));

    let err = tasks.insert(Record::new()).unwrap_err();
    assert_eq!(err, SchemaError::RequiredField { column: "title".into() });
    assert_eq!(tasks.count().unwrap(), 1);

    tasks.update(&id, row(json!({"done": true}))).unwrap();
    let stored = tasks.get(&id).unwrap().unwrap();
    assert_eq!(stored["done"], Value::Boolean(true));
    assert_eq!(stored["title"], Value::from("Write draft"));
}

#[test]
fn test_update_and_delete_unknown_record() {
    let runtime = runtime(TASKS);
    let tasks = runtime.get_table("tasks").unwrap();

    assert!(matches!(
        tasks.update("tasks_0_missing", row(json!({"done": true}))),
        Err(SchemaError::RecordNotFound { .. })
    ));
    assert!(matches!(
        tasks.delete("tasks_0_missing"),
        Err(SchemaError::RecordNotFound { .. })
    ));
    assert!(runtime.get_table("nope").is_none());
}

#[test]
fn test_ids_are_unique_and_caller_ids_ignored() {
    let runtime = runtime(TASKS);
    let tasks = runtime.get_table("tasks").unwrap();

    let a = tasks.insert(row(json!({"title": "a", "id": "mine"}))).unwrap();
    let b = tasks.insert(row(json!({"title": "b", "id": "mine"}))).unwrap();
    assert_ne!(a, b);
    assert_ne!(a, "mine");
    assert_eq!(tasks.count().unwrap(), 2);
}

#[test]
fn test_type_and_range_errors_carry_column() {
    let runtime = runtime(
        r#"
name: shop
version: 1
tables:
  products:
    columns:
      - id: sku
        type: text
        validation: { pattern: "^[A-Z]{3}-[0-9]+$" }
      - id: price
        type: number
        validation: { min: 0, max: 1000 }
      - id: category
        type: select
        options: [books, music]
      - id: tags
        type: multi_select
        options: [new, sale]
      - id: released
        type: date
"#,
    );
    let products = runtime.get_table("products").unwrap();

    let err = products.insert(row(json!({"price": "cheap"}))).unwrap_err();
    assert!(matches!(err, SchemaError::TypeValidation { .. }));
    assert_eq!(err.column(), Some("price"));

    let err = products.insert(row(json!({"price": 5000}))).unwrap_err();
    assert!(matches!(err, SchemaError::RangeValidation { ref column, .. } if column == "price"));

    let err = products.insert(row(json!({"sku": "abc-1"}))).unwrap_err();
    assert!(matches!(err, SchemaError::PatternValidation { ref column, .. } if column == "sku"));

    let err = products.insert(row(json!({"category": "games"}))).unwrap_err();
    assert_eq!(
        err,
        SchemaError::InvalidOption { column: "category".into(), value: "games".into() }
    );

    let err = products.insert(row(json!({"tags": ["new", "old"]}))).unwrap_err();
    assert_eq!(err.column(), Some("tags"));

    let err = products.insert(row(json!({"released": "next week"}))).unwrap_err();
    assert_eq!(err.column(), Some("released"));

    products
        .insert(row(json!({
            "sku": "ABC-42",
            "price": 19.5,
            "category": "books",
            "tags": ["new", "sale"],
            "released": "2024-02-29"
        })))
        .unwrap();
    assert_eq!(products.count().unwrap(), 1);
}

#[test]
fn test_unique_columns_and_indexed_find() {
    let runtime = runtime(
        r#"
name: crm
version: 1
tables:
  contacts:
    columns:
      - id: email
        type: text
        unique: true
      - id: city
        type: text
    indexes:
      - city
"#,
    );
    let contacts = runtime.get_table("contacts").unwrap();

    let first = contacts.insert(row(json!({"email": "a@x.io", "city": "Oslo"}))).unwrap();
    contacts.insert(row(json!({"email": "b@x.io", "city": "Oslo"}))).unwrap();
    contacts.insert(row(json!({"city": "Rome"}))).unwrap();
    contacts.insert(row(json!({"city": "Rome"}))).unwrap();

    let err = contacts.insert(row(json!({"email": "a@x.io"}))).unwrap_err();
    assert!(matches!(err, SchemaError::UniqueViolation { ref column, .. } if column == "email"));
    assert_eq!(contacts.count().unwrap(), 4);

    let second = contacts.find("email", &Value::from("b@x.io")).unwrap();
    let err = contacts
        .update(second[0]["id"].as_str().unwrap(), row(json!({"email": "a@x.io"})))
        .unwrap_err();
    assert!(matches!(err, SchemaError::UniqueViolation { .. }));

    contacts.update(&first, row(json!({"city": "Rome"}))).unwrap();
    assert_eq!(contacts.find("city", &Value::from("Oslo")).unwrap().len(), 1);
    assert_eq!(contacts.find("city", &Value::from("Rome")).unwrap().len(), 3);

    contacts.delete(&first).unwrap();
    contacts.insert(row(json!({"email": "a@x.io"}))).unwrap();
}

#[test]
fn test_presets_fill_audit_columns() {
    let schema = SchemaParser::with_env(BTreeMap::new())
        .parse(
            r#"
name: hr
version: 1
tables:
  employees:
    columns: [id, timestamps, user_tracking, "name:text"]
"#,
        )
        .unwrap();
    let runtime =
        SchemaRuntime::with_config(schema, RuntimeConfig::new().default_user("system")).unwrap();
    let employees = runtime.get_table("employees").unwrap();

    let id = employees
        .insert_as(row(json!({"name": "Ada"})), &MutationContext::as_user("alice"))
        .unwrap();
    let stored = employees.get(&id).unwrap().unwrap();
    assert_eq!(stored["created_by"], Value::from("alice"));
    assert_eq!(stored["updated_by"], Value::from("alice"));
    let created_at = stored["created_at"].as_str().unwrap().to_string();
    assert!(chrono::DateTime::parse_from_rfc3339(&created_at).is_ok());

    employees.update(&id, row(json!({"name": "Ada L."}))).unwrap();
    let stored = employees.get(&id).unwrap().unwrap();
    assert_eq!(stored["created_by"], Value::from("alice"));
    assert_eq!(stored["updated_by"], Value::from("system"));
    assert_eq!(stored["created_at"], Value::Text(created_at));

    let anonymous = SchemaRuntime::new(runtime.schema().clone()).unwrap();
    let staff = anonymous.get_table("employees").unwrap();
    let id = staff.insert(row(json!({"name": "Bob"}))).unwrap();
    assert_eq!(staff.get(&id).unwrap().unwrap()["created_by"], Value::Null);
}

#[test]
fn test_formula_columns_are_computed() {
    let runtime = runtime(
        r#"
name: orders
version: 1
tables:
  lines:
    columns:
      - { id: qty, type: number, required: true }
      - { id: price, type: number, required: true }
      - { id: total, type: formula, formula: "qty * price" }
      - { id: label, type: formula, formula: "upper(sku) + ' x' + qty" }
      - { id: sku, type: text }
"#,
    );
    let lines = runtime.get_table("lines").unwrap();

    let id = lines
        .insert(row(json!({"qty": 3, "price": 2.5, "total": 1, "sku": "ab"})))
        .unwrap();
    let stored = lines.get(&id).unwrap().unwrap();
    assert_eq!(stored["total"], Value::Float(7.5));
    assert_eq!(stored["label"], Value::from("AB x3"));

    lines.update(&id, row(json!({"qty": 4}))).unwrap();
    assert_eq!(lines.get(&id).unwrap().unwrap()["total"], Value::Float(10.0));
}

#[test]
fn test_custom_and_row_validations() {
    let runtime = runtime(
        r#"
name: events
version: 1
tables:
  events:
    columns:
      - id: title
        type: text
        validation:
          custom: "value.length >= 3"
          message: "Title is too short"
      - id: starts
        type: number
      - id: ends
        type: number
      - id: note
        type: text
        validation:
          custom: "value.length >>> 2"
    validations:
      - name: ordered
        type: row
        condition: "row.ends >= row.starts"
        message: "End must not precede start"
      - name: long_event
        type: row
        condition: "row.ends - row.starts < 100"
        severity: warning
"#,
    );
    let events = runtime.get_table("events").unwrap();

    let err = events.insert(row(json!({"title": "ab"}))).unwrap_err();
    assert_eq!(
        err,
        SchemaError::CustomValidation {
            column: "title".into(),
            message: "Title is too short".into()
        }
    );

    let err = events
        .insert(row(json!({"title": "Launch", "starts": 10, "ends": 5})))
        .unwrap_err();
    assert_eq!(
        err,
        SchemaError::RowValidation {
            rule: "ordered".into(),
            message: "End must not precede start".into()
        }
    );

    let id = events
        .insert(row(json!({"title": "Launch", "starts": 10, "ends": 500})))
        .unwrap();

    // row rules see the merged record on update
    let err = events.update(&id, row(json!({"ends": 1}))).unwrap_err();
    assert!(matches!(err, SchemaError::RowValidation { .. }));

    // a malformed custom expression fails closed and rejects the record
    let err = events
        .insert(row(json!({"title": "Launch", "starts": 1, "ends": 2, "note": "hello"})))
        .unwrap_err();
    assert_eq!(err.column(), Some("note"));
    assert!(matches!(err, SchemaError::CustomValidation { .. }));
    assert_eq!(events.count().unwrap(), 1);
}

#[test]
fn test_status_workflow_transitions() {
    let runtime = runtime(
        r#"
name: tickets
version: 1
tables:
  tickets:
    columns:
      - { id: title, type: text }
      - id: state
        type: status
        workflow:
          states: [open, in_progress, closed]
          initial: open
          transitions:
            - { from: open, to: in_progress }
            - { from: [open, in_progress], to: closed, condition: "row.title != ''" }
            - { from: "*", to: open }
"#,
    );
    let tickets = runtime.get_table("tickets").unwrap();

    let id = tickets.insert(row(json!({"title": "Bug"}))).unwrap();
    assert_eq!(tickets.get(&id).unwrap().unwrap()["state"], Value::from("open"));

    let err = tickets.insert(row(json!({"state": "archived"}))).unwrap_err();
    assert_eq!(err.column(), Some("state"));

    tickets.update(&id, row(json!({"state": "closed"}))).unwrap();
    let err = tickets.update(&id, row(json!({"state": "in_progress"}))).unwrap_err();
    assert_eq!(
        err,
        SchemaError::InvalidTransition {
            column: "state".into(),
            from: "closed".into(),
            to: "in_progress".into()
        }
    );

    tickets.update(&id, row(json!({"state": "open"}))).unwrap();
    tickets.update(&id, row(json!({"state": "in_progress"}))).unwrap();
}

#[test]
fn test_required_field_cannot_be_cleared() {
    let runtime = runtime(TASKS);
    let tasks = runtime.get_table("tasks").unwrap();
    let id = tasks.insert(row(json!({"title": "keep"}))).unwrap();

    let err = tasks.update(&id, row(json!({"title": null}))).unwrap_err();
    assert_eq!(err, SchemaError::RequiredField { column: "title".into() });
    assert_eq!(tasks.get(&id).unwrap().unwrap()["title"], Value::from("keep"));
}

#[test]
fn test_table_handles_share_state_across_threads() {
    let runtime = runtime(TASKS);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let tasks = runtime.get_table("tasks").unwrap();
            std::thread::spawn(move || {
                for n in 0..25 {
                    tasks
                        .insert(row(json!({"title": format!("w{worker}-{n}")})))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let tasks = runtime.get_table("tasks").unwrap();
    assert_eq!(tasks.count().unwrap(), 100);
    assert_eq!(tasks.all().unwrap().len(), 100);
}

#[test]
fn test_extreme_integer_arithmetic_keeps_table_usable() {
    let runtime = runtime(
        r#"
name: ledger
version: 1
tables:
  entries:
    columns:
      - id: n
        type: number
        validation:
          custom: "value / -1 != 0"
"#,
    );
    let entries = runtime.get_table("entries").unwrap();

    let id = entries.insert(row(json!({"n": i64::MIN}))).unwrap();
    assert_eq!(entries.get(&id).unwrap().unwrap()["n"], Value::Integer(i64::MIN));

    let other = entries.insert(row(json!({"n": 4}))).unwrap();
    entries.update(&other, row(json!({"n": i64::MIN}))).unwrap();
    assert_eq!(entries.count().unwrap(), 2);

    let err = entries.insert(row(json!({"n": 0}))).unwrap_err();
    assert!(matches!(err, SchemaError::CustomValidation { .. }), "{err:?}");
}
