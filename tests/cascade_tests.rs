use std::collections::BTreeMap;

use serde_json::json;
use tabula::{Record, SchemaError, SchemaParser, SchemaRuntime, Value};

fn runtime(cascade: bool) -> SchemaRuntime {
    let source = format!(
        r#"
name: planner
version: 1
tables:
  projects:
    columns: [id, "name:text"]
  tasks:
    columns:
      - id
      - "title:text"
      - id: projectId
        type: relation
        relation: {{ table: projects, column: id, cascade: {cascade} }}
  subtasks:
    columns:
      - "title:text"
      - id: task
        type: relation
        relation: {{ table: tasks, column: id, cascade: true }}
"#
    );
    let schema = SchemaParser::with_env(BTreeMap::new()).parse(&source).unwrap();
    SchemaRuntime::new(schema).unwrap()
}

fn row(value: serde_json::Value) -> Record {
    match Value::from(value) {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other:?}"),
    }
}

fn referencing(runtime: &SchemaRuntime, project: &str) -> usize {
    runtime
        .get_table("tasks")
        .unwrap()
        .find("projectId", &Value::from(project))
        .unwrap()
        .len()
}

#[test]
fn test_delete_cascades_to_referencing_tasks() {
    let runtime = runtime(true);
    let projects = runtime.get_table("projects").unwrap();
    let tasks = runtime.get_table("tasks").unwrap();

    let project = projects.insert(row(json!({"name": "Launch"}))).unwrap();
    let other = projects.insert(row(json!({"name": "Backlog"}))).unwrap();
    for n in 0..3 {
        tasks
            .insert(row(json!({"title": format!("step {n}"), "projectId": project})))
            .unwrap();
    }
    tasks
        .insert(row(json!({"title": "unrelated", "projectId": other})))
        .unwrap();
    assert_eq!(referencing(&runtime, &project), 3);

    projects.delete(&project).unwrap();

    assert_eq!(referencing(&runtime, &project), 0);
    assert_eq!(tasks.count().unwrap(), 1);
    assert_eq!(projects.count().unwrap(), 1);
    assert!(projects.get(&project).unwrap().is_none());
}

#[test]
fn test_cascade_follows_chains() {
    let runtime = runtime(true);
    let projects = runtime.get_table("projects").unwrap();
    let tasks = runtime.get_table("tasks").unwrap();
    let subtasks = runtime.get_table("subtasks").unwrap();

    let project = projects.insert(row(json!({"name": "Launch"}))).unwrap();
    let task = tasks
        .insert(row(json!({"title": "build", "projectId": project})))
        .unwrap();
    subtasks.insert(row(json!({"title": "a", "task": task}))).unwrap();
    subtasks.insert(row(json!({"title": "b", "task": task}))).unwrap();

    projects.delete(&project).unwrap();

    assert_eq!(tasks.count().unwrap(), 0);
    assert_eq!(subtasks.count().unwrap(), 0);
}

#[test]
fn test_without_cascade_children_remain() {
    let runtime = runtime(false);
    let projects = runtime.get_table("projects").unwrap();
    let tasks = runtime.get_table("tasks").unwrap();

    let project = projects.insert(row(json!({"name": "Launch"}))).unwrap();
    tasks
        .insert(row(json!({"title": "orphan", "projectId": project})))
        .unwrap();

    projects.delete(&project).unwrap();

    assert_eq!(referencing(&runtime, &project), 1);
    assert!(matches!(
        projects.delete(&project),
        Err(SchemaError::RecordNotFound { .. })
    ));
}

#[test]
fn test_relation_registry_and_unknown_target() {
    let runtime = runtime(true);
    let registry = runtime.relations();
    assert_eq!(registry.len(), 2);

    let handler = registry.get("tasks", "projectId").unwrap();
    assert_eq!(handler.target_table, "projects");
    assert!(handler.cascade);
    assert_eq!(registry.cascading_into("projects").count(), 1);

    // a schema that skipped validation can still name a missing table
    let mut schema = runtime.schema().clone();
    schema.tables.remove("projects");
    let err = SchemaRuntime::new(schema).unwrap_err();
    assert_eq!(err, SchemaError::UnknownTable("projects".into()));
}
