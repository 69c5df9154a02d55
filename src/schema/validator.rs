use std::collections::HashSet;

use log::debug;

use super::types::{ColumnSchema, ColumnType, SchemaDefinition, StepNext, TableSchema};
use crate::core::{Result, SchemaError};
use crate::expression::compile_pattern;

/// Fail-fast structural validation of a canonical schema.
///
/// Per-table checks run first for every table; relation targets are only
/// resolved once all tables are known to be well formed.
pub fn validate(schema: &SchemaDefinition) -> Result<()> {
    validate_root(schema)?;

    for (name, table) in &schema.tables {
        validate_table(name, table)?;
    }

    for (name, table) in &schema.tables {
        validate_references(schema, name, table)?;
    }

    validate_workflows(schema)?;

    debug!(
        "schema '{}' v{} validated ({} tables)",
        schema.name,
        schema.version,
        schema.tables.len()
    );
    Ok(())
}

fn validate_root(schema: &SchemaDefinition) -> Result<()> {
    if schema.name.trim().is_empty() {
        return Err(SchemaError::SchemaStructure(
            "schema must have a name".to_string(),
        ));
    }
    if schema.version.trim().is_empty() {
        return Err(SchemaError::SchemaStructure(
            "schema must have a version".to_string(),
        ));
    }
    if schema.tables.is_empty() {
        return Err(SchemaError::SchemaStructure(
            "schema must define at least one table".to_string(),
        ));
    }
    Ok(())
}

fn validate_table(name: &str, table: &TableSchema) -> Result<()> {
    if table.columns.is_empty() {
        return Err(SchemaError::TableStructure {
            table: name.to_string(),
            message: "table must have at least one column".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for column in &table.columns {
        if column.id.trim().is_empty() {
            return Err(SchemaError::ColumnStructure {
                table: name.to_string(),
                message: "every column must have an id".to_string(),
            });
        }
        if !seen.insert(column.id.as_str()) {
            return Err(SchemaError::ColumnStructure {
                table: name.to_string(),
                message: format!("duplicate column id '{}'", column.id),
            });
        }
        if !column.column_type.is_known() {
            return Err(SchemaError::InvalidType {
                table: name.to_string(),
                column: column.id.clone(),
                column_type: column.column_type.to_string(),
            });
        }
        validate_column_shape(name, column)?;
    }

    for index in &table.indexes {
        if index.columns.is_empty() {
            return Err(SchemaError::TableStructure {
                table: name.to_string(),
                message: format!("index '{}' has no columns", index.display_name()),
            });
        }
        if let Some(missing) = index.columns.iter().find(|c| !table.has_column(c)) {
            return Err(SchemaError::TableStructure {
                table: name.to_string(),
                message: format!(
                    "index '{}' references unknown column '{}'",
                    index.display_name(),
                    missing
                ),
            });
        }
    }

    Ok(())
}

fn validate_column_shape(table: &str, column: &ColumnSchema) -> Result<()> {
    let shape_error = |message: String| SchemaError::ColumnShape {
        table: table.to_string(),
        column: column.id.clone(),
        message,
    };

    match column.column_type {
        ColumnType::Select | ColumnType::MultiSelect => {
            if column.options.as_ref().is_none_or(Vec::is_empty) {
                return Err(shape_error(format!(
                    "{} column must declare a non-empty options list",
                    column.column_type
                )));
            }
        }
        ColumnType::Relation => {
            let complete = column
                .relation
                .as_ref()
                .is_some_and(|r| !r.table.is_empty() && !r.column.is_empty());
            if !complete {
                return Err(shape_error(
                    "relation column must declare relation.table and relation.column".to_string(),
                ));
            }
        }
        ColumnType::Formula => {
            if column.formula.as_deref().is_none_or(|f| f.trim().is_empty()) {
                return Err(shape_error(
                    "formula column must declare a non-empty formula".to_string(),
                ));
            }
        }
        ColumnType::Status => {
            if let Some(workflow) = &column.workflow {
                for transition in &workflow.transitions {
                    let unknown = transition
                        .from
                        .states()
                        .into_iter()
                        .chain(std::iter::once(transition.to.as_str()))
                        .find(|s| *s != "*" && !workflow.has_state(s));
                    if let Some(state) = unknown {
                        return Err(shape_error(format!(
                            "workflow transition references undeclared state '{}'",
                            state
                        )));
                    }
                }
                if let Some(initial) = &workflow.initial
                    && !workflow.has_state(initial)
                {
                    return Err(shape_error(format!(
                        "workflow initial state '{}' is not declared",
                        initial
                    )));
                }
            }
        }
        _ => {}
    }

    if let Some(pattern) = column.validation.as_ref().and_then(|v| v.pattern.as_deref())
        && let Err(err) = compile_pattern(pattern)
    {
        return Err(shape_error(err.to_string()));
    }

    Ok(())
}

fn validate_references(schema: &SchemaDefinition, name: &str, table: &TableSchema) -> Result<()> {
    for column in &table.columns {
        let Some(relation) = &column.relation else {
            continue;
        };
        if column.column_type != ColumnType::Relation {
            continue;
        }

        let Some(target) = schema.table(&relation.table) else {
            return Err(SchemaError::DanglingReference {
                table: name.to_string(),
                column: column.id.clone(),
                target: format!("table '{}'", relation.table),
            });
        };
        if !target.has_column(&relation.column) {
            return Err(SchemaError::DanglingReference {
                table: name.to_string(),
                column: column.id.clone(),
                target: format!("column '{}.{}'", relation.table, relation.column),
            });
        }
    }
    Ok(())
}

fn validate_workflows(schema: &SchemaDefinition) -> Result<()> {
    for (name, workflow) in &schema.workflows {
        let mut ids = HashSet::new();
        for step in &workflow.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(SchemaError::SchemaStructure(format!(
                    "workflow '{}' has duplicate step id '{}'",
                    name, step.id
                )));
            }
        }

        for step in &workflow.steps {
            let targets: Vec<&str> = match &step.next {
                Some(StepNext::Goto(target)) => vec![target.as_str()],
                Some(StepNext::Branch { on_true, on_false }) => {
                    on_true.iter().chain(on_false).map(String::as_str).collect()
                }
                None => Vec::new(),
            };
            if let Some(unknown) = targets
                .into_iter()
                .find(|t| *t != "end" && !ids.contains(t))
            {
                return Err(SchemaError::SchemaStructure(format!(
                    "workflow '{}' step '{}' jumps to unknown step '{}'",
                    name, step.id, unknown
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: serde_json::Value) -> SchemaDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_root_requires_tables() {
        let err = validate(&schema(json!({"name": "app", "version": "1", "tables": {}}))).unwrap_err();
        assert!(matches!(err, SchemaError::SchemaStructure(_)));
    }

    #[test]
    fn test_duplicate_column_ids() {
        let err = validate(&schema(json!({
            "name": "app", "version": "1",
            "tables": {"t": {"columns": [{"id": "a", "type": "text"}, {"id": "a", "type": "number"}]}}
        })))
        .unwrap_err();
        assert!(matches!(err, SchemaError::ColumnStructure { .. }));
    }

    #[test]
    fn test_unknown_type() {
        let err = validate(&schema(json!({
            "name": "app", "version": "1",
            "tables": {"t": {"columns": [{"id": "a", "type": "blob"}]}}
        })))
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::InvalidType {
                table: "t".into(),
                column: "a".into(),
                column_type: "blob".into()
            }
        );
    }

    #[test]
    fn test_select_requires_options() {
        let err = validate(&schema(json!({
            "name": "app", "version": "1",
            "tables": {"t": {"columns": [{"id": "p", "type": "select", "options": []}]}}
        })))
        .unwrap_err();
        assert!(matches!(err, SchemaError::ColumnShape { .. }));
    }

    #[test]
    fn test_dangling_relation_column() {
        let err = validate(&schema(json!({
            "name": "app", "version": "1",
            "tables": {
                "projects": {"columns": [{"id": "id", "type": "text"}]},
                "tasks": {"columns": [{
                    "id": "project", "type": "relation",
                    "relation": {"table": "projects", "column": "uuid"}
                }]}
            }
        })))
        .unwrap_err();
        assert!(matches!(err, SchemaError::DanglingReference { .. }));
    }

    #[test]
    fn test_status_transitions_must_name_states() {
        let err = validate(&schema(json!({
            "name": "app", "version": "1",
            "tables": {"t": {"columns": [{
                "id": "state", "type": "status",
                "workflow": {
                    "states": ["open", "closed"],
                    "transitions": [{"from": "open", "to": "archived"}]
                }
            }]}}
        })))
        .unwrap_err();
        assert!(matches!(err, SchemaError::ColumnShape { .. }));
    }

    #[test]
    fn test_index_on_unknown_column() {
        let err = validate(&schema(json!({
            "name": "app", "version": "1",
            "tables": {"t": {"columns": [{"id": "a", "type": "text"}], "indexes": [{"columns": ["b"]}]}}
        })))
        .unwrap_err();
        assert!(matches!(err, SchemaError::TableStructure { .. }));
    }
}
