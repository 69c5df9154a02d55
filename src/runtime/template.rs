use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use super::defaults::{MutationContext, resolve_sentinel};
use crate::core::{Record, Value};
use crate::schema::expander::substitute_with;

/// Render literal values from automations and workflow steps: sentinels
/// resolve like defaults, `${path}` tokens read from `scope`.
pub fn render_values(
    values: &BTreeMap<String, Value>,
    scope: &Record,
    context: &MutationContext,
) -> Record {
    values
        .iter()
        .map(|(key, value)| (key.clone(), render_value(value, scope, context)))
        .collect()
}

pub fn render_value(value: &Value, scope: &Record, context: &MutationContext) -> Value {
    if let Some(raw) = value.as_str()
        && let Some(resolved) = resolve_sentinel(raw, context)
    {
        return resolved;
    }
    let rendered = substitute_with(JsonValue::from(value.clone()), &|path| {
        lookup_path(scope, path).map(JsonValue::from)
    });
    Value::from(rendered)
}

/// Dotted lookup, e.g. `row.project` or `steps.create.id`.
pub fn lookup_path(scope: &Record, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let mut current = scope.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_reads_scope_and_sentinels() {
        let scope = Record::from([
            ("id".to_string(), Value::from("tasks_1_abc")),
            (
                "row".to_string(),
                Value::Object(Record::from([("title".to_string(), Value::from("Ship"))])),
            ),
        ]);
        let values = BTreeMap::from([
            ("task".to_string(), Value::from("${id}")),
            ("note".to_string(), Value::from("done: ${row.title}")),
            ("by".to_string(), Value::from("current_user()")),
            ("count".to_string(), Value::from(3)),
        ]);

        let rendered = render_values(&values, &scope, &MutationContext::as_user("ada"));
        assert_eq!(rendered["task"], Value::from("tasks_1_abc"));
        assert_eq!(rendered["note"], Value::from("done: Ship"));
        assert_eq!(rendered["by"], Value::from("ada"));
        assert_eq!(rendered["count"], Value::from(3));
    }
}
