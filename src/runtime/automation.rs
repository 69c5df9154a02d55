use crate::core::{Record, Result, Value};
use crate::evaluator::{Evaluator, Scope};
use crate::schema::{ActionSchema, AutomationSchema, TriggerType};

/// Row lifecycle event produced by a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RowEvent {
    Created { record: Record },
    Updated { old: Record, new: Record },
    Deleted { record: Record },
}

impl RowEvent {
    /// The record the event is about (the new version for updates).
    pub fn record(&self) -> &Record {
        match self {
            RowEvent::Created { record } | RowEvent::Deleted { record } => record,
            RowEvent::Updated { new, .. } => new,
        }
    }

    pub fn old(&self) -> Option<&Record> {
        match self {
            RowEvent::Updated { old, .. } => Some(old),
            _ => None,
        }
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record().get("id").and_then(Value::as_str)
    }
}

/// One declared automation bound to its table.
#[derive(Debug, Clone)]
pub struct AutomationHandler {
    pub table: String,
    pub schema: AutomationSchema,
}

impl AutomationHandler {
    pub fn new(table: impl Into<String>, schema: AutomationSchema) -> Self {
        Self {
            table: table.into(),
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn trigger(&self) -> TriggerType {
        self.schema.trigger.kind
    }

    /// Whether the trigger type matches the event. `scheduled` never matches
    /// a row event.
    pub fn is_triggered_by(&self, event: &RowEvent) -> bool {
        if !self.schema.enabled {
            return false;
        }
        match (self.trigger(), event) {
            (TriggerType::RowCreated, RowEvent::Created { .. })
            | (TriggerType::RowUpdated, RowEvent::Updated { .. })
            | (TriggerType::RowDeleted, RowEvent::Deleted { .. }) => true,
            (TriggerType::FieldChanged, RowEvent::Updated { old, new }) => {
                match self.schema.trigger.field.as_deref() {
                    Some(field) => old.get(field) != new.get(field),
                    None => old != new,
                }
            }
            _ => false,
        }
    }

    /// Every condition must hold; evaluated with `{row, old}`.
    pub fn conditions_hold(
        &self,
        evaluator: &Evaluator,
        record: &Record,
        old: Option<&Record>,
    ) -> bool {
        if self.schema.conditions.is_empty() {
            return true;
        }
        let scope = Scope::from([
            ("row".to_string(), Value::Object(record.clone())),
            (
                "old".to_string(),
                old.map(|o| Value::Object(o.clone())).unwrap_or(Value::Null),
            ),
        ]);
        self.schema
            .conditions
            .iter()
            .all(|condition| evaluator.evaluate_condition(condition, &scope))
    }
}

/// What a listener receives for actions the runtime does not execute itself.
#[derive(Debug, Clone)]
pub struct AutomationEvent<'a> {
    pub table: &'a str,
    pub automation: &'a str,
    pub trigger: TriggerType,
    pub action: &'a ActionSchema,
    pub record: &'a Record,
    pub old: Option<&'a Record>,
}

/// Receiver for external automation actions (notifications, webhooks, ...).
pub trait AutomationListener: Send + Sync {
    fn on_action(&self, event: &AutomationEvent<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler(value: serde_json::Value) -> AutomationHandler {
        AutomationHandler::new("tasks", serde_json::from_value(value).unwrap())
    }

    fn record(value: serde_json::Value) -> Record {
        match Value::from(value) {
            Value::Object(map) => map,
            _ => panic!("record must be an object"),
        }
    }

    #[test]
    fn test_field_changed_trigger() {
        let handler = handler(json!({
            "name": "on_status",
            "trigger": {"type": "field_changed", "field": "status"},
            "actions": []
        }));
        let changed = RowEvent::Updated {
            old: record(json!({"status": "open"})),
            new: record(json!({"status": "done"})),
        };
        let unchanged = RowEvent::Updated {
            old: record(json!({"status": "open", "title": "a"})),
            new: record(json!({"status": "open", "title": "b"})),
        };
        assert!(handler.is_triggered_by(&changed));
        assert!(!handler.is_triggered_by(&unchanged));
    }

    #[test]
    fn test_disabled_and_scheduled_never_fire() {
        let disabled = handler(json!({
            "trigger": {"type": "row_created"},
            "enabled": false
        }));
        let scheduled = handler(json!({
            "trigger": {"type": "scheduled", "schedule": "0 9 * * *"}
        }));
        let event = RowEvent::Created { record: Record::new() };
        assert!(!disabled.is_triggered_by(&event));
        assert!(!scheduled.is_triggered_by(&event));
    }

    #[test]
    fn test_conditions_see_row_and_old() {
        let handler = handler(json!({
            "trigger": {"type": "row_updated"},
            "conditions": ["row.priority == 'high'", "old.priority != row.priority"]
        }));
        let evaluator = Evaluator::new();
        let old = record(json!({"priority": "low"}));
        let new = record(json!({"priority": "high"}));
        assert!(handler.conditions_hold(&evaluator, &new, Some(&old)));
        assert!(!handler.conditions_hold(&evaluator, &new, Some(&new)));
    }
}
