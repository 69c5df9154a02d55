use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use super::RuntimeState;
use super::automation::{AutomationEvent, AutomationHandler, RowEvent};
use super::defaults::{MutationContext, generate_record_id, resolve_default, resolve_sentinel};
use super::template::render_values;
use super::validation::RecordValidator;
use crate::core::{Record, Result, SchemaError, Value};
use crate::schema::{ActionKind, ActionSchema, ColumnType, TableSchema, TriggerType};
use crate::storage::TableData;

/// Reserved record key holding the generated id.
pub const RECORD_ID: &str = "id";

/// Attempts an update makes before giving up on a record under contention.
const UPDATE_ATTEMPTS: usize = 16;

/// Per-table state owned by the runtime.
pub(crate) struct TableSlot {
    pub(crate) schema: TableSchema,
    pub(crate) data: RwLock<TableData>,
    pub(crate) automations: Vec<AutomationHandler>,
}

impl TableSlot {
    pub(crate) fn new(name: &str, schema: TableSchema) -> Self {
        let automations = schema
            .automations
            .iter()
            .map(|a| AutomationHandler::new(name, a.clone()))
            .collect();
        Self {
            data: RwLock::new(TableData::new(name, &schema)),
            schema,
            automations,
        }
    }
}

/// Handle to one table of a [`SchemaRuntime`](super::SchemaRuntime).
///
/// Cheap to clone; all handles for a table share the same records.
/// Mutations validate and store under the table's write lock, then run
/// matching automations before returning.
#[derive(Clone)]
pub struct RuntimeTable {
    name: String,
    state: Arc<RuntimeState>,
}

impl RuntimeTable {
    pub(crate) fn new(name: impl Into<String>, state: Arc<RuntimeState>) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Result<&TableSchema> {
        Ok(&self.state.slot(&self.name)?.schema)
    }

    /// Insert as the runtime's default user. Returns the generated id.
    pub fn insert(&self, data: Record) -> Result<String> {
        self.insert_as(data, &self.state.default_context())
    }

    pub fn insert_as(&self, data: Record, context: &MutationContext) -> Result<String> {
        self.state.insert_record(&self.name, data, context, 0)
    }

    pub fn update(&self, id: &str, updates: Record) -> Result<()> {
        self.update_as(id, updates, &self.state.default_context())
    }

    pub fn update_as(&self, id: &str, updates: Record, context: &MutationContext) -> Result<()> {
        self.state
            .update_record(&self.name, id, updates, context, 0, true)
    }

    /// Delete a record, first deleting dependents along cascading relations.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.delete_as(id, &self.state.default_context())
    }

    pub fn delete_as(&self, id: &str, context: &MutationContext) -> Result<()> {
        self.state.delete_record(&self.name, id, context, 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<Record>> {
        let slot = self.state.slot(&self.name)?;
        Ok(slot.data.read()?.get(id).cloned())
    }

    pub fn all(&self) -> Result<Vec<Record>> {
        let slot = self.state.slot(&self.name)?;
        Ok(slot.data.read()?.records().cloned().collect())
    }

    pub fn count(&self) -> Result<usize> {
        let slot = self.state.slot(&self.name)?;
        Ok(slot.data.read()?.len())
    }

    pub fn find(&self, column: &str, value: &Value) -> Result<Vec<Record>> {
        let slot = self.state.slot(&self.name)?;
        Ok(slot.data.read()?.find(column, value))
    }

    /// Run the validation pipeline without storing anything.
    pub fn validate(&self, data: &Record, existing: Option<&Record>) -> Result<()> {
        let slot = self.state.slot(&self.name)?;
        RecordValidator::new(&self.name, &slot.schema, &self.state.evaluator)
            .validate(data, existing)
    }

    /// Fire `scheduled` automations once against every record whose
    /// conditions hold. Returns the number of firings.
    pub fn run_scheduled_automations(&self) -> Result<usize> {
        let context = self.state.default_context();
        let slot = self.state.slot(&self.name)?;
        let records: Vec<Record> = slot.data.read()?.records().cloned().collect();

        let mut fired = 0;
        for handler in slot
            .automations
            .iter()
            .filter(|h| h.schema.enabled && h.trigger() == TriggerType::Scheduled)
        {
            for record in &records {
                if !handler.conditions_hold(&self.state.evaluator, record, None) {
                    continue;
                }
                fired += 1;
                self.state
                    .run_actions(handler, record, None, &context, 0);
            }
        }
        Ok(fired)
    }
}

impl std::fmt::Debug for RuntimeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeTable").field("name", &self.name).finish()
    }
}

// ============================================================================
// Mutation pipeline
// ============================================================================

impl RuntimeState {
    pub(crate) fn insert_record(
        &self,
        table: &str,
        data: Record,
        context: &MutationContext,
        depth: usize,
    ) -> Result<String> {
        let slot = self.slot(table)?;
        let id = generate_record_id(table);

        let mut record = strip_computed(&slot.schema, data);
        record.insert(RECORD_ID.to_string(), Value::Text(id.clone()));

        RecordValidator::new(table, &slot.schema, &self.evaluator).validate(&record, None)?;

        for column in &slot.schema.columns {
            if record.contains_key(&column.id) {
                continue;
            }
            if let Some(default) = &column.default {
                record.insert(column.id.clone(), resolve_default(default, context));
            } else if column.column_type == ColumnType::Status
                && let Some(initial) = column.workflow.as_ref().and_then(|w| w.initial.clone())
            {
                record.insert(column.id.clone(), Value::Text(initial));
            }
        }
        self.apply_formulas(&slot.schema, &mut record, context);

        // expressions never run under the table lock
        slot.data.write()?.insert(id.clone(), record.clone())?;

        debug!("{}: inserted {}", table, id);
        self.dispatch(table, RowEvent::Created { record }, context, depth);
        Ok(id)
    }

    pub(crate) fn update_record(
        &self,
        table: &str,
        id: &str,
        updates: Record,
        context: &MutationContext,
        depth: usize,
        fire_automations: bool,
    ) -> Result<()> {
        let slot = self.slot(table)?;
        let updates = strip_computed(&slot.schema, updates);

        let not_found = || SchemaError::RecordNotFound {
            table: table.to_string(),
            id: id.to_string(),
        };

        // Validate against a snapshot, then store only if the record is
        // still the one that was validated.
        let mut attempts = 0;
        let (old, new) = loop {
            attempts += 1;
            let existing = slot.data.read()?.get(id).cloned().ok_or_else(not_found)?;
            RecordValidator::new(table, &slot.schema, &self.evaluator)
                .validate(&updates, Some(&existing))?;

            let mut merged = existing.clone();
            merged.extend(updates.clone());
            self.apply_formulas(&slot.schema, &mut merged, context);

            let mut data = slot.data.write()?;
            match data.get(id) {
                None => return Err(not_found()),
                Some(current) if *current != existing => {
                    if attempts >= UPDATE_ATTEMPTS {
                        return Err(SchemaError::Lock(format!(
                            "{}: record {} kept changing during update",
                            table, id
                        )));
                    }
                    debug!("{}: {} changed during update, revalidating", table, id);
                    continue;
                }
                Some(_) => {}
            }
            data.replace(id, merged.clone())?;
            break (existing, merged);
        };

        debug!("{}: updated {}", table, id);
        if fire_automations {
            self.dispatch(table, RowEvent::Updated { old, new }, context, depth);
        }
        Ok(())
    }

    pub(crate) fn delete_record(
        &self,
        table: &str,
        id: &str,
        context: &MutationContext,
        depth: usize,
    ) -> Result<()> {
        let mut visited = HashSet::new();
        self.delete_cascading(table, id, context, depth, &mut visited)
    }

    fn delete_cascading(
        &self,
        table: &str,
        id: &str,
        context: &MutationContext,
        depth: usize,
        visited: &mut HashSet<(String, String)>,
    ) -> Result<()> {
        let slot = self.slot(table)?;
        let not_found = || SchemaError::RecordNotFound {
            table: table.to_string(),
            id: id.to_string(),
        };
        // Children are chosen from this snapshot; a write to the parent
        // before its removal below is dropped along with it.
        let parent = slot.data.read()?.get(id).cloned().ok_or_else(not_found)?;
        visited.insert((table.to_string(), id.to_string()));

        for relation in self.relations.cascading_into(table) {
            let key = parent
                .get(&relation.target_column)
                .cloned()
                .unwrap_or_default();
            if key.is_null() {
                continue;
            }

            let children: Vec<String> = self
                .slot(&relation.table)?
                .data
                .read()?
                .records()
                .filter(|child| relation.references(child, &key))
                .filter_map(|child| child.get(RECORD_ID).and_then(Value::as_str))
                .map(str::to_string)
                .collect();

            for child_id in children {
                if visited.contains(&(relation.table.clone(), child_id.clone())) {
                    continue;
                }
                debug!(
                    "{}: cascading delete of {} via {}.{}",
                    table, child_id, relation.table, relation.column
                );
                match self.delete_cascading(&relation.table, &child_id, context, depth, visited) {
                    Ok(()) | Err(SchemaError::RecordNotFound { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        let removed = slot.data.write()?.remove(id).ok_or_else(not_found)?;
        debug!("{}: deleted {}", table, id);
        self.dispatch(table, RowEvent::Deleted { record: removed }, context, depth);
        Ok(())
    }

    /// Recompute every column that carries a formula.
    fn apply_formulas(&self, schema: &TableSchema, record: &mut Record, context: &MutationContext) {
        for column in &schema.columns {
            let Some(formula) = column.formula.as_deref() else {
                continue;
            };
            let value = match resolve_sentinel(formula, context) {
                Some(value) => value,
                None => {
                    let mut scope = record.clone();
                    scope.insert("row".to_string(), Value::Object(record.clone()));
                    self.evaluator.evaluate_value(formula, &scope)
                }
            };
            record.insert(column.id.clone(), value);
        }
    }

    // ========================================================================
    // Automations
    // ========================================================================

    fn dispatch(&self, table: &str, event: RowEvent, context: &MutationContext, depth: usize) {
        let Ok(slot) = self.slot(table) else {
            return;
        };
        if slot.automations.is_empty() {
            return;
        }
        if depth >= self.config.max_automation_depth {
            warn!(
                "{}: automation depth limit {} reached; skipping automations",
                table, self.config.max_automation_depth
            );
            return;
        }

        for handler in &slot.automations {
            if !handler.is_triggered_by(&event)
                || !handler.conditions_hold(&self.evaluator, event.record(), event.old())
            {
                continue;
            }
            debug!("{}: automation '{}' fired", table, handler.name());
            self.run_actions(handler, event.record(), event.old(), context, depth);
        }
    }

    pub(crate) fn run_actions(
        &self,
        handler: &AutomationHandler,
        record: &Record,
        old: Option<&Record>,
        context: &MutationContext,
        depth: usize,
    ) {
        for action in &handler.schema.actions {
            if let Err(err) = self.run_action(handler, action, record, old, context, depth) {
                warn!(
                    "{}: automation '{}' action '{}' failed: {}",
                    handler.table,
                    handler.name(),
                    String::from(action.kind.clone()),
                    err
                );
            }
        }
    }

    fn run_action(
        &self,
        handler: &AutomationHandler,
        action: &ActionSchema,
        record: &Record,
        old: Option<&Record>,
        context: &MutationContext,
        depth: usize,
    ) -> Result<()> {
        let mut scope = record.clone();
        scope.insert("row".to_string(), Value::Object(record.clone()));
        if let Some(old) = old {
            scope.insert("old".to_string(), Value::Object(old.clone()));
        }

        match &action.kind {
            ActionKind::UpdateRecord => {
                let id = record
                    .get(RECORD_ID)
                    .and_then(Value::as_str)
                    .ok_or_else(|| SchemaError::RecordNotFound {
                        table: handler.table.clone(),
                        id: String::new(),
                    })?;
                let values = render_values(&action.values, &scope, context);
                self.update_record(&handler.table, id, values, context, depth + 1, false)
            }
            ActionKind::CreateRecord => {
                let target = action.table.as_deref().ok_or_else(|| {
                    SchemaError::SchemaStructure(format!(
                        "automation '{}': create_record needs a table",
                        handler.name()
                    ))
                })?;
                let values = render_values(&action.values, &scope, context);
                self.insert_record(target, values, context, depth + 1)
                    .map(|_| ())
            }
            ActionKind::External(kind) => {
                let listeners = self.listeners.read()?.clone();
                if listeners.is_empty() {
                    debug!("{}: no listener for action '{}'", handler.table, kind);
                    return Ok(());
                }
                let event = AutomationEvent {
                    table: &handler.table,
                    automation: handler.name(),
                    trigger: handler.trigger(),
                    action,
                    record,
                    old,
                };
                for listener in listeners {
                    if let Err(err) = listener.on_action(&event) {
                        warn!("{}: listener rejected action '{}': {}", handler.table, kind, err);
                    }
                }
                Ok(())
            }
        }
    }
}

/// Drop the reserved id and computed columns from caller-supplied data.
fn strip_computed(schema: &TableSchema, mut data: Record) -> Record {
    data.remove(RECORD_ID);
    for column in schema.columns.iter().filter(|c| c.formula.is_some()) {
        data.remove(&column.id);
    }
    data
}
