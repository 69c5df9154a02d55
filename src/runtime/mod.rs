//! Executes a validated schema: one in-memory table per schema table, the
//! relation registry, automation dispatch, permissions and workflows.

pub mod automation;
pub mod config;
pub mod defaults;
pub mod permissions;
pub mod relation;
pub mod table;
pub mod template;
pub mod validation;
pub mod workflow;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, info};

pub use automation::{AutomationEvent, AutomationHandler, AutomationListener, RowEvent};
pub use config::{RetryPolicy, RuntimeConfig};
pub use defaults::MutationContext;
pub use permissions::PermissionSet;
pub use relation::{RelationHandler, RelationRegistry};
pub use table::RuntimeTable;
pub use workflow::{StepHandler, StepOutcome, StepStatus, WorkflowResult};

use crate::core::{Record, Result, SchemaError};
use crate::evaluator::Evaluator;
use crate::schema::SchemaDefinition;
use table::TableSlot;
use workflow::WorkflowExecutor;

/// State shared by every table handle of one runtime.
pub(crate) struct RuntimeState {
    pub(crate) schema: SchemaDefinition,
    pub(crate) config: RuntimeConfig,
    pub(crate) evaluator: Evaluator,
    pub(crate) tables: HashMap<String, TableSlot>,
    pub(crate) relations: RelationRegistry,
    pub(crate) permissions: PermissionSet,
    pub(crate) listeners: RwLock<Vec<Arc<dyn AutomationListener>>>,
    pub(crate) step_handlers: RwLock<HashMap<String, Arc<dyn StepHandler>>>,
}

impl RuntimeState {
    pub(crate) fn slot(&self, table: &str) -> Result<&TableSlot> {
        self.tables
            .get(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))
    }

    pub(crate) fn default_context(&self) -> MutationContext {
        MutationContext {
            user: self.config.default_user.clone(),
        }
    }
}

/// Runtime for a parsed schema.
///
/// # Examples
///
/// ```
/// use tabula::{SchemaParser, SchemaRuntime, Record, Value};
///
/// # fn main() -> tabula::Result<()> {
/// let schema = SchemaParser::new().parse(r#"
/// name: todo
/// version: 1
/// tables:
///   tasks:
///     columns:
///       - { id: title, type: text, required: true }
///       - { id: done, type: checkbox, default: false }
/// "#)?;
///
/// let runtime = SchemaRuntime::new(schema)?;
/// let tasks = runtime.get_table("tasks").expect("declared table");
/// let id = tasks.insert(Record::from([("title".to_string(), Value::from("Write docs"))]))?;
/// assert_eq!(tasks.get(&id)?.and_then(|r| r.get("done").cloned()), Some(Value::from(false)));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SchemaRuntime {
    state: Arc<RuntimeState>,
}

impl SchemaRuntime {
    pub fn new(schema: SchemaDefinition) -> Result<Self> {
        Self::with_config(schema, RuntimeConfig::default())
    }

    pub fn with_config(schema: SchemaDefinition, config: RuntimeConfig) -> Result<Self> {
        let relations = RelationRegistry::from_schema(&schema)?;
        let permissions = PermissionSet::from_schema(&schema);
        let evaluator =
            Evaluator::with_limits(config.max_expression_steps, config.expression_cache_size);

        let tables = schema
            .tables
            .iter()
            .map(|(name, table)| (name.clone(), TableSlot::new(name, table.clone())))
            .collect::<HashMap<_, _>>();
        let automations: usize = tables.values().map(|slot| slot.automations.len()).sum();

        info!(
            "runtime for schema '{}' v{}: {} tables, {} relations, {} automations",
            schema.name,
            schema.version,
            tables.len(),
            relations.len(),
            automations
        );

        Ok(Self {
            state: Arc::new(RuntimeState {
                schema,
                config,
                evaluator,
                tables,
                relations,
                permissions,
                listeners: RwLock::new(Vec::new()),
                step_handlers: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.state.schema
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.state.config
    }

    pub fn get_table(&self, name: &str) -> Option<RuntimeTable> {
        self.state
            .tables
            .contains_key(name)
            .then(|| RuntimeTable::new(name, Arc::clone(&self.state)))
    }

    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.state.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn relations(&self) -> &RelationRegistry {
        &self.state.relations
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.state.permissions
    }

    pub fn add_automation_listener(&self, listener: Arc<dyn AutomationListener>) -> Result<()> {
        self.state.listeners.write()?.push(listener);
        Ok(())
    }

    pub fn register_step_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Result<()> {
        let name = name.into();
        debug!("registered workflow step handler '{}'", name);
        self.state.step_handlers.write()?.insert(name, handler);
        Ok(())
    }

    /// Run a named workflow as the configured default user.
    pub async fn execute_workflow(&self, name: &str, context: Record) -> Result<WorkflowResult> {
        self.execute_workflow_as(name, context, self.state.default_context())
            .await
    }

    pub async fn execute_workflow_as(
        &self,
        name: &str,
        context: Record,
        mutation: MutationContext,
    ) -> Result<WorkflowResult> {
        let workflow = self
            .state
            .schema
            .workflow(name)
            .ok_or_else(|| SchemaError::WorkflowNotFound(name.to_string()))?;

        WorkflowExecutor::new(&self.state, name, workflow, mutation)
            .run(context)
            .await
    }
}

impl std::fmt::Debug for SchemaRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRuntime")
            .field("schema", &self.state.schema.name)
            .field("tables", &self.table_names())
            .finish()
    }
}
