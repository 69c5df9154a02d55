use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{Instrument, Level, event, info_span};

use super::RuntimeState;
use super::config::RetryPolicy;
use super::defaults::MutationContext;
use super::template::render_values;
use crate::core::{Record, Result, SchemaError, Value};
use crate::evaluator::Scope;
use crate::schema::{ErrorHandling, StepKind, StepNext, WorkflowSchema, WorkflowStep};

/// Step target that finishes the run.
pub const END: &str = "end";

/// Context key under which every step's output is recorded.
pub const STEP_OUTPUTS: &str = "steps";

/// Handler for `action` steps, registered by name on the runtime.
pub trait StepHandler: Send + Sync {
    fn handle(&self, params: &Record, context: &Record) -> Result<Value>;
}

impl<F> StepHandler for F
where
    F: Fn(&Record, &Record) -> Result<Value> + Send + Sync,
{
    fn handle(&self, params: &Record, context: &Record) -> Result<Value> {
        self(params, context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub kind: StepKind,
    pub status: StepStatus,
    pub attempts: u32,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResult {
    pub workflow: String,
    pub steps: Vec<StepOutcome>,
    pub context: Record,
}

impl WorkflowResult {
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|o| o.step == step)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|o| o.status == StepStatus::Failed)
    }
}

/// Runs one workflow definition against a context.
pub(crate) struct WorkflowExecutor<'a> {
    state: &'a RuntimeState,
    name: &'a str,
    workflow: &'a WorkflowSchema,
    mutation: MutationContext,
}

impl<'a> WorkflowExecutor<'a> {
    pub(crate) fn new(
        state: &'a RuntimeState,
        name: &'a str,
        workflow: &'a WorkflowSchema,
        mutation: MutationContext,
    ) -> Self {
        Self {
            state,
            name,
            workflow,
            mutation,
        }
    }

    pub(crate) async fn run(&self, context: Record) -> Result<WorkflowResult> {
        let span = info_span!(
            "workflow.run",
            workflow = %self.name,
            steps = self.workflow.steps.len()
        );
        self.run_steps(context).instrument(span).await
    }

    async fn run_steps(&self, mut context: Record) -> Result<WorkflowResult> {
        let steps = &self.workflow.steps;
        let budget = self.state.config.max_workflow_steps;
        let mut outcomes = Vec::new();
        let mut cursor = if steps.is_empty() { None } else { Some(0) };
        let mut executed = 0usize;

        while let Some(index) = cursor {
            let step = &steps[index];
            executed += 1;
            if executed > budget {
                event!(Level::ERROR, step = %step.id, budget, "workflow step budget exhausted");
                return Err(self.step_failed(step, format!("step budget of {} exhausted", budget)));
            }

            let (result, attempts) = self
                .run_with_policy(step, &mut context)
                .instrument(info_span!("workflow.step", step = %step.id))
                .await;

            match result {
                Ok(output) => {
                    record_output(&mut context, &step.id, &output);
                    cursor = self.next_index(step, index, Some(&output))?;
                    outcomes.push(StepOutcome {
                        step: step.id.clone(),
                        kind: step.kind,
                        status: StepStatus::Succeeded,
                        attempts,
                        output,
                        error: None,
                    });
                }
                Err(err) if step.error_handling == ErrorHandling::Continue => {
                    event!(
                        Level::WARN,
                        step = %step.id,
                        error = %err,
                        "workflow step failed; continuing"
                    );
                    cursor = self.next_index(step, index, None)?;
                    outcomes.push(StepOutcome {
                        step: step.id.clone(),
                        kind: step.kind,
                        status: StepStatus::Failed,
                        attempts,
                        output: Value::Null,
                        error: Some(err.to_string()),
                    });
                }
                Err(err) => {
                    event!(
                        Level::ERROR,
                        step = %step.id,
                        attempts,
                        error = %err,
                        "workflow step failed"
                    );
                    return Err(self.step_failed(step, err.to_string()));
                }
            }
        }

        event!(Level::DEBUG, executed, "workflow completed");
        Ok(WorkflowResult {
            workflow: self.name.to_string(),
            steps: outcomes,
            context,
        })
    }

    fn retry_policy(&self, step: &WorkflowStep) -> RetryPolicy {
        let defaults = &self.state.config.retry;
        let max_attempts = match step.error_handling {
            ErrorHandling::Retry => step.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            ErrorHandling::Stop | ErrorHandling::Continue => 1,
        };
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: step.backoff_ms.unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: step.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
        }
    }

    async fn run_with_policy(
        &self,
        step: &WorkflowStep,
        context: &mut Record,
    ) -> (Result<Value>, u32) {
        let policy = self.retry_policy(step);
        let mut last_err = None;

        for attempt in 1..=policy.max_attempts {
            match self.run_step(step, context).await {
                Ok(output) => return (Ok(output), attempt),
                Err(err) => {
                    event!(Level::WARN, attempt, error = %err, "workflow step attempt failed");
                    last_err = Some(err);
                }
            }
            if attempt < policy.max_attempts {
                sleep(Duration::from_millis(policy.backoff_ms(attempt))).await;
            }
        }

        let err = last_err.unwrap_or_else(|| {
            SchemaError::Expression(format!("step '{}' made no attempts", step.id))
        });
        (Err(err), policy.max_attempts)
    }

    async fn run_step(&self, step: &WorkflowStep, context: &mut Record) -> Result<Value> {
        let evaluator = &self.state.evaluator;

        match step.kind {
            StepKind::Condition => {
                let condition = required(step, "condition", step.condition.as_deref())?;
                Ok(Value::Boolean(
                    evaluator.evaluate_condition(condition, &scope(context)),
                ))
            }
            StepKind::Set => {
                let mut assigned = Record::new();
                for (key, expression) in &step.assign {
                    let value = evaluator.try_evaluate(expression, &scope(context))?;
                    context.insert(key.clone(), value.clone());
                    assigned.insert(key.clone(), value);
                }
                Ok(Value::Object(assigned))
            }
            StepKind::InsertRecord => {
                let table = required(step, "table", step.table.as_deref())?;
                let values = render_values(&step.values, context, &self.mutation);
                let id = self.state.insert_record(table, values, &self.mutation, 0)?;
                Ok(Value::Text(id))
            }
            StepKind::UpdateRecord => {
                let table = required(step, "table", step.table.as_deref())?;
                let id = self.record_id(step, context)?;
                let values = render_values(&step.values, context, &self.mutation);
                self.state
                    .update_record(table, &id, values, &self.mutation, 0, true)?;
                Ok(Value::Text(id))
            }
            StepKind::DeleteRecord => {
                let table = required(step, "table", step.table.as_deref())?;
                let id = self.record_id(step, context)?;
                self.state.delete_record(table, &id, &self.mutation, 0)?;
                Ok(Value::Text(id))
            }
            StepKind::Delay => {
                sleep(Duration::from_millis(step.duration_ms.unwrap_or(0))).await;
                Ok(Value::Null)
            }
            StepKind::Action => {
                let name = required(step, "action", step.action.as_deref())?;
                let handler = self
                    .state
                    .step_handlers
                    .read()?
                    .get(name)
                    .cloned()
                    .ok_or_else(|| {
                        SchemaError::Expression(format!(
                            "no handler registered for action '{}'",
                            name
                        ))
                    })?;
                let params = render_values(&step.params, context, &self.mutation);
                handler.handle(&params, context)
            }
        }
    }

    fn record_id(&self, step: &WorkflowStep, context: &Record) -> Result<String> {
        let expression = required(step, "record_id", step.record_id.as_deref())?;
        match self.state.evaluator.try_evaluate(expression, &scope(context))? {
            Value::Text(id) => Ok(id),
            Value::Integer(id) => Ok(id.to_string()),
            other => Err(SchemaError::Expression(format!(
                "record_id evaluated to {}, expected an id",
                other.type_name()
            ))),
        }
    }

    /// Where to go after `step`. `output` is `None` when the step failed.
    ///
    /// A branch with no target for the taken side continues in order when the
    /// outcome was true and ends the run when it was false; a `condition` step
    /// without `next` behaves the same way.
    fn next_index(
        &self,
        step: &WorkflowStep,
        index: usize,
        output: Option<&Value>,
    ) -> Result<Option<usize>> {
        let truthy = output.is_some_and(Value::as_bool);
        let sequential = (index + 1 < self.workflow.steps.len()).then_some(index + 1);

        match &step.next {
            Some(StepNext::Goto(target)) => self.resolve(step, target),
            Some(StepNext::Branch { on_true, on_false }) => {
                let target = if truthy { on_true } else { on_false };
                match target {
                    Some(target) => self.resolve(step, target),
                    None if truthy => Ok(sequential),
                    None => Ok(None),
                }
            }
            None if step.kind == StepKind::Condition && !truthy => Ok(None),
            None => Ok(sequential),
        }
    }

    fn resolve(&self, step: &WorkflowStep, target: &str) -> Result<Option<usize>> {
        if target == END {
            return Ok(None);
        }
        self.workflow
            .steps
            .iter()
            .position(|s| s.id == target)
            .map(Some)
            .ok_or_else(|| self.step_failed(step, format!("unknown next step '{}'", target)))
    }

    fn step_failed(&self, step: &WorkflowStep, message: String) -> SchemaError {
        SchemaError::WorkflowStepFailed {
            workflow: self.name.to_string(),
            step: step.id.clone(),
            message,
        }
    }
}

fn required<'s>(step: &WorkflowStep, field: &str, value: Option<&'s str>) -> Result<&'s str> {
    value.ok_or_else(|| {
        SchemaError::SchemaStructure(format!(
            "{:?} step '{}' needs '{}'",
            step.kind, step.id, field
        ))
    })
}

/// Context entries bound by name, plus the whole context as `context`.
fn scope(context: &Record) -> Scope {
    let mut scope = context.clone();
    scope.insert("context".to_string(), Value::Object(context.clone()));
    scope
}

fn record_output(context: &mut Record, step: &str, output: &Value) {
    let outputs = context
        .entry(STEP_OUTPUTS.to_string())
        .or_insert_with(|| Value::Object(Record::new()));
    if !matches!(outputs, Value::Object(_)) {
        *outputs = Value::Object(Record::new());
    }
    if let Value::Object(map) = outputs {
        map.insert(step.to_string(), output.clone());
    }
}
