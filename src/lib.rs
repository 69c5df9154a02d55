// ============================================================================
// Tabula: schema-as-code runtime
// ============================================================================

pub mod core;
pub mod evaluator;
pub mod expression;
pub mod parser;
pub mod runtime;
pub mod schema;
pub mod storage;

// Re-export main types for convenience
pub use core::{Record, Result, SchemaError, Value};
pub use evaluator::{Evaluator, Scope};
pub use runtime::{
    AutomationEvent, AutomationListener, MutationContext, PermissionSet, RetryPolicy, RowEvent,
    RuntimeConfig, RuntimeTable, SchemaRuntime, StepHandler, StepOutcome, StepStatus,
    WorkflowResult,
};
pub use schema::{ParseContext, SchemaDefinition, SchemaParser, parse_schema};
