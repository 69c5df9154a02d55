pub mod plugins;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use lru::LruCache;

use crate::core::{Result, SchemaError, Value};
use crate::parser::ExpressionParser;
use crate::parser::ast::Expr;

/// Names visible to an expression, e.g. `{value, row}`.
pub type Scope = BTreeMap<String, Value>;

pub const DEFAULT_MAX_STEPS: usize = 10_000;
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Trait for evaluating one family of expression nodes
pub trait ExpressionEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_evaluate(&self, expr: &Expr) -> bool;

    fn evaluate(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &EvaluationContext<'_>,
    ) -> Result<Value>;
}

/// Per-evaluation state: evaluator registry plus the remaining step budget
pub struct EvaluationContext<'a> {
    registry: &'a EvaluatorRegistry,
    steps: Cell<usize>,
    max_steps: usize,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(registry: &'a EvaluatorRegistry, max_steps: usize) -> Self {
        Self {
            registry,
            steps: Cell::new(0),
            max_steps,
        }
    }

    pub fn evaluate(&self, expr: &Expr, scope: &Scope) -> Result<Value> {
        let steps = self.steps.get() + 1;
        if steps > self.max_steps {
            return Err(SchemaError::EvaluationTimeout(format!(
                "exceeded {} evaluation steps",
                self.max_steps
            )));
        }
        self.steps.set(steps);

        match expr {
            Expr::Literal(val) => return Ok(val.clone()),
            Expr::Identifier(name) => {
                return scope.get(name).cloned().ok_or_else(|| {
                    SchemaError::Expression(format!("'{}' is not defined", name))
                });
            }
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.evaluate(item, scope))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Value::Array(values));
            }
            _ => {}
        }

        if let Some(evaluator) = self.registry.find_evaluator(expr) {
            return evaluator.evaluate(expr, scope, self);
        }

        Err(SchemaError::Expression(format!(
            "No evaluator found for expression: {:?}",
            expr
        )))
    }

    pub fn steps_taken(&self) -> usize {
        self.steps.get()
    }
}

/// Registry of node evaluators
pub struct EvaluatorRegistry {
    evaluators: Vec<Box<dyn ExpressionEvaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self {
            evaluators: Vec::new(),
        }
    }

    pub fn register(&mut self, evaluator: Box<dyn ExpressionEvaluator>) {
        debug!("Registered evaluator: {}", evaluator.name());
        self.evaluators.push(evaluator);
    }

    pub fn with_default_evaluators() -> Self {
        use plugins::*;

        let mut registry = Self::new();

        registry.register(Box::new(logical::LogicalEvaluator));
        registry.register(Box::new(comparison::ComparisonEvaluator));
        registry.register(Box::new(arithmetic::ArithmeticEvaluator));
        registry.register(Box::new(unary::UnaryEvaluator));
        registry.register(Box::new(member::MemberEvaluator));
        registry.register(Box::new(function::FunctionEvaluator));
        registry.register(Box::new(in_list::InListEvaluator));
        registry.register(Box::new(conditional::ConditionalEvaluator));

        registry
    }

    fn find_evaluator(&self, expr: &Expr) -> Option<&dyn ExpressionEvaluator> {
        self.evaluators
            .iter()
            .find(|ev| ev.can_evaluate(expr))
            .map(|boxed| &**boxed)
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::with_default_evaluators()
    }
}

/// Parses, caches and evaluates expression source text against a scope.
///
/// Conditions fail closed: any parse or evaluation error is logged and
/// reported as `false`, never propagated to the caller.
pub struct Evaluator {
    registry: EvaluatorRegistry,
    parser: ExpressionParser,
    cache: Mutex<LruCache<String, Arc<Expr>>>,
    max_steps: usize,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_STEPS, DEFAULT_CACHE_SIZE)
    }

    pub fn with_limits(max_steps: usize, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            registry: EvaluatorRegistry::with_default_evaluators(),
            parser: ExpressionParser::new(),
            cache: Mutex::new(LruCache::new(capacity)),
            max_steps: max_steps.max(1),
        }
    }

    pub fn compile(&self, source: &str) -> Result<Arc<Expr>> {
        {
            let mut cache = self.cache.lock()?;
            if let Some(expr) = cache.get(source) {
                return Ok(Arc::clone(expr));
            }
        }

        let expr = Arc::new(self.parser.parse(source)?);
        self.cache.lock()?.put(source.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    /// Evaluate and propagate errors. Used where the caller decides the fallback.
    pub fn try_evaluate(&self, source: &str, scope: &Scope) -> Result<Value> {
        let expr = self.compile(source)?;
        let context = EvaluationContext::new(&self.registry, self.max_steps);
        context.evaluate(&expr, scope)
    }

    /// Fail-closed evaluation: errors become `false`.
    pub fn evaluate(&self, source: &str, scope: &Scope) -> Value {
        match self.try_evaluate(source, scope) {
            Ok(value) => value,
            Err(err) => {
                warn!("expression '{}' failed, treating as false: {}", source, err);
                Value::Boolean(false)
            }
        }
    }

    pub fn evaluate_condition(&self, source: &str, scope: &Scope) -> bool {
        self.evaluate(source, scope).as_bool()
    }

    /// Evaluation for computed values (formulas): errors become `null`.
    pub fn evaluate_value(&self, source: &str, scope: &Scope) -> Value {
        match self.try_evaluate(source, scope) {
            Ok(value) => value,
            Err(err) => {
                warn!("formula '{}' failed, storing null: {}", source, err);
                Value::Null
            }
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(value: serde_json::Value) -> Scope {
        match Value::from(value) {
            Value::Object(map) => map,
            _ => panic!("scope must be an object"),
        }
    }

    #[test]
    fn test_row_context_bindings() {
        let evaluator = Evaluator::new();
        let ctx = scope(json!({"value": 12, "row": {"field": 11, "name": "Ada"}}));

        assert!(evaluator.evaluate_condition("row.field > 10", &ctx));
        assert!(evaluator.evaluate_condition("value >= row.field && row.name.length == 3", &ctx));
        assert!(!evaluator.evaluate_condition("value < 10", &ctx));
    }

    #[test]
    fn test_fail_closed_on_errors() {
        let evaluator = Evaluator::new();
        let ctx = scope(json!({"value": 1}));

        assert_eq!(evaluator.evaluate("(value > 0", &ctx), Value::Boolean(false));
        assert_eq!(evaluator.evaluate("valeu > 0", &ctx), Value::Boolean(false));
        assert_eq!(evaluator.evaluate("value / 0", &ctx), Value::Boolean(false));
        assert!(evaluator.try_evaluate("valeu > 0", &ctx).is_err());
    }

    #[test]
    fn test_step_budget_reports_timeout() {
        let evaluator = Evaluator::with_limits(5, 8);
        let ctx = scope(json!({"a": 1}));

        let err = evaluator.try_evaluate("a + a + a + a + a + a", &ctx).unwrap_err();
        assert!(matches!(err, SchemaError::EvaluationTimeout(_)));
        assert!(!evaluator.evaluate_condition("a + a + a + a + a + a", &ctx));
    }

    #[test]
    fn test_compiled_expressions_are_cached() {
        let evaluator = Evaluator::new();
        let first = evaluator.compile("1 + 2").unwrap();
        let second = evaluator.compile("1 + 2").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_formula_failure_is_null() {
        let evaluator = Evaluator::new();
        assert_eq!(evaluator.evaluate_value("missing * 2", &Scope::new()), Value::Null);
    }
}
