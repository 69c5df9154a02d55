use super::super::{EvaluationContext, ExpressionEvaluator, Scope};
use super::comparison::loose_eq;
use crate::core::{Result, SchemaError, Value};
use crate::parser::ast::Expr;

/// `needle in haystack`: array membership, substring, or object key.
pub struct InListEvaluator;

impl ExpressionEvaluator for InListEvaluator {
    fn name(&self) -> &'static str {
        "IN_LIST"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::InList { .. })
    }

    fn evaluate(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &EvaluationContext<'_>,
    ) -> Result<Value> {
        let Expr::InList { expr, list } = expr else {
            unreachable!();
        };

        let needle = context.evaluate(expr, scope)?;
        let haystack = context.evaluate(list, scope)?;

        let found = match &haystack {
            Value::Array(items) => items.iter().any(|item| loose_eq(item, &needle)),
            Value::Text(text) => text.contains(&needle.to_string()),
            Value::Object(map) => map.contains_key(&needle.to_string()),
            Value::Null => false,
            other => {
                return Err(SchemaError::Expression(format!(
                    "Cannot test membership in {}",
                    other.type_name()
                )));
            }
        };

        Ok(Value::Boolean(found))
    }
}
