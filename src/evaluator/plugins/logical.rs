use super::super::{EvaluationContext, ExpressionEvaluator, Scope};
use crate::core::{Result, Value};
use crate::parser::ast::{BinaryOp, Expr};

/// Short-circuit `&&` / `||`. Like the host scripting convention these yield
/// the deciding operand, so `row.nickname || row.name` works in formulas.
pub struct LogicalEvaluator;

impl ExpressionEvaluator for LogicalEvaluator {
    fn name(&self) -> &'static str {
        "LOGICAL"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        if let Expr::BinaryOp { op, .. } = expr {
            matches!(op, BinaryOp::And | BinaryOp::Or)
        } else {
            false
        }
    }

    fn evaluate(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &EvaluationContext<'_>,
    ) -> Result<Value> {
        let Expr::BinaryOp { left, op, right } = expr else {
            unreachable!();
        };

        let left_val = context.evaluate(left, scope)?;
        match op {
            BinaryOp::And => {
                if !left_val.as_bool() {
                    return Ok(left_val);
                }
                context.evaluate(right, scope)
            }

            BinaryOp::Or => {
                if left_val.as_bool() {
                    return Ok(left_val);
                }
                context.evaluate(right, scope)
            }

            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Value;
    use crate::evaluator::{Evaluator, Scope};

    #[test]
    fn test_short_circuit_skips_undefined_names() {
        let evaluator = Evaluator::new();
        // `missing` would fail, but is never evaluated.
        assert_eq!(
            evaluator.try_evaluate("false && missing", &Scope::new()).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            evaluator.try_evaluate("'x' || missing", &Scope::new()).unwrap(),
            Value::Text("x".into())
        );
    }
}
