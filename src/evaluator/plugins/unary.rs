use super::super::{EvaluationContext, ExpressionEvaluator, Scope};
use crate::core::{Result, SchemaError, Value};
use crate::parser::ast::{Expr, UnaryOp};

pub struct UnaryEvaluator;

impl ExpressionEvaluator for UnaryEvaluator {
    fn name(&self) -> &'static str {
        "UNARY"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::UnaryOp { .. })
    }

    fn evaluate(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &EvaluationContext<'_>,
    ) -> Result<Value> {
        let Expr::UnaryOp { op, expr } = expr else {
            unreachable!();
        };

        let value = context.evaluate(expr, scope)?;
        match op {
            UnaryOp::Not => Ok(Value::Boolean(!value.as_bool())),
            UnaryOp::Minus => match value {
                Value::Integer(i) => Ok(i
                    .checked_neg()
                    .map(Value::Integer)
                    .unwrap_or(Value::Float(-(i as f64)))),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(SchemaError::Expression(format!(
                    "Cannot negate {}",
                    other.type_name()
                ))),
            },
        }
    }
}
