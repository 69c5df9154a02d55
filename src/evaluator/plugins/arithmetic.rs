use super::super::{EvaluationContext, ExpressionEvaluator, Scope};
use crate::core::{Result, SchemaError, Value};
use crate::parser::ast::{BinaryOp, Expr};

pub struct ArithmeticEvaluator;

impl ExpressionEvaluator for ArithmeticEvaluator {
    fn name(&self) -> &'static str {
        "ARITHMETIC"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        if let Expr::BinaryOp { op, .. } = expr {
            matches!(
                op,
                BinaryOp::Add
                    | BinaryOp::Subtract
                    | BinaryOp::Multiply
                    | BinaryOp::Divide
                    | BinaryOp::Modulo
            )
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
        let right_val = context.evaluate(right, scope)?;

        match (&left_val, &right_val) {
            // String concatenation
            (Value::Text(a), b) if *op == BinaryOp::Add => Ok(Value::Text(format!("{}{}", a, b))),
            (a, Value::Text(b)) if *op == BinaryOp::Add => Ok(Value::Text(format!("{}{}", a, b))),

            (Value::Integer(a), Value::Integer(b)) => integer_op(*a, *b, op),

            (a, b) if a.is_numeric() && b.is_numeric() => {
                let a = a.as_f64().unwrap_or(f64::NAN);
                let b = b.as_f64().unwrap_or(f64::NAN);
                float_op(a, b, op)
            }

            _ => Err(SchemaError::Expression(format!(
                "Cannot apply '{}' to {} and {}",
                op.symbol(),
                left_val.type_name(),
                right_val.type_name()
            ))),
        }
    }
}

fn integer_op(a: i64, b: i64, op: &BinaryOp) -> Result<Value> {
    let checked = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Subtract => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide => {
            if b == 0 {
                return Err(SchemaError::Expression("Division by zero".into()));
            }
            match a.checked_rem(b) {
                Some(0) => a.checked_div(b),
                Some(_) => return Ok(Value::Float(a as f64 / b as f64)),
                None => None,
            }
        }
        BinaryOp::Modulo => {
            if b == 0 {
                return Err(SchemaError::Expression("Modulo by zero".into()));
            }
            a.checked_rem(b)
        }
        _ => unreachable!(),
    };

    match checked {
        Some(result) => Ok(Value::Integer(result)),
        None => float_op(a as f64, b as f64, op),
    }
}

fn float_op(a: f64, b: f64, op: &BinaryOp) -> Result<Value> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => {
            if b == 0.0 {
                return Err(SchemaError::Expression("Division by zero".into()));
            }
            a / b
        }
        BinaryOp::Modulo => {
            if b == 0.0 {
                return Err(SchemaError::Expression("Modulo by zero".into()));
            }
            a % b
        }
        _ => unreachable!(),
    };
    Ok(Value::Float(result))
}
