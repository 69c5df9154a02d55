use std::cmp::Ordering;

use super::super::{EvaluationContext, ExpressionEvaluator, Scope};
use crate::core::{Result, SchemaError, Value};
use crate::parser::ast::{BinaryOp, Expr};

pub struct ComparisonEvaluator;

impl ExpressionEvaluator for ComparisonEvaluator {
    fn name(&self) -> &'static str {
        "COMPARISON"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        if let Expr::BinaryOp { op, .. } = expr {
            matches!(
                op,
                BinaryOp::Eq
                    | BinaryOp::NotEq
                    | BinaryOp::StrictEq
                    | BinaryOp::StrictNotEq
                    | BinaryOp::Lt
                    | BinaryOp::LtEq
                    | BinaryOp::Gt
                    | BinaryOp::GtEq
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

        let result = self.compare(&left_val, &right_val, op)?;
        Ok(Value::Boolean(result))
    }
}

impl ComparisonEvaluator {
    pub fn compare(&self, left: &Value, right: &Value, op: &BinaryOp) -> Result<bool> {
        match op {
            BinaryOp::Eq => Ok(loose_eq(left, right)),
            BinaryOp::NotEq => Ok(!loose_eq(left, right)),
            BinaryOp::StrictEq => Ok(strict_eq(left, right)),
            BinaryOp::StrictNotEq => Ok(!strict_eq(left, right)),
            _ => {
                // Ordering against null is never satisfied.
                if left.is_null() || right.is_null() {
                    return Ok(false);
                }
                let ordering = match (left, right) {
                    (Value::Text(a), b) if b.is_numeric() => numeric_text(a, left, right)?
                        .compare(b)?,
                    (a, Value::Text(b)) if a.is_numeric() => {
                        a.compare(&numeric_text(b, left, right)?)?
                    }
                    _ => left.compare(right)?,
                };
                Ok(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::LtEq => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    BinaryOp::GtEq => ordering != Ordering::Less,
                    _ => unreachable!(),
                })
            }
        }
    }
}

fn numeric_text(text: &str, left: &Value, right: &Value) -> Result<Value> {
    text.trim().parse::<f64>().map(Value::Float).map_err(|_| {
        SchemaError::Expression(format!(
            "Cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))
    })
}

/// `==`: numbers compare numerically, numeric text coerces against numbers,
/// booleans coerce against numbers.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Text(t), n) | (n, Value::Text(t)) if n.is_numeric() => t
            .trim()
            .parse::<f64>()
            .is_ok_and(|parsed| Value::Float(parsed) == *n),
        (Value::Boolean(b), n) | (n, Value::Boolean(b)) if n.is_numeric() => {
            Value::Integer(*b as i64) == *n
        }
        _ => left == right,
    }
}

/// `===`: no coercion across types (integers and floats are both numbers).
pub fn strict_eq(left: &Value, right: &Value) -> bool {
    let same_kind =
        left.type_name() == right.type_name() || (left.is_numeric() && right.is_numeric());
    same_kind && left == right
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loose_and_strict_equality() {
        assert!(loose_eq(&Value::Text("5".into()), &Value::Integer(5)));
        assert!(!strict_eq(&Value::Text("5".into()), &Value::Integer(5)));
        assert!(strict_eq(&Value::Integer(5), &Value::Float(5.0)));
        assert!(loose_eq(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_ordering_rules() {
        let cmp = ComparisonEvaluator;
        assert!(cmp.compare(&Value::Integer(3), &Value::Float(2.5), &BinaryOp::Gt).unwrap());
        assert!(cmp.compare(&Value::Text("2024-01-02".into()), &Value::Text("2024-01-10".into()), &BinaryOp::Lt).unwrap());
        assert!(!cmp.compare(&Value::Null, &Value::Integer(1), &BinaryOp::Lt).unwrap());
        assert!(cmp.compare(&Value::Boolean(true), &Value::Integer(1), &BinaryOp::Lt).is_err());
    }
}
