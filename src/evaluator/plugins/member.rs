use super::super::{EvaluationContext, ExpressionEvaluator, Scope};
use crate::core::{Result, SchemaError, Value};
use crate::parser::ast::Expr;

/// Property access (`row.field`, `value.length`) and indexing (`tags[0]`, `row["x"]`).
pub struct MemberEvaluator;

impl ExpressionEvaluator for MemberEvaluator {
    fn name(&self) -> &'static str {
        "MEMBER"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::Member { .. } | Expr::Index { .. })
    }

    fn evaluate(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &EvaluationContext<'_>,
    ) -> Result<Value> {
        match expr {
            Expr::Member { object, property } => {
                let target = context.evaluate(object, scope)?;
                property_of(&target, property)
            }
            Expr::Index { object, index } => {
                let target = context.evaluate(object, scope)?;
                let key = context.evaluate(index, scope)?;
                match (&target, &key) {
                    (Value::Array(items), k) if k.is_numeric() => {
                        Ok(position(k).and_then(|i| items.get(i)).cloned().unwrap_or(Value::Null))
                    }
                    (Value::Text(s), k) if k.is_numeric() => Ok(position(k)
                        .and_then(|i| s.chars().nth(i))
                        .map(|c| Value::Text(c.to_string()))
                        .unwrap_or(Value::Null)),
                    (_, Value::Text(name)) => property_of(&target, name),
                    _ => property_of(&target, &key.to_string()),
                }
            }
            _ => unreachable!(),
        }
    }
}

fn position(key: &Value) -> Option<usize> {
    key.as_i64().and_then(|i| usize::try_from(i).ok())
}

/// Missing properties read as null; reading through null is an error.
fn property_of(target: &Value, property: &str) -> Result<Value> {
    match target {
        Value::Null => Err(SchemaError::Expression(format!(
            "Cannot read property '{}' of null",
            property
        ))),
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if property == "length" => Ok(Value::Integer(items.len() as i64)),
        Value::Text(s) if property == "length" => Ok(Value::Integer(s.chars().count() as i64)),
        _ => Ok(Value::Null),
    }
}
