use chrono::Utc;

use super::super::{EvaluationContext, ExpressionEvaluator, Scope};
use super::comparison::loose_eq;
use crate::core::{Result, SchemaError, Value};
use crate::expression::pattern_matches;
use crate::parser::ast::Expr;

/// Global functions (`len(x)`, `matches(s, re)`) and string/array methods
/// (`s.startsWith(p)`, `tags.includes(t)`).
pub struct FunctionEvaluator;

impl ExpressionEvaluator for FunctionEvaluator {
    fn name(&self) -> &'static str {
        "FUNCTION"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::Function { .. } | Expr::MethodCall { .. })
    }

    fn evaluate(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &EvaluationContext<'_>,
    ) -> Result<Value> {
        match expr {
            Expr::Function { name, args } => {
                let args = evaluate_args(args, scope, context)?;
                call_function(name, &args)
            }
            Expr::MethodCall {
                object,
                method,
                args,
            } => {
                let target = context.evaluate(object, scope)?;
                let args = evaluate_args(args, scope, context)?;
                call_method(&target, method, &args)
            }
            _ => unreachable!(),
        }
    }
}

fn evaluate_args(
    args: &[Expr],
    scope: &Scope,
    context: &EvaluationContext<'_>,
) -> Result<Vec<Value>> {
    args.iter().map(|arg| context.evaluate(arg, scope)).collect()
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(SchemaError::Expression(format!(
            "{}() expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn text_arg<'v>(name: &str, value: &'v Value) -> Result<&'v str> {
    value.as_str().ok_or_else(|| {
        SchemaError::Expression(format!("{}() expects text, got {}", name, value.type_name()))
    })
}

fn number_arg(name: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        SchemaError::Expression(format!("{}() expects a number, got {}", name, value.type_name()))
    })
}

fn length_of(value: &Value) -> Option<i64> {
    match value {
        Value::Text(s) => Some(s.chars().count() as i64),
        Value::Array(items) => Some(items.len() as i64),
        Value::Object(map) => Some(map.len() as i64),
        Value::Null => Some(0),
        _ => None,
    }
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < i64::MAX as f64 {
        Value::Integer(f as i64)
    } else {
        Value::Float(f)
    }
}

fn call_function(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "len" | "length" => {
            arity(name, args, 1)?;
            length_of(&args[0]).map(Value::Integer).ok_or_else(|| {
                SchemaError::Expression(format!("{}() has no length", args[0].type_name()))
            })
        }
        "lower" => {
            arity(name, args, 1)?;
            Ok(Value::Text(text_arg(name, &args[0])?.to_lowercase()))
        }
        "upper" => {
            arity(name, args, 1)?;
            Ok(Value::Text(text_arg(name, &args[0])?.to_uppercase()))
        }
        "trim" => {
            arity(name, args, 1)?;
            Ok(Value::Text(text_arg(name, &args[0])?.trim().to_string()))
        }
        "contains" => {
            arity(name, args, 2)?;
            call_method(&args[0], "includes", &args[1..])
        }
        "matches" => {
            arity(name, args, 2)?;
            let text = text_arg(name, &args[0])?;
            let pattern = text_arg(name, &args[1])?;
            Ok(Value::Boolean(pattern_matches(text, pattern)?))
        }
        "is_empty" | "isEmpty" => {
            arity(name, args, 1)?;
            Ok(Value::Boolean(length_of(&args[0]) == Some(0)))
        }
        "abs" => {
            arity(name, args, 1)?;
            Ok(match &args[0] {
                Value::Integer(i) => Value::Integer(i.saturating_abs()),
                other => Value::Float(number_arg(name, other)?.abs()),
            })
        }
        "round" | "floor" | "ceil" => {
            if args.is_empty() || args.len() > 2 {
                return Err(SchemaError::Expression(format!(
                    "{}() expects 1 or 2 arguments",
                    name
                )));
            }
            let value = number_arg(name, &args[0])?;
            let digits = match args.get(1) {
                Some(d) => number_arg(name, d)? as i32,
                None => 0,
            };
            let scale = 10f64.powi(digits);
            let scaled = value * scale;
            let rounded = match name {
                "round" => scaled.round(),
                "floor" => scaled.floor(),
                _ => scaled.ceil(),
            } / scale;
            Ok(number_value(rounded))
        }
        "min" | "max" => {
            let mut best: Option<&Value> = None;
            for arg in args {
                number_arg(name, arg)?;
                let replace = match best {
                    None => true,
                    Some(current) => {
                        let ordering = arg.compare(current)?;
                        (name == "min" && ordering.is_lt()) || (name == "max" && ordering.is_gt())
                    }
                };
                if replace {
                    best = Some(arg);
                }
            }
            best.cloned().ok_or_else(|| {
                SchemaError::Expression(format!("{}() expects at least one argument", name))
            })
        }
        "number" => {
            arity(name, args, 1)?;
            match &args[0] {
                v if v.is_numeric() => Ok(v.clone()),
                Value::Text(s) => s.trim().parse::<f64>().map(number_value).map_err(|_| {
                    SchemaError::Expression(format!("'{}' is not a number", s))
                }),
                Value::Boolean(b) => Ok(Value::Integer(*b as i64)),
                other => Err(SchemaError::Expression(format!(
                    "Cannot convert {} to a number",
                    other.type_name()
                ))),
            }
        }
        "string" => {
            arity(name, args, 1)?;
            Ok(Value::Text(args[0].to_string()))
        }
        "coalesce" => Ok(args
            .iter()
            .find(|arg| !arg.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
        "now" => {
            arity(name, args, 0)?;
            Ok(Value::Text(Utc::now().to_rfc3339()))
        }
        "today" => {
            arity(name, args, 0)?;
            Ok(Value::Text(Utc::now().date_naive().format("%Y-%m-%d").to_string()))
        }
        _ => Err(SchemaError::Expression(format!("Unknown function '{}'", name))),
    }
}

fn call_method(target: &Value, method: &str, args: &[Value]) -> Result<Value> {
    match (target, method) {
        (Value::Text(s), "includes") => {
            arity(method, args, 1)?;
            Ok(Value::Boolean(s.contains(&args[0].to_string())))
        }
        (Value::Text(s), "startsWith") => {
            arity(method, args, 1)?;
            Ok(Value::Boolean(s.starts_with(text_arg(method, &args[0])?)))
        }
        (Value::Text(s), "endsWith") => {
            arity(method, args, 1)?;
            Ok(Value::Boolean(s.ends_with(text_arg(method, &args[0])?)))
        }
        (Value::Text(s), "indexOf") => {
            arity(method, args, 1)?;
            let needle = text_arg(method, &args[0])?;
            Ok(Value::Integer(
                s.find(needle)
                    .map(|byte| s[..byte].chars().count() as i64)
                    .unwrap_or(-1),
            ))
        }
        (Value::Text(s), "toLowerCase") => {
            arity(method, args, 0)?;
            Ok(Value::Text(s.to_lowercase()))
        }
        (Value::Text(s), "toUpperCase") => {
            arity(method, args, 0)?;
            Ok(Value::Text(s.to_uppercase()))
        }
        (Value::Text(s), "trim") => {
            arity(method, args, 0)?;
            Ok(Value::Text(s.trim().to_string()))
        }
        (Value::Text(s), "split") => {
            arity(method, args, 1)?;
            let separator = text_arg(method, &args[0])?;
            Ok(Value::Array(
                s.split(separator).map(|part| Value::Text(part.to_string())).collect(),
            ))
        }
        (Value::Text(s), "test" | "matches") => {
            arity(method, args, 1)?;
            Ok(Value::Boolean(pattern_matches(s, text_arg(method, &args[0])?)?))
        }
        (Value::Array(items), "includes") => {
            arity(method, args, 1)?;
            Ok(Value::Boolean(items.iter().any(|item| loose_eq(item, &args[0]))))
        }
        (Value::Array(items), "indexOf") => {
            arity(method, args, 1)?;
            Ok(Value::Integer(
                items
                    .iter()
                    .position(|item| loose_eq(item, &args[0]))
                    .map(|i| i as i64)
                    .unwrap_or(-1),
            ))
        }
        (Value::Array(items), "join") => {
            let separator = match args.first() {
                Some(sep) => text_arg(method, sep)?.to_string(),
                None => ",".to_string(),
            };
            Ok(Value::Text(
                items.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(&separator),
            ))
        }
        _ => Err(SchemaError::Expression(format!(
            "{} has no method '{}'",
            target.type_name(),
            method
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Value;
    use crate::evaluator::{Evaluator, Scope};
    use serde_json::json;

    fn eval(source: &str) -> Value {
        let scope = match Value::from(json!({"value": "Hello World", "tags": ["urgent", "bug"]})) {
            Value::Object(map) => map,
            _ => Scope::new(),
        };
        Evaluator::new().try_evaluate(source, &scope).unwrap()
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval("value.startsWith('Hello')"), Value::Boolean(true));
        assert_eq!(eval("value.toLowerCase().includes('world')"), Value::Boolean(true));
        assert_eq!(eval("value.indexOf('World')"), Value::Integer(6));
    }

    #[test]
    fn test_array_methods_and_globals() {
        assert_eq!(eval("tags.includes('bug')"), Value::Boolean(true));
        assert_eq!(eval("tags.join('|')"), Value::Text("urgent|bug".into()));
        assert_eq!(eval("len(tags)"), Value::Integer(2));
        assert_eq!(eval("max(3, 7.5, 1)"), Value::Float(7.5));
        assert_eq!(eval("round(2.346, 2)"), Value::Float(2.35));
        assert_eq!(eval("matches(value, '^Hello')"), Value::Boolean(true));
    }

    #[test]
    fn test_unknown_function_is_error() {
        assert!(Evaluator::new().try_evaluate("explode()", &Scope::new()).is_err());
        assert!(Evaluator::new().try_evaluate("(1).push(2)", &Scope::new()).is_err());
    }
}
