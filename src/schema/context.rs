use std::collections::BTreeMap;

use log::debug;
use serde_json::Value as JsonValue;

use crate::core::{Result, SchemaError};

/// Where `env` declarations are looked up.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// Process environment, read only for names the document declares.
    #[default]
    Process,
    Map(BTreeMap<String, String>),
}

impl EnvSource {
    fn lookup(&self, name: &str) -> Option<String> {
        match self {
            EnvSource::Process => std::env::var(name).ok(),
            EnvSource::Map(vars) => vars.get(name).cloned(),
        }
    }
}

/// Variables resolved for a single parse call.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    variables: BTreeMap<String, JsonValue>,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: BTreeMap<String, JsonValue>) -> Self {
        Self { variables }
    }

    /// Resolve every variable declared under the document's `env` key.
    ///
    /// Precedence: supplied value, then declared `default`. A `required`
    /// variable with neither fails; an optional one stays unresolved so its
    /// tokens are left verbatim.
    pub fn resolve(document: &JsonValue, source: &EnvSource) -> Result<Self> {
        let mut context = Self::new();
        let Some(declarations) = document.get("env").and_then(JsonValue::as_object) else {
            return Ok(context);
        };

        for (name, declaration) in declarations {
            let var_type = declaration
                .get("type")
                .and_then(JsonValue::as_str)
                .unwrap_or("string");
            let required = declaration
                .get("required")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false);

            let value = match source.lookup(name) {
                Some(raw) => Some(coerce(&raw, var_type)),
                None => declaration.get("default").filter(|d| !d.is_null()).cloned(),
            };

            match value {
                Some(value) => {
                    debug!("resolved environment variable {}", name);
                    context.variables.insert(name.clone(), value);
                }
                None if required => {
                    return Err(SchemaError::MissingEnvironmentVariable(name.clone()));
                }
                None => debug!("environment variable {} left unresolved", name),
            }
        }

        Ok(context)
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.variables.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: JsonValue) {
        self.variables.insert(name.into(), value);
    }

    pub fn variables(&self) -> &BTreeMap<String, JsonValue> {
        &self.variables
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Typed conversion of a raw environment string; falls back to text.
fn coerce(raw: &str, var_type: &str) -> JsonValue {
    match var_type {
        "number" => {
            if let Ok(i) = raw.trim().parse::<i64>() {
                JsonValue::from(i)
            } else if let Ok(f) = raw.trim().parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .unwrap_or_else(|| JsonValue::String(raw.to_string()))
            } else {
                JsonValue::String(raw.to_string())
            }
        }
        "boolean" => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => JsonValue::Bool(true),
            "false" | "0" | "no" => JsonValue::Bool(false),
            _ => JsonValue::String(raw.to_string()),
        },
        _ => JsonValue::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(pairs: &[(&str, &str)]) -> EnvSource {
        EnvSource::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_supplied_value_wins_over_default() {
        let doc = json!({"env": {"LIMIT": {"type": "number", "default": 10}}});
        let ctx = ParseContext::resolve(&doc, &source(&[("LIMIT", "25")])).unwrap();
        assert_eq!(ctx.get("LIMIT"), Some(&json!(25)));

        let ctx = ParseContext::resolve(&doc, &source(&[])).unwrap();
        assert_eq!(ctx.get("LIMIT"), Some(&json!(10)));
    }

    #[test]
    fn test_missing_required_variable() {
        let doc = json!({"env": {"API_KEY": {"type": "string", "required": true}}});
        let err = ParseContext::resolve(&doc, &source(&[])).unwrap_err();
        assert_eq!(err, SchemaError::MissingEnvironmentVariable("API_KEY".into()));
    }

    #[test]
    fn test_optional_variable_stays_unresolved() {
        let doc = json!({"env": {"REGION": {"type": "string"}}});
        let ctx = ParseContext::resolve(&doc, &source(&[])).unwrap();
        assert!(ctx.get("REGION").is_none());
    }

    #[test]
    fn test_boolean_coercion() {
        let doc = json!({"env": {"STRICT": {"type": "boolean"}}});
        let ctx = ParseContext::resolve(&doc, &source(&[("STRICT", "true")])).unwrap();
        assert_eq!(ctx.get("STRICT"), Some(&json!(true)));
    }
}
