use std::collections::BTreeMap;

use log::debug;
use serde_json::Value as JsonValue;

use super::context::{EnvSource, ParseContext};
use super::expander;
use super::types::SchemaDefinition;
use super::validator;
use crate::core::{Result, SchemaError};

/// Turns schema source text (YAML or JSON) into a validated, canonical
/// [`SchemaDefinition`].
///
/// Pipeline: deserialize -> resolve env -> substitute -> expand -> validate.
/// Any failure is returned as a single [`SchemaError::Parse`].
#[derive(Debug, Clone, Default)]
pub struct SchemaParser {
    env: EnvSource,
}

impl SchemaParser {
    /// Parser that reads declared variables from the process environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that resolves variables from `vars` only.
    pub fn with_env(vars: BTreeMap<String, String>) -> Self {
        Self {
            env: EnvSource::Map(vars),
        }
    }

    pub fn parse(&self, source: &str) -> Result<SchemaDefinition> {
        self.parse_inner(source).map_err(SchemaError::parse)
    }

    fn parse_inner(&self, source: &str) -> Result<SchemaDefinition> {
        let canonical = self.expand_inner(source)?;
        let schema: SchemaDefinition = serde_json::from_value(canonical)?;
        validator::validate(&schema)?;
        Ok(schema)
    }

    /// The canonical document, before validation.
    pub fn expand_document(&self, source: &str) -> Result<JsonValue> {
        self.expand_inner(source).map_err(SchemaError::parse)
    }

    fn expand_inner(&self, source: &str) -> Result<JsonValue> {
        let document = deserialize(source)?;
        let context = ParseContext::resolve(&document, &self.env)?;
        debug!("resolved {} schema variables", context.variables().len());

        let document = expander::substitute(document, &context);
        Ok(expander::expand(document))
    }

    /// Canonical YAML for a schema; parsing the output yields an equal schema.
    pub fn serialize(&self, schema: &SchemaDefinition) -> Result<String> {
        Ok(serde_yaml::to_string(schema)?)
    }
}

fn deserialize(source: &str) -> Result<JsonValue> {
    if source.trim().is_empty() {
        return Err(SchemaError::InvalidDocument("empty schema source".to_string()));
    }
    // YAML is a superset of JSON, so one deserializer covers both.
    let document: JsonValue = serde_yaml::from_str(source)?;
    if !document.is_object() {
        return Err(SchemaError::InvalidDocument(
            "schema root must be a mapping".to_string(),
        ));
    }
    Ok(document)
}

/// Parse with process environment lookup.
pub fn parse_schema(source: &str) -> Result<SchemaDefinition> {
    SchemaParser::new().parse(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wraps_every_failure() {
        let parser = SchemaParser::with_env(BTreeMap::new());

        let err = parser.parse("name: app\nversion: 1\ntables: {}\n").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
        assert!(matches!(err.root_cause(), SchemaError::SchemaStructure(_)));

        let err = parser.parse("- just\n- a list\n").unwrap_err();
        assert!(matches!(err.root_cause(), SchemaError::InvalidDocument(_)));

        let err = parser.parse("name: [unclosed\n").unwrap_err();
        assert!(matches!(err.root_cause(), SchemaError::InvalidDocument(_)));
    }

    #[test]
    fn test_env_substitution_before_expansion() {
        let source = r#"
name: app
version: "1.0"
env:
  TABLE_NOTE:
    type: string
    required: true
tables:
  notes:
    description: "${TABLE_NOTE}"
    columns:
      - body:text
"#;
        let parser =
            SchemaParser::with_env(BTreeMap::from([("TABLE_NOTE".to_string(), "scratch".to_string())]));
        let schema = parser.parse(source).unwrap();
        assert_eq!(schema.tables["notes"].description.as_deref(), Some("scratch"));

        let err = SchemaParser::with_env(BTreeMap::new()).parse(source).unwrap_err();
        assert_eq!(
            err.root_cause(),
            &SchemaError::MissingEnvironmentVariable("TABLE_NOTE".into())
        );
    }

    #[test]
    fn test_json_source_is_accepted() {
        let parser = SchemaParser::with_env(BTreeMap::new());
        let schema = parser
            .parse(r#"{"name": "app", "version": 2, "tables": {"t": {"columns": ["a"]}}}"#)
            .unwrap();
        assert_eq!(schema.version, "2");
        assert_eq!(schema.tables["t"].columns[0].id, "a");
    }
}
