use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::warn;

use crate::core::{Record, Result, SchemaError, Value};
use crate::evaluator::{Evaluator, Scope};
use crate::expression::pattern_matches;
use crate::schema::{ColumnSchema, ColumnType, Severity, TableSchema, ValidationScope};

/// Validates incoming data for one table.
///
/// Order per column: required, type, status transition, custom expression.
/// Row rules run once every column has passed.
pub struct RecordValidator<'a> {
    table: &'a str,
    schema: &'a TableSchema,
    evaluator: &'a Evaluator,
}

impl<'a> RecordValidator<'a> {
    pub fn new(table: &'a str, schema: &'a TableSchema, evaluator: &'a Evaluator) -> Self {
        Self {
            table,
            schema,
            evaluator,
        }
    }

    pub fn validate(&self, data: &Record, existing: Option<&Record>) -> Result<()> {
        let mut row = existing.cloned().unwrap_or_default();
        row.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));

        for column in &self.schema.columns {
            // computed columns are never caller-supplied
            if column.formula.is_some() {
                continue;
            }
            let value = data.get(&column.id);

            if column.required {
                let missing = match existing {
                    None => value.is_none_or(Value::is_null),
                    Some(_) => value.is_some_and(Value::is_null),
                };
                if missing {
                    return Err(SchemaError::RequiredField {
                        column: column.id.clone(),
                    });
                }
            }

            // type and custom rules only see present values
            let Some(value) = value.filter(|v| !v.is_null()) else {
                continue;
            };

            self.check_type(column, value)?;

            if let Some(existing) = existing {
                self.check_transition(column, existing, value, &row)?;
            }

            if let Some(custom) = column.validation.as_ref().and_then(|v| v.custom.as_deref()) {
                let scope = Scope::from([
                    ("value".to_string(), value.clone()),
                    ("row".to_string(), Value::Object(row.clone())),
                ]);
                if !self.evaluator.evaluate_condition(custom, &scope) {
                    let message = column
                        .validation
                        .as_ref()
                        .and_then(|v| v.message.clone())
                        .unwrap_or_else(|| {
                            format!("Validation failed for {}", column.display_name())
                        });
                    return Err(SchemaError::CustomValidation {
                        column: column.id.clone(),
                        message,
                    });
                }
            }
        }

        self.check_row_rules(&row)
    }

    fn check_type(&self, column: &ColumnSchema, value: &Value) -> Result<()> {
        let type_error = |expected: &str| SchemaError::TypeValidation {
            column: column.id.clone(),
            expected: expected.to_string(),
            actual: value.type_name().to_string(),
        };

        match column.column_type {
            ColumnType::Text => {
                let Value::Text(text) = value else {
                    return Err(type_error("text"));
                };
                self.check_range(column, text.chars().count() as f64, " characters")?;
                if let Some(pattern) =
                    column.validation.as_ref().and_then(|v| v.pattern.as_deref())
                {
                    let matched = pattern_matches(text, pattern).unwrap_or_else(|err| {
                        warn!("{}.{}: {}", self.table, column.id, err);
                        false
                    });
                    if !matched {
                        return Err(SchemaError::PatternValidation {
                            column: column.id.clone(),
                            pattern: pattern.to_string(),
                        });
                    }
                }
            }
            ColumnType::Number => {
                let number = value.as_f64().ok_or_else(|| type_error("number"))?;
                if number.is_nan() {
                    return Err(type_error("number"));
                }
                self.check_range(column, number, "")?;
            }
            ColumnType::Checkbox => {
                if !matches!(value, Value::Boolean(_)) {
                    return Err(type_error("boolean"));
                }
            }
            ColumnType::Date => {
                let valid = value.as_str().is_some_and(is_date);
                if !valid {
                    return Err(type_error("date (YYYY-MM-DD)"));
                }
            }
            ColumnType::DateTime => {
                let valid = value.as_str().is_some_and(is_datetime);
                if !valid {
                    return Err(type_error("datetime (RFC 3339)"));
                }
            }
            ColumnType::Select => {
                let choice = value.as_str().ok_or_else(|| type_error("text"))?;
                self.check_option(column, choice, &column.option_values())?;
            }
            ColumnType::MultiSelect => {
                let choices = value.as_array().ok_or_else(|| type_error("array"))?;
                let allowed = column.option_values();
                for choice in choices {
                    let choice = choice.as_str().ok_or_else(|| type_error("array of text"))?;
                    self.check_option(column, choice, &allowed)?;
                }
            }
            ColumnType::Relation => {
                let many = column
                    .relation
                    .as_ref()
                    .is_some_and(|r| r.cardinality.allows_many());
                let is_reference = |v: &Value| matches!(v, Value::Text(_) | Value::Integer(_));
                let valid = match value {
                    Value::Array(items) if many => items.iter().all(is_reference),
                    other => is_reference(other),
                };
                if !valid {
                    let expected = if many { "record id or list of ids" } else { "record id" };
                    return Err(type_error(expected));
                }
            }
            ColumnType::User => {
                if !matches!(value, Value::Text(_)) {
                    return Err(type_error("user id"));
                }
            }
            ColumnType::Attachment => {
                if !matches!(value, Value::Text(_) | Value::Object(_) | Value::Array(_)) {
                    return Err(type_error("attachment"));
                }
            }
            ColumnType::Status => {
                let state = value.as_str().ok_or_else(|| type_error("text"))?;
                let allowed: Vec<&str> = match &column.workflow {
                    Some(workflow) if !workflow.states.is_empty() => {
                        workflow.states.iter().map(|s| s.value()).collect()
                    }
                    _ => column.option_values(),
                };
                if !allowed.is_empty() {
                    self.check_option(column, state, &allowed)?;
                }
            }
            ColumnType::Formula | ColumnType::Unknown(_) => {}
        }
        Ok(())
    }

    fn check_range(&self, column: &ColumnSchema, measured: f64, unit: &str) -> Result<()> {
        let Some(validation) = &column.validation else {
            return Ok(());
        };
        if let Some(min) = validation.min
            && measured < min
        {
            return Err(SchemaError::RangeValidation {
                column: column.id.clone(),
                message: format!("must be at least {}{}", min, unit),
            });
        }
        if let Some(max) = validation.max
            && measured > max
        {
            return Err(SchemaError::RangeValidation {
                column: column.id.clone(),
                message: format!("must be at most {}{}", max, unit),
            });
        }
        Ok(())
    }

    fn check_option(&self, column: &ColumnSchema, choice: &str, allowed: &[&str]) -> Result<()> {
        if allowed.contains(&choice) {
            Ok(())
        } else {
            Err(SchemaError::InvalidOption {
                column: column.id.clone(),
                value: choice.to_string(),
            })
        }
    }

    fn check_transition(
        &self,
        column: &ColumnSchema,
        existing: &Record,
        value: &Value,
        row: &Record,
    ) -> Result<()> {
        let Some(workflow) = &column.workflow else {
            return Ok(());
        };
        if workflow.transitions.is_empty() {
            return Ok(());
        }
        // a status that was never set may take any declared state
        let (Some(from), Some(to)) = (
            existing.get(&column.id).and_then(Value::as_str),
            value.as_str(),
        ) else {
            return Ok(());
        };
        if from == to {
            return Ok(());
        }

        let scope = Scope::from([
            ("value".to_string(), value.clone()),
            ("row".to_string(), Value::Object(row.clone())),
            ("old".to_string(), Value::Object(existing.clone())),
        ]);
        let allowed = workflow.transitions.iter().any(|transition| {
            transition.to == to
                && transition.from.admits(from)
                && transition
                    .condition
                    .as_deref()
                    .is_none_or(|condition| self.evaluator.evaluate_condition(condition, &scope))
        });

        if allowed {
            Ok(())
        } else {
            Err(SchemaError::InvalidTransition {
                column: column.id.clone(),
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn check_row_rules(&self, row: &Record) -> Result<()> {
        let mut scope: Scope = row.clone();
        scope.insert("row".to_string(), Value::Object(row.clone()));

        for rule in &self.schema.validations {
            if rule.scope != ValidationScope::Row {
                continue;
            }
            if self.evaluator.evaluate_condition(&rule.condition, &scope) {
                continue;
            }

            let name = if rule.name.is_empty() {
                rule.condition.clone()
            } else {
                rule.name.clone()
            };
            let message = rule
                .message
                .clone()
                .unwrap_or_else(|| format!("Row validation '{}' failed", name));

            match rule.severity {
                Severity::Error => {
                    return Err(SchemaError::RowValidation {
                        rule: name,
                        message,
                    });
                }
                Severity::Warning | Severity::Info => {
                    warn!("{}: row rule '{}' not satisfied: {}", self.table, name, message);
                }
            }
        }
        Ok(())
    }
}

fn is_date(text: &str) -> bool {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || DateTime::parse_from_rfc3339(text).is_ok()
}

fn is_datetime(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}
