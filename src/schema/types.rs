//! Canonical schema document types.
//!
//! These mirror the YAML/JSON document after shorthand expansion. Fields that
//! are optional in the document are `Option`/empty collections here and are
//! skipped on serialization, so `parse(serialize(schema)) == schema`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::Value;

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_true(value: &bool) -> bool {
    *value
}

fn default_true() -> bool {
    true
}

/// Treats an empty YAML key (`tables:`) as the empty value.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Like [`null_as_default`], also for tables declared with no body.
fn tables_or_empty<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, TableSchema>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Option<TableSchema>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, table)| (name, table.unwrap_or_default()))
        .collect())
}

/// Accepts `version: 1.0` as well as `version: "1.0"`.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, EnvVarSchema>,
    #[serde(default, deserialize_with = "tables_or_empty")]
    pub tables: BTreeMap<String, TableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionsSchema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workflows: BTreeMap<String, WorkflowSchema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dashboards: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub integrations: BTreeMap<String, Value>,
}

impl SchemaDefinition {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn workflow(&self, name: &str) -> Option<&WorkflowSchema> {
        self.workflows.get(name)
    }

    pub fn roles(&self) -> impl Iterator<Item = (&String, &RoleSchema)> {
        self.permissions.iter().flat_map(|p| p.roles.iter())
    }
}

// ============================================================================
// Environment
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvVarType {
    #[default]
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVarSchema {
    #[serde(rename = "type", default)]
    pub var_type: EnvVarType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub columns: Vec<ColumnSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<RowValidationSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub automations: Vec<AutomationSchema>,
    /// role -> allowed actions on this table
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn column(&self, id: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn has_column(&self, id: &str) -> bool {
        self.column(id).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
}

impl IndexSchema {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("idx_{}", self.columns.join("_")))
    }
}

// ============================================================================
// Columns
// ============================================================================

/// The fixed column type set. `Unknown` only exists so the validator can
/// report what the document actually said.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    Text,
    Number,
    Select,
    MultiSelect,
    Date,
    DateTime,
    Checkbox,
    Relation,
    Formula,
    Attachment,
    User,
    Status,
    Unknown(String),
}

impl ColumnType {
    pub const KNOWN: [&'static str; 12] = [
        "text",
        "number",
        "select",
        "multi_select",
        "date",
        "datetime",
        "checkbox",
        "relation",
        "formula",
        "attachment",
        "user",
        "status",
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Select => "select",
            Self::MultiSelect => "multi_select",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Checkbox => "checkbox",
            Self::Relation => "relation",
            Self::Formula => "formula",
            Self::Attachment => "attachment",
            Self::User => "user",
            Self::Status => "status",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl Default for ColumnType {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl From<String> for ColumnType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "text" => Self::Text,
            "number" => Self::Number,
            "select" => Self::Select,
            "multi_select" => Self::MultiSelect,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "checkbox" => Self::Checkbox,
            "relation" => Self::Relation,
            "formula" => Self::Formula,
            "attachment" => Self::Attachment,
            "user" => Self::User,
            "status" => Self::Status,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<ColumnType> for String {
    fn from(column_type: ColumnType) -> Self {
        column_type.as_str().to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ColumnValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<StatusWorkflow>,
}

impl ColumnSchema {
    pub fn new(id: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id: id.into(),
            column_type,
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn option_values(&self) -> Vec<&str> {
        self.options
            .iter()
            .flatten()
            .map(SelectOption::value)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectOption {
    Plain(String),
    Detailed {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
}

impl SelectOption {
    pub fn value(&self) -> &str {
        match self {
            Self::Plain(value) | Self::Detailed { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    #[default]
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    /// Whether a record may reference several targets through this column.
    pub fn allows_many(&self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationSchema {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub column: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cascade: bool,
}

/// State machine for `status` columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusWorkflow {
    #[serde(default)]
    pub states: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<StatusTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
}

impl StatusWorkflow {
    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s.value() == state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: TransitionSource,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionSource {
    One(String),
    Many(Vec<String>),
}

impl TransitionSource {
    pub const ANY: &'static str = "*";

    pub fn states(&self) -> Vec<&str> {
        match self {
            Self::One(state) => vec![state.as_str()],
            Self::Many(states) => states.iter().map(String::as_str).collect(),
        }
    }

    pub fn admits(&self, state: &str) -> bool {
        self.states().iter().any(|s| *s == Self::ANY || *s == state)
    }
}

// ============================================================================
// Row-level validation
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationScope {
    #[default]
    Row,
    Table,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowValidationSchema {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub scope: ValidationScope,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Severity,
}

// ============================================================================
// Automations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    RowCreated,
    RowUpdated,
    RowDeleted,
    FieldChanged,
    Scheduled,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RowCreated => "row_created",
            Self::RowUpdated => "row_updated",
            Self::RowDeleted => "row_deleted",
            Self::FieldChanged => "field_changed",
            Self::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSchema {
    #[serde(rename = "type")]
    pub kind: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    UpdateRecord,
    CreateRecord,
    /// Delivered to registered listeners (notifications, webhooks, ...).
    External(String),
}

impl From<String> for ActionKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "update_record" => Self::UpdateRecord,
            "create_record" => Self::CreateRecord,
            _ => Self::External(raw),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::UpdateRecord => "update_record".to_string(),
            ActionKind::CreateRecord => "create_record".to_string(),
            ActionKind::External(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSchema {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationSchema {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger: TriggerSchema,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionSchema>,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,
}

// ============================================================================
// Permissions
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionsSchema {
    #[serde(default)]
    pub roles: BTreeMap<String, RoleSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleSchema {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// resource -> allowed actions
    #[serde(default)]
    pub permissions: BTreeMap<String, Vec<String>>,
}

// ============================================================================
// Workflows
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Value>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Condition,
    Set,
    InsertRecord,
    UpdateRecord,
    DeleteRecord,
    Delay,
    Action,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    #[default]
    Stop,
    Continue,
    Retry,
}

fn is_default_error_handling(value: &ErrorHandling) -> bool {
    *value == ErrorHandling::Stop
}

/// Where to go after a step. A plain string jumps; a branch picks by the
/// step's boolean outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepNext {
    Goto(String),
    Branch {
        #[serde(default, alias = "true", skip_serializing_if = "Option::is_none")]
        on_true: Option<String>,
        #[serde(default, alias = "false", skip_serializing_if = "Option::is_none")]
        on_false: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Expression yielding the target record id for update/delete steps.
    #[serde(default, alias = "recordId", skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
    /// context key -> expression
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assign: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default, alias = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<StepNext>,
    #[serde(
        default,
        alias = "errorHandling",
        skip_serializing_if = "is_default_error_handling"
    )]
    pub error_handling: ErrorHandling,
    #[serde(default, alias = "maxAttempts", skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, alias = "backoffMs", skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    #[serde(default, alias = "maxBackoffMs", skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_type_round_trip() {
        let parsed: ColumnType = serde_json::from_value(json!("multi_select")).unwrap();
        assert_eq!(parsed, ColumnType::MultiSelect);
        let unknown: ColumnType = serde_json::from_value(json!("blob")).unwrap();
        assert_eq!(unknown, ColumnType::Unknown("blob".into()));
        assert_eq!(serde_json::to_value(ColumnType::DateTime).unwrap(), json!("datetime"));
    }

    #[test]
    fn test_select_options_accept_both_shapes() {
        let column: ColumnSchema = serde_json::from_value(json!({
            "id": "priority",
            "type": "select",
            "options": ["low", {"value": "high", "color": "red"}]
        }))
        .unwrap();
        assert_eq!(column.option_values(), vec!["low", "high"]);
    }

    #[test]
    fn test_version_accepts_numbers() {
        let schema: SchemaDefinition =
            serde_json::from_value(json!({"name": "app", "version": 2, "tables": {}})).unwrap();
        assert_eq!(schema.version, "2");
    }

    #[test]
    fn test_step_accepts_camel_case_aliases() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "id": "notify",
            "type": "action",
            "action": "send_email",
            "errorHandling": "retry",
            "maxAttempts": 4,
            "next": {"true": "a", "false": "b"}
        }))
        .unwrap();
        assert_eq!(step.error_handling, ErrorHandling::Retry);
        assert_eq!(step.max_attempts, Some(4));
        assert_eq!(
            step.next,
            Some(StepNext::Branch {
                on_true: Some("a".into()),
                on_false: Some("b".into())
            })
        );
    }

    #[test]
    fn test_transition_source_wildcard() {
        assert!(TransitionSource::One("*".into()).admits("draft"));
        assert!(TransitionSource::Many(vec!["a".into(), "b".into()]).admits("b"));
        assert!(!TransitionSource::One("a".into()).admits("b"));
    }
}
