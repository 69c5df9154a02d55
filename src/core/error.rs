use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    // ========================================
    // Parse-time
    // ========================================
    #[error("Failed to parse schema: {0}")]
    Parse(Box<SchemaError>),

    #[error("Invalid schema document: {0}")]
    InvalidDocument(String),

    #[error("Schema structure error: {0}")]
    SchemaStructure(String),

    #[error("Table '{table}': {message}")]
    TableStructure { table: String, message: String },

    #[error("Table '{table}': {message}")]
    ColumnStructure { table: String, message: String },

    #[error("Column '{table}.{column}' has invalid type '{column_type}'")]
    InvalidType {
        table: String,
        column: String,
        column_type: String,
    },

    #[error("Column '{table}.{column}': {message}")]
    ColumnShape {
        table: String,
        column: String,
        message: String,
    },

    #[error("Column '{table}.{column}' references missing {target}")]
    DanglingReference {
        table: String,
        column: String,
        target: String,
    },

    #[error("Missing required environment variable: {0}")]
    MissingEnvironmentVariable(String),

    // ========================================
    // Runtime, per-operation validation
    // ========================================
    #[error("Field '{column}' is required")]
    RequiredField { column: String },

    #[error("Field '{column}' expects {expected}, got {actual}")]
    TypeValidation {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Field '{column}': {message}")]
    RangeValidation { column: String, message: String },

    #[error("Field '{column}' does not match pattern '{pattern}'")]
    PatternValidation { column: String, pattern: String },

    #[error("Field '{column}': '{value}' is not a valid option")]
    InvalidOption { column: String, value: String },

    #[error("Field '{column}': {message}")]
    CustomValidation { column: String, message: String },

    #[error("Row validation '{rule}' failed: {message}")]
    RowValidation { rule: String, message: String },

    #[error("Field '{column}' must be unique; value {value} already exists")]
    UniqueViolation { column: String, value: String },

    #[error("Field '{column}' cannot transition from '{from}' to '{to}'")]
    InvalidTransition {
        column: String,
        from: String,
        to: String,
    },

    // ========================================
    // Runtime, lifecycle and structure
    // ========================================
    #[error("Record '{id}' not found in table '{table}'")]
    RecordNotFound { table: String, id: String },

    #[error("Table '{0}' not found")]
    UnknownTable(String),

    #[error("Workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("Workflow '{workflow}' failed at step '{step}': {message}")]
    WorkflowStepFailed {
        workflow: String,
        step: String,
        message: String,
    },

    // ========================================
    // Expression evaluation (never surfaced by validate/defaults)
    // ========================================
    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Expression evaluation exceeded its budget: {0}")]
    EvaluationTimeout(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;

impl SchemaError {
    /// Wraps a failure from any parse stage. Already-wrapped errors stay single-wrapped.
    pub fn parse(cause: SchemaError) -> Self {
        match cause {
            wrapped @ SchemaError::Parse(_) => wrapped,
            other => SchemaError::Parse(Box::new(other)),
        }
    }

    /// The underlying kind for wrapped parse errors, or `self`.
    pub fn root_cause(&self) -> &SchemaError {
        match self {
            SchemaError::Parse(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Column id carried by per-field validation errors.
    pub fn column(&self) -> Option<&str> {
        match self.root_cause() {
            SchemaError::RequiredField { column }
            | SchemaError::TypeValidation { column, .. }
            | SchemaError::RangeValidation { column, .. }
            | SchemaError::PatternValidation { column, .. }
            | SchemaError::InvalidOption { column, .. }
            | SchemaError::CustomValidation { column, .. }
            | SchemaError::UniqueViolation { column, .. }
            | SchemaError::InvalidTransition { column, .. }
            | SchemaError::InvalidType { column, .. }
            | SchemaError::ColumnShape { column, .. }
            | SchemaError::DanglingReference { column, .. } => Some(column),
            _ => None,
        }
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(
            self.root_cause(),
            SchemaError::RequiredField { .. }
                | SchemaError::TypeValidation { .. }
                | SchemaError::RangeValidation { .. }
                | SchemaError::PatternValidation { .. }
                | SchemaError::InvalidOption { .. }
                | SchemaError::CustomValidation { .. }
                | SchemaError::RowValidation { .. }
                | SchemaError::UniqueViolation { .. }
                | SchemaError::InvalidTransition { .. }
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for SchemaError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<serde_yaml::Error> for SchemaError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapping_is_single_level() {
        let inner = SchemaError::SchemaStructure("missing name".into());
        let wrapped = SchemaError::parse(SchemaError::parse(inner.clone()));

        match &wrapped {
            SchemaError::Parse(cause) => assert_eq!(**cause, inner),
            other => panic!("expected Parse, got {:?}", other),
        }
        assert_eq!(wrapped.root_cause(), &inner);
        assert!(wrapped.to_string().contains("missing name"));
    }

    #[test]
    fn test_column_accessor() {
        let err = SchemaError::RequiredField { column: "title".into() };
        assert_eq!(err.column(), Some("title"));
        assert!(err.is_validation_error());
        assert_eq!(SchemaError::UnknownTable("x".into()).column(), None);
    }
}
