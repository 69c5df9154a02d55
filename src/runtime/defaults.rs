use chrono::Utc;
use uuid::Uuid;

use crate::core::Value;

pub const UUID_SENTINEL: &str = "uuid()";
pub const NOW_SENTINEL: &str = "now()";
pub const CURRENT_USER_SENTINEL: &str = "current_user()";

/// Caller identity for a mutation. Resolves `current_user()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationContext {
    pub user: Option<String>,
}

impl MutationContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn as_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
        }
    }
}

/// Value for a function-call sentinel, or `None` if `raw` is not one.
pub fn resolve_sentinel(raw: &str, context: &MutationContext) -> Option<Value> {
    match raw.trim() {
        UUID_SENTINEL => Some(Value::Text(Uuid::new_v4().to_string())),
        NOW_SENTINEL => Some(Value::Text(Utc::now().to_rfc3339())),
        CURRENT_USER_SENTINEL => Some(
            context
                .user
                .as_ref()
                .map(|u| Value::Text(u.clone()))
                .unwrap_or(Value::Null),
        ),
        _ => None,
    }
}

/// A column default: sentinels are resolved, any other literal is used verbatim.
pub fn resolve_default(default: &Value, context: &MutationContext) -> Value {
    default
        .as_str()
        .and_then(|raw| resolve_sentinel(raw, context))
        .unwrap_or_else(|| default.clone())
}

/// `<table>_<millis>_<suffix>`; unique in practice, not guaranteed.
pub fn generate_record_id(table: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", table, Utc::now().timestamp_millis(), &suffix[..9])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        let ctx = MutationContext::as_user("ada");
        assert_eq!(resolve_default(&Value::from("current_user()"), &ctx), Value::from("ada"));
        assert_eq!(
            resolve_default(&Value::from("current_user()"), &MutationContext::anonymous()),
            Value::Null
        );
        assert_eq!(resolve_default(&Value::from(false), &ctx), Value::from(false));
        assert_eq!(resolve_default(&Value::from("draft"), &ctx), Value::from("draft"));

        let id = resolve_default(&Value::from("uuid()"), &ctx);
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());

        let now = resolve_default(&Value::from("now()"), &ctx);
        assert!(chrono::DateTime::parse_from_rfc3339(now.as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_record_ids() {
        let a = generate_record_id("tasks");
        let b = generate_record_id("tasks");
        assert!(a.starts_with("tasks_"));
        assert_eq!(a.split('_').count(), 3);
        assert_ne!(a, b);
    }
}
