//! Shorthand expansion over the raw document tree.
//!
//! Works on `serde_json::Value` so that sugar (string columns, string roles,
//! presets) is rewritten before the typed structs ever see it. Every rewrite
//! produces the canonical form, which is itself left alone, so expansion is
//! idempotent.

use std::collections::{BTreeMap, HashSet};

use log::warn;
use serde_json::{Map, Value as JsonValue, json};

use super::context::ParseContext;
use crate::expression::compile_pattern;

pub const PRESET_ID: &str = "id";
pub const PRESET_TIMESTAMPS: &str = "timestamps";
pub const PRESET_USER_TRACKING: &str = "user_tracking";

const VARIABLE_TOKEN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}";

/// Expand a raw document into canonical form.
pub fn expand(document: JsonValue) -> JsonValue {
    let JsonValue::Object(mut root) = document else {
        return document;
    };

    if let Some(JsonValue::Object(tables)) = root.get_mut("tables") {
        for (name, table) in tables.iter_mut() {
            expand_table(name, table);
        }
    }

    if let Some(JsonValue::Object(permissions)) = root.get_mut("permissions")
        && let Some(JsonValue::Object(roles)) = permissions.get_mut("roles")
    {
        expand_roles(roles);
    }

    JsonValue::Object(root)
}

fn expand_table(name: &str, table: &mut JsonValue) {
    // `tasks: ["title:text", "done:checkbox"]` is a table that is only columns
    if let JsonValue::Array(columns) = table {
        let columns = std::mem::take(columns);
        *table = json!({ "columns": columns });
    }

    let JsonValue::Object(table) = table else {
        warn!("table '{}' is not a mapping; leaving it for validation", name);
        return;
    };

    if let Some(JsonValue::Array(columns)) = table.get_mut("columns") {
        let expanded = columns.drain(..).flat_map(expand_column).collect();
        *columns = expanded;
    }

    if let Some(JsonValue::Array(indexes)) = table.get_mut("indexes") {
        for index in indexes.iter_mut() {
            if let JsonValue::String(column) = index {
                *index = json!({ "columns": [column.trim()] });
            }
        }
    }
}

/// One column entry may become several columns (presets).
pub fn expand_column(entry: JsonValue) -> Vec<JsonValue> {
    let JsonValue::String(raw) = entry else {
        return vec![entry];
    };

    if let Some(columns) = preset_columns(raw.trim()) {
        return columns;
    }

    match raw.split_once(':') {
        Some((name, column_type)) => {
            let name = name.trim();
            let column_type = match column_type.trim() {
                "" => "text",
                other => other,
            };
            vec![json!({ "id": name, "name": name, "type": column_type })]
        }
        None => {
            let name = raw.trim();
            vec![json!({ "id": name, "name": name, "type": "text" })]
        }
    }
}

pub fn preset_columns(name: &str) -> Option<Vec<JsonValue>> {
    let columns = match name {
        PRESET_ID => vec![json!({
            "id": "id",
            "type": "text",
            "unique": true,
            "required": true,
            "default": "uuid()"
        })],
        PRESET_TIMESTAMPS => vec![
            json!({ "id": "created_at", "type": "datetime", "default": "now()" }),
            json!({
                "id": "updated_at",
                "type": "datetime",
                "default": "now()",
                "formula": "now()"
            }),
        ],
        PRESET_USER_TRACKING => vec![
            json!({ "id": "created_by", "type": "user", "default": "current_user()" }),
            json!({
                "id": "updated_by",
                "type": "user",
                "default": "current_user()",
                "formula": "current_user()"
            }),
        ],
        _ => return None,
    };
    Some(columns)
}

// ============================================================================
// Roles
// ============================================================================

fn expand_roles(roles: &mut Map<String, JsonValue>) {
    for (role_id, role) in roles.iter_mut() {
        match role {
            JsonValue::String(parent) => {
                *role = json!({
                    "name": role_id,
                    "parent": parent.trim(),
                    "permissions": {}
                });
            }
            JsonValue::Object(fields) => {
                if !fields.contains_key("name") {
                    fields.insert("name".into(), JsonValue::String(role_id.clone()));
                }
                if !fields.contains_key("permissions") {
                    fields.insert("permissions".into(), json!({}));
                }
            }
            _ => warn!("role '{}' is neither a parent name nor a mapping", role_id),
        }
    }

    resolve_inheritance(roles);
}

/// Merge every ancestor's permissions under each role. The nearest ancestor
/// wins, and the role's own keys win over all of them.
fn resolve_inheritance(roles: &mut Map<String, JsonValue>) {
    let own: BTreeMap<String, Map<String, JsonValue>> = roles
        .iter()
        .map(|(id, role)| {
            let permissions = role
                .get("permissions")
                .and_then(JsonValue::as_object)
                .cloned()
                .unwrap_or_default();
            (id.clone(), permissions)
        })
        .collect();

    let parents: BTreeMap<String, String> = roles
        .iter()
        .filter_map(|(id, role)| {
            role.get("parent")
                .and_then(JsonValue::as_str)
                .map(|parent| (id.clone(), parent.to_string()))
        })
        .collect();

    for (role_id, role) in roles.iter_mut() {
        let Some(JsonValue::Object(permissions)) = role.get_mut("permissions") else {
            continue;
        };

        let mut visited = HashSet::from([role_id.clone()]);
        let mut current = parents.get(role_id);
        while let Some(parent) = current {
            if !visited.insert(parent.clone()) {
                warn!("role '{}' has a cyclic parent chain at '{}'", role_id, parent);
                break;
            }
            let Some(inherited) = own.get(parent) else {
                warn!("role '{}' inherits from unknown role '{}'", role_id, parent);
                break;
            };
            for (resource, actions) in inherited {
                if !permissions.contains_key(resource) {
                    permissions.insert(resource.clone(), actions.clone());
                }
            }
            current = parents.get(parent);
        }
    }
}

// ============================================================================
// Variable substitution
// ============================================================================

/// Replace `${VAR}` tokens with resolved variables throughout the document.
pub fn substitute(document: JsonValue, context: &ParseContext) -> JsonValue {
    substitute_with(document, &|name| context.get(name).cloned())
}

/// Substitution with an arbitrary lookup. A string that is exactly one token
/// takes the variable's typed value; embedded tokens are spliced as text.
/// Tokens the lookup cannot resolve are left verbatim.
pub fn substitute_with(value: JsonValue, lookup: &dyn Fn(&str) -> Option<JsonValue>) -> JsonValue {
    match value {
        JsonValue::String(text) => substitute_text(text, lookup),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .into_iter()
                .map(|item| substitute_with(item, lookup))
                .collect(),
        ),
        JsonValue::Object(fields) => JsonValue::Object(
            fields
                .into_iter()
                .map(|(key, item)| (key, substitute_with(item, lookup)))
                .collect(),
        ),
        other => other,
    }
}

fn substitute_text(text: String, lookup: &dyn Fn(&str) -> Option<JsonValue>) -> JsonValue {
    if !text.contains("${") {
        return JsonValue::String(text);
    }
    let token = match compile_pattern(VARIABLE_TOKEN) {
        Ok(token) => token,
        Err(err) => {
            warn!("variable substitution disabled: {}", err);
            return JsonValue::String(text);
        }
    };

    if let Some(captures) = token.captures(&text)
        && let Some(whole) = captures.get(0)
        && whole.start() == 0
        && whole.end() == text.len()
        && let Some(value) = lookup(&captures[1])
    {
        return value;
    }

    let replaced = token.replace_all(&text, |captures: &regex::Captures<'_>| {
        match lookup(&captures[1]) {
            Some(JsonValue::String(s)) => s,
            Some(other) => other.to_string(),
            None => captures[0].to_string(),
        }
    });
    JsonValue::String(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorthand_column() {
        let columns = expand_column(json!(" title : "));
        assert_eq!(columns, vec![json!({"id": "title", "name": "title", "type": "text"})]);

        let columns = expand_column(json!("score:number"));
        assert_eq!(columns[0]["type"], json!("number"));
    }

    #[test]
    fn test_bare_name_is_text_column() {
        let columns = expand_column(json!("notes"));
        assert_eq!(columns, vec![json!({"id": "notes", "name": "notes", "type": "text"})]);
    }

    #[test]
    fn test_object_column_passes_through() {
        let column = json!({"id": "id", "type": "number"});
        assert_eq!(expand_column(column.clone()), vec![column]);
    }

    #[test]
    fn test_presets() {
        let doc = expand(json!({
            "tables": {"employees": {"columns": ["id", "timestamps", "user_tracking"]}}
        }));
        let columns = doc["tables"]["employees"]["columns"].as_array().unwrap();
        assert_eq!(columns.len(), 5);
        assert_eq!(
            columns[0],
            json!({"id": "id", "type": "text", "unique": true, "required": true, "default": "uuid()"})
        );
        assert_eq!(columns[2]["formula"], json!("now()"));
        assert_eq!(columns[4]["formula"], json!("current_user()"));
    }

    #[test]
    fn test_role_inheritance_is_transitive() {
        let doc = expand(json!({
            "permissions": {"roles": {
                "viewer": {"permissions": {"tasks": ["read"], "reports": ["read"]}},
                "editor": {"parent": "viewer", "permissions": {"tasks": ["read", "write"]}},
                "admin": "editor"
            }}
        }));
        let roles = &doc["permissions"]["roles"];
        assert_eq!(roles["admin"]["name"], json!("admin"));
        assert_eq!(roles["admin"]["parent"], json!("editor"));
        assert_eq!(roles["admin"]["permissions"]["tasks"], json!(["read", "write"]));
        assert_eq!(roles["admin"]["permissions"]["reports"], json!(["read"]));
        assert_eq!(roles["editor"]["permissions"]["tasks"], json!(["read", "write"]));
    }

    #[test]
    fn test_role_cycle_terminates() {
        let doc = expand(json!({
            "permissions": {"roles": {
                "a": {"parent": "b", "permissions": {"x": ["read"]}},
                "b": {"parent": "a", "permissions": {"y": ["read"]}}
            }}
        }));
        assert_eq!(doc["permissions"]["roles"]["a"]["permissions"]["y"], json!(["read"]));
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let raw = json!({
            "name": "app",
            "tables": {
                "tasks": ["id", "title:text", "timestamps"],
                "notes": {"columns": ["body"], "indexes": ["body"]}
            },
            "permissions": {"roles": {"viewer": {"permissions": {"tasks": ["read"]}}, "editor": "viewer"}}
        });
        let once = expand(raw);
        let twice = expand(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_substitution() {
        let mut ctx = ParseContext::new();
        ctx.set("HOST", json!("db.local"));
        ctx.set("LIMIT", json!(50));

        let doc = substitute(
            json!({"url": "https://${HOST}/api", "limit": "${LIMIT}", "list": ["${MISSING}"]}),
            &ctx,
        );
        assert_eq!(doc["url"], json!("https://db.local/api"));
        assert_eq!(doc["limit"], json!(50));
        assert_eq!(doc["list"][0], json!("${MISSING}"));
    }
}
