use std::collections::BTreeMap;

use crate::schema::SchemaDefinition;

const WILDCARD: &str = "*";

/// Role -> resource -> actions, with inheritance already merged in by the
/// expander.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    roles: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    default_role: Option<String>,
}

impl PermissionSet {
    pub fn from_schema(schema: &SchemaDefinition) -> Self {
        let mut roles: BTreeMap<String, BTreeMap<String, Vec<String>>> = schema
            .roles()
            .map(|(id, role)| (id.clone(), role.permissions.clone()))
            .collect();

        // table-level `permissions: {role: [actions]}` grant on that table
        for (table_name, table) in &schema.tables {
            for (role, actions) in &table.permissions {
                roles
                    .entry(role.clone())
                    .or_default()
                    .entry(table_name.clone())
                    .or_default()
                    .extend(actions.iter().cloned());
            }
        }

        Self {
            roles,
            default_role: schema.permissions.as_ref().and_then(|p| p.default_role.clone()),
        }
    }

    pub fn allows(&self, role: &str, resource: &str, action: &str) -> bool {
        let Some(grants) = self.roles.get(role) else {
            return false;
        };
        [resource, WILDCARD]
            .iter()
            .filter_map(|r| grants.get(*r))
            .flatten()
            .any(|granted| granted == action || granted == WILDCARD)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn default_role(&self) -> Option<&str> {
        self.default_role.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::expand;
    use serde_json::json;

    #[test]
    fn test_inherited_and_wildcard_grants() {
        let document = expand(json!({
            "name": "app", "version": "1",
            "tables": {"tasks": {"columns": ["title"], "permissions": {"guest": ["read"]}}},
            "permissions": {"roles": {
                "viewer": {"permissions": {"tasks": ["read"]}},
                "editor": {"parent": "viewer", "permissions": {"comments": ["write"]}},
                "admin": {"permissions": {"*": ["*"]}}
            }}
        }));
        let schema: SchemaDefinition = serde_json::from_value(document).unwrap();
        let permissions = PermissionSet::from_schema(&schema);

        assert!(permissions.allows("editor", "tasks", "read"));
        assert!(!permissions.allows("editor", "tasks", "delete"));
        assert!(permissions.allows("admin", "anything", "delete"));
        assert!(permissions.allows("guest", "tasks", "read"));
        assert!(!permissions.allows("nobody", "tasks", "read"));
    }
}
