use std::collections::HashMap;

use log::error;

use crate::core::{Record, Result, SchemaError, Value};
use crate::schema::{Cardinality, ColumnType, SchemaDefinition};

/// Link from a relation column to the table and column it references.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationHandler {
    pub table: String,
    pub column: String,
    pub target_table: String,
    pub target_column: String,
    pub cardinality: Cardinality,
    pub cascade: bool,
}

impl RelationHandler {
    /// Whether `child` (a record of `self.table`) points at `key`.
    pub fn references(&self, child: &Record, key: &Value) -> bool {
        match child.get(&self.column) {
            None | Some(Value::Null) => false,
            Some(Value::Array(ids)) if self.cardinality.allows_many() => {
                ids.iter().any(|id| id == key)
            }
            Some(value) => value == key,
        }
    }
}

/// Every relation in a schema, indexed by owning table+column and by target.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    handlers: Vec<RelationHandler>,
    by_column: HashMap<(String, String), usize>,
    by_target: HashMap<String, Vec<usize>>,
}

impl RelationRegistry {
    /// Wire every relation column. A target table missing here means the
    /// schema bypassed validation.
    pub fn from_schema(schema: &SchemaDefinition) -> Result<Self> {
        let mut registry = Self::default();

        for (table_name, table) in &schema.tables {
            for column in &table.columns {
                if column.column_type != ColumnType::Relation {
                    continue;
                }
                let Some(relation) = &column.relation else {
                    continue;
                };
                if !schema.tables.contains_key(&relation.table) {
                    error!(
                        "relation {}.{} targets unknown table '{}'",
                        table_name, column.id, relation.table
                    );
                    return Err(SchemaError::UnknownTable(relation.table.clone()));
                }

                registry.add(RelationHandler {
                    table: table_name.clone(),
                    column: column.id.clone(),
                    target_table: relation.table.clone(),
                    target_column: relation.column.clone(),
                    cardinality: relation.cardinality,
                    cascade: relation.cascade,
                });
            }
        }

        Ok(registry)
    }

    fn add(&mut self, handler: RelationHandler) {
        let slot = self.handlers.len();
        self.by_column
            .insert((handler.table.clone(), handler.column.clone()), slot);
        self.by_target
            .entry(handler.target_table.clone())
            .or_default()
            .push(slot);
        self.handlers.push(handler);
    }

    pub fn get(&self, table: &str, column: &str) -> Option<&RelationHandler> {
        self.by_column
            .get(&(table.to_string(), column.to_string()))
            .map(|slot| &self.handlers[*slot])
    }

    /// Relations declared on `table`.
    pub fn outgoing(&self, table: &str) -> impl Iterator<Item = &RelationHandler> {
        self.handlers.iter().filter(move |h| h.table == table)
    }

    /// Relations pointing at `table` that delete their children with it.
    pub fn cascading_into(&self, table: &str) -> impl Iterator<Item = &RelationHandler> {
        self.by_target
            .get(table)
            .into_iter()
            .flatten()
            .map(|slot| &self.handlers[*slot])
            .filter(|h| h.cascade)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
