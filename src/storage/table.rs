use std::collections::{BTreeMap, HashMap};

use crate::core::{Record, Result, SchemaError, Value};
use crate::schema::TableSchema;

const KEY_SEPARATOR: &str = "\u{1f}";

#[derive(Debug, Clone)]
struct Index {
    name: String,
    columns: Vec<String>,
    unique: bool,
    entries: HashMap<String, Vec<usize>>,
}

impl Index {
    /// `None` when any indexed column is null; such rows are not indexed.
    fn key_of(&self, record: &Record) -> Option<String> {
        let mut parts = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match record.get(column) {
                None | Some(Value::Null) => return None,
                Some(value) => parts.push(value.index_key()),
            }
        }
        Some(parts.join(KEY_SEPARATOR))
    }

    fn covers(&self, column: &str) -> bool {
        self.columns.len() == 1 && self.columns[0] == column
    }
}

/// Record storage for one table: rows in insertion order, an id lookup and
/// the declared secondary indexes.
#[derive(Debug, Clone)]
pub struct TableData {
    name: String,
    rows: BTreeMap<usize, Record>,
    ids: HashMap<String, usize>,
    next_row_id: usize,
    indexes: Vec<Index>,
}

impl TableData {
    pub fn new(name: impl Into<String>, schema: &TableSchema) -> Self {
        let mut indexes: Vec<Index> = schema
            .indexes
            .iter()
            .map(|index| Index {
                name: index.display_name(),
                columns: index.columns.clone(),
                unique: index.unique,
                entries: HashMap::new(),
            })
            .collect();

        // `unique: true` columns get an implicit unique index
        for column in schema.columns.iter().filter(|c| c.unique) {
            let covered = indexes.iter().any(|i| i.unique && i.covers(&column.id));
            if !covered {
                indexes.push(Index {
                    name: format!("unique_{}", column.id),
                    columns: vec![column.id.clone()],
                    unique: true,
                    entries: HashMap::new(),
                });
            }
        }

        Self {
            name: name.into(),
            rows: BTreeMap::new(),
            ids: HashMap::new(),
            next_row_id: 0,
            indexes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.ids.get(id).and_then(|row_id| self.rows.get(row_id))
    }

    /// Records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.indexes.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn has_index(&self, column: &str) -> bool {
        self.indexes.iter().any(|i| i.covers(column))
    }

    pub fn insert(&mut self, id: String, record: Record) -> Result<()> {
        if self.ids.contains_key(&id) {
            return Err(SchemaError::UniqueViolation {
                column: "id".to_string(),
                value: id,
            });
        }
        self.check_uniqueness(&record, None)?;

        let row_id = self.next_row_id;
        self.next_row_id += 1;

        self.update_indexes(row_id, &record);
        self.rows.insert(row_id, record);
        self.ids.insert(id, row_id);
        Ok(())
    }

    /// Swap in a new version of a record, returning the previous one.
    pub fn replace(&mut self, id: &str, record: Record) -> Result<Record> {
        let row_id = *self.ids.get(id).ok_or_else(|| SchemaError::RecordNotFound {
            table: self.name.clone(),
            id: id.to_string(),
        })?;
        self.check_uniqueness(&record, Some(row_id))?;

        let old = self.rows.insert(row_id, record.clone()).unwrap_or_default();
        self.remove_from_indexes(row_id, &old);
        self.update_indexes(row_id, &record);
        Ok(old)
    }

    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let row_id = self.ids.remove(id)?;
        let record = self.rows.remove(&row_id)?;
        self.remove_from_indexes(row_id, &record);
        Some(record)
    }

    /// Records whose `column` equals `value`, served from a single-column
    /// index when one exists.
    pub fn find(&self, column: &str, value: &Value) -> Vec<Record> {
        if !value.is_null()
            && let Some(index) = self.indexes.iter().find(|i| i.covers(column))
        {
            let key = value.index_key();
            return index
                .entries
                .get(&key)
                .map(|row_ids| {
                    row_ids
                        .iter()
                        .filter_map(|row_id| self.rows.get(row_id).cloned())
                        .collect()
                })
                .unwrap_or_default();
        }

        self.rows
            .values()
            .filter(|record| record.get(column).unwrap_or(&Value::Null) == value)
            .cloned()
            .collect()
    }

    fn check_uniqueness(&self, record: &Record, ignore_row: Option<usize>) -> Result<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let Some(key) = index.key_of(record) else {
                continue;
            };
            let conflict = index
                .entries
                .get(&key)
                .is_some_and(|row_ids| row_ids.iter().any(|r| Some(*r) != ignore_row));
            if conflict {
                let value = index
                    .columns
                    .iter()
                    .map(|c| record.get(c).map(Value::to_string).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(SchemaError::UniqueViolation {
                    column: index.columns.join(", "),
                    value,
                });
            }
        }
        Ok(())
    }

    fn update_indexes(&mut self, row_id: usize, record: &Record) {
        for index in &mut self.indexes {
            if let Some(key) = index.key_of(record) {
                index.entries.entry(key).or_default().push(row_id);
            }
        }
    }

    fn remove_from_indexes(&mut self, row_id: usize, record: &Record) {
        for index in &mut self.indexes {
            if let Some(key) = index.key_of(record)
                && let Some(row_ids) = index.entries.get_mut(&key)
            {
                row_ids.retain(|r| *r != row_id);
                if row_ids.is_empty() {
                    index.entries.remove(&key);
                }
            }
        }
    }
}
