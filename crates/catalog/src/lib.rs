//! Table schemas and the persistent catalog side-file.
//!
//! The catalog owns every table's column definitions and the ordered list of
//! data pages backing it. It is persisted as `table_schemas.json` and
//! rewritten as a whole on every DDL operation.

use ahash::RandomState;
use common::{DbError, DbResult, PageId, RowMap};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use types::{ColumnType, Value};

type Map<K, V> = HashMap<K, V, RandomState>;

/// Describes a logical column within a table schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            max_length: None,
            nullable: true,
            default_value: None,
            primary_key: false,
            unique: false,
        }
    }

    pub fn max_length(mut self, limit: usize) -> Self {
        self.max_length = Some(limit);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Checks one value against this column's type and length constraints.
    pub fn validate_value(&self, value: &Value) -> DbResult<()> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(DbError::SchemaViolation(format!(
                "column '{}' cannot be null",
                self.name
            )));
        }
        if !value.matches_type(self.ty) {
            return Err(DbError::SchemaViolation(format!(
                "invalid type for column '{}'",
                self.name
            )));
        }
        if let (Some(limit), Value::Text(text)) = (self.max_length, value) {
            if text.chars().count() > limit {
                return Err(DbError::SchemaViolation(format!(
                    "value for column '{}' exceeds max length {limit}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// The fallback value for a non-nullable column without a default.
    pub fn zero_value(&self) -> Value {
        match self.ty {
            ColumnType::Integer => Value::Int(0),
            ColumnType::Float => Value::Float(0.0),
            ColumnType::Boolean => Value::Bool(false),
            ColumnType::String | ColumnType::Date | ColumnType::Timestamp => {
                Value::Text(String::new())
            }
        }
    }
}

/// Ordered column definitions of one table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<String>,
    #[serde(default)]
    pub created_at: u64,
}

impl TableSchema {
    pub fn try_new(name: impl Into<String>, columns: Vec<Column>) -> DbResult<Self> {
        let name = name.into();
        if columns.is_empty() {
            return Err(DbError::SchemaViolation(format!(
                "table '{name}' must contain at least one column"
            )));
        }
        let mut seen: Map<&str, ()> = Map::default();
        let mut primary_key = None;
        for column in &columns {
            if seen.insert(column.name.as_str(), ()).is_some() {
                return Err(DbError::SchemaViolation(format!(
                    "duplicate column '{}' in table '{name}'",
                    column.name
                )));
            }
            if column.primary_key {
                if primary_key.is_some() {
                    return Err(DbError::SchemaViolation(format!(
                        "table '{name}' declares more than one primary key"
                    )));
                }
                primary_key = Some(column.name.clone());
            }
        }
        drop(seen);
        Ok(Self {
            name,
            columns,
            primary_key,
            created_at: 0,
        })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn add_column(&mut self, column: Column) -> DbResult<()> {
        if self.has_column(&column.name) {
            return Err(DbError::Conflict(format!(
                "column '{}' already exists on table '{}'",
                column.name, self.name
            )));
        }
        if column.primary_key && self.primary_key.is_some() {
            return Err(DbError::SchemaViolation(format!(
                "table '{}' already has a primary key",
                self.name
            )));
        }
        if column.primary_key {
            self.primary_key = Some(column.name.clone());
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> DbResult<Column> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "column '{name}' does not exist on table '{}'",
                    self.name
                ))
            })?;
        let column = self.columns.remove(idx);
        if self.primary_key.as_deref() == Some(name) {
            self.primary_key = None;
        }
        Ok(column)
    }

    /// Validates a record against this schema: unknown columns are rejected,
    /// present values must conform, and every non-nullable column without a
    /// default must be present.
    pub fn validate_record(&self, record: &RowMap) -> DbResult<()> {
        for (name, value) in record {
            let column = self.column(name).ok_or_else(|| {
                DbError::SchemaViolation(format!(
                    "unknown column '{name}' for table '{}'",
                    self.name
                ))
            })?;
            column.validate_value(value)?;
        }
        for column in &self.columns {
            if !column.nullable
                && column.default_value.is_none()
                && !record.contains_key(&column.name)
            {
                return Err(DbError::SchemaViolation(format!(
                    "column '{}' cannot be null",
                    column.name
                )));
            }
        }
        Ok(())
    }

    /// Fills missing columns that declare a default value.
    pub fn apply_defaults(&self, record: &mut RowMap) {
        for column in &self.columns {
            if record.contains_key(&column.name) {
                continue;
            }
            if let Some(default) = &column.default_value {
                record.insert(column.name.clone(), default.clone());
            }
        }
    }
}

/// Persistent catalog: every table schema plus the table→data-page map.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: Vec<TableSchema>,
    table_pages: Map<String, Vec<PageId>>,
    #[serde(skip)]
    name_index: Map<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the catalog file, returning an empty catalog when absent.
    pub fn load(path: &Path) -> DbResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path)?;
        let mut catalog: Catalog = serde_json::from_str(&raw)
            .map_err(|err| DbError::Corruption(format!("invalid catalog file: {err}")))?;
        catalog.rebuild_name_index();
        Ok(catalog)
    }

    /// Persists the catalog as pretty JSON, rewriting the whole file.
    pub fn save(&self, path: &Path) -> DbResult<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|err| DbError::Corruption(format!("catalog serialize failed: {err}")))?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn table(&self, name: &str) -> DbResult<&TableSchema> {
        let idx = self
            .name_index
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("unknown table '{name}'")))?;
        Ok(&self.tables[idx])
    }

    pub fn table_mut(&mut self, name: &str) -> DbResult<&mut TableSchema> {
        let idx = self
            .name_index
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("unknown table '{name}'")))?;
        Ok(&mut self.tables[idx])
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.name_index.contains_key(name)
    }

    pub fn create_table(&mut self, schema: TableSchema) -> DbResult<()> {
        if self.has_table(&schema.name) {
            return Err(DbError::Conflict(format!(
                "table '{}' already exists",
                schema.name
            )));
        }
        self.table_pages.insert(schema.name.clone(), Vec::new());
        self.tables.push(schema);
        self.rebuild_name_index();
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let idx = self
            .name_index
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("unknown table '{name}'")))?;
        self.tables.remove(idx);
        self.table_pages.remove(name);
        self.rebuild_name_index();
        Ok(())
    }

    /// The ordered data-page list of a table.
    pub fn pages(&self, table: &str) -> DbResult<&[PageId]> {
        self.table_pages
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| DbError::NotFound(format!("unknown table '{table}'")))
    }

    /// Appends a freshly created data page to a table's page list.
    pub fn push_page(&mut self, table: &str, page_id: PageId) -> DbResult<()> {
        self.table_pages
            .get_mut(table)
            .ok_or_else(|| DbError::NotFound(format!("unknown table '{table}'")))?
            .push(page_id);
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }

    fn rebuild_name_index(&mut self) {
        self.name_index.clear();
        for (idx, table) in self.tables.iter().enumerate() {
            self.name_index.insert(table.name.clone(), idx);
        }
    }
}
