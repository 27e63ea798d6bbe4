//! Row/table access to the target application's data store.
//!
//! Step executors only ever read through [`TargetDataStore::select`];
//! deletion is reserved for scoped cleanup.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use harness_core::scenario::FieldCondition;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};

pub type Row = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum TargetDataError {
    #[error("target data store is not configured")]
    NotConfigured,
    #[error("invalid identifier '{name}'")]
    InvalidIdentifier { name: String },
    #[error("target data query failed on {table}: {source}")]
    Query {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("target data store lock poisoned")]
    Poisoned,
}

/// One column predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub condition: FieldCondition,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            condition: FieldCondition::Equals(value.into()),
        }
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            condition: FieldCondition::IsNot { not: Value::Null },
        }
    }
}

pub fn filters_from_conditions(conditions: &BTreeMap<String, FieldCondition>) -> Vec<Filter> {
    conditions
        .iter()
        .map(|(column, condition)| Filter {
            column: column.clone(),
            condition: condition.clone(),
        })
        .collect()
}

#[async_trait]
pub trait TargetDataStore: Send + Sync {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Row>, TargetDataError>;

    /// Deletes matching rows. An empty filter list is refused with zero rows.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, TargetDataError>;
}

/// Stand-in used when no target data store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTargetData;

#[async_trait]
impl TargetDataStore for UnconfiguredTargetData {
    async fn select(
        &self,
        _table: &str,
        _filters: &[Filter],
        _limit: Option<usize>,
    ) -> Result<Vec<Row>, TargetDataError> {
        Err(TargetDataError::NotConfigured)
    }

    async fn delete(&self, _table: &str, _filters: &[Filter]) -> Result<usize, TargetDataError> {
        Err(TargetDataError::NotConfigured)
    }
}

pub fn validate_identifier(name: &str) -> Result<&str, TargetDataError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(TargetDataError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

fn where_clause(filters: &[Filter]) -> Result<(String, Vec<SqlValue>), TargetDataError> {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut args = Vec::new();
    for filter in filters {
        let column = validate_identifier(&filter.column)?;
        match &filter.condition {
            FieldCondition::Equals(Value::Null) => clauses.push(format!("{column} IS NULL")),
            FieldCondition::IsNot { not: Value::Null } => {
                clauses.push(format!("{column} IS NOT NULL"))
            }
            FieldCondition::Equals(value) => {
                args.push(to_sql(value));
                clauses.push(format!("{column} = ?{}", args.len()));
            }
            FieldCondition::IsNot { not } => {
                args.push(to_sql(not));
                clauses.push(format!("({column} IS NULL OR {column} != ?{})", args.len()));
            }
        }
    }
    if clauses.is_empty() {
        Ok((String::new(), args))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), args))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real).map_or(Value::Null, Value::Number),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(String::from_utf8_lossy(blob).into_owned()),
    }
}

/// Target data store backed by a SQLite database file.
#[derive(Debug)]
pub struct SqliteTargetData {
    conn: Mutex<Connection>,
}

impl SqliteTargetData {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TargetDataError> {
        let conn = Connection::open(path).map_err(|source| TargetDataError::Query {
            table: "<open>".to_string(),
            source,
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, TargetDataError> {
        let conn = Connection::open_in_memory().map_err(|source| TargetDataError::Query {
            table: "<open>".to_string(),
            source,
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs raw SQL, e.g. to seed fixtures.
    pub fn execute_batch(&self, sql: &str) -> Result<(), TargetDataError> {
        let conn = self.conn.lock().map_err(|_| TargetDataError::Poisoned)?;
        conn.execute_batch(sql)
            .map_err(|source| TargetDataError::Query {
                table: "<batch>".to_string(),
                source,
            })
    }

    fn select_blocking(
        &self,
        table: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Row>, TargetDataError> {
        let table = validate_identifier(table)?;
        let (clause, args) = where_clause(filters)?;
        let limit = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
        let sql = format!("SELECT * FROM {table}{clause}{limit}");
        let query_err = |source| TargetDataError::Query {
            table: table.to_string(),
            source,
        };

        let conn = self.conn.lock().map_err(|_| TargetDataError::Poisoned)?;
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(args.iter())).map_err(query_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_err)? {
            let mut record = Row::new();
            for (index, column) in columns.iter().enumerate() {
                let value = row.get_ref(index).map_err(query_err)?;
                record.insert(column.clone(), to_json(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn delete_blocking(&self, table: &str, filters: &[Filter]) -> Result<usize, TargetDataError> {
        if filters.is_empty() {
            return Ok(0);
        }
        let table = validate_identifier(table)?;
        let (clause, args) = where_clause(filters)?;
        let conn = self.conn.lock().map_err(|_| TargetDataError::Poisoned)?;
        conn.execute(
            &format!("DELETE FROM {table}{clause}"),
            params_from_iter(args.iter()),
        )
        .map_err(|source| TargetDataError::Query {
            table: table.to_string(),
            source,
        })
    }
}

#[async_trait]
impl TargetDataStore for SqliteTargetData {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Row>, TargetDataError> {
        self.select_blocking(table, filters, limit)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, TargetDataError> {
        self.delete_blocking(table, filters)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::SqliteTargetData;

    /// In-memory target schema covering every table the scenarios touch.
    pub(crate) fn target_store() -> SqliteTargetData {
        let store = SqliteTargetData::open_in_memory().expect("in-memory target");
        store
            .execute_batch(
                r#"
CREATE TABLE products (id TEXT PRIMARY KEY, name TEXT, product_type TEXT, active INTEGER);
CREATE TABLE chat_sessions (id INTEGER PRIMARY KEY, session_id TEXT);
CREATE TABLE chat_messages (id INTEGER PRIMARY KEY, session_id TEXT, role TEXT, content TEXT);
CREATE TABLE diagnostic_audits (id TEXT PRIMARY KEY, session_id TEXT, status TEXT,
    urgency_score INTEGER, opportunity_score INTEGER);
CREATE TABLE contact_submissions (id INTEGER PRIMARY KEY, name TEXT, email TEXT, lead_score INTEGER);
CREATE TABLE orders (id TEXT PRIMARY KEY, status TEXT, email TEXT);
CREATE TABLE order_items (id INTEGER PRIMARY KEY, order_id TEXT, product_id TEXT);
INSERT INTO products VALUES ('prod-ebook', 'Automation Playbook', 'ebook', 1);
INSERT INTO products VALUES ('prod-training', 'Team Training', 'training', 1);
INSERT INTO products VALUES ('prod-retired', 'Old Course', 'course', 0);
"#,
            )
            .expect("seed target schema");
        store
    }
}
