//! SQL table bindings.
//!
//! A binding ties a schema to a table name on a host-provided connection.
//! Statement text is assembled from validated identifiers only (table name
//! and schema columns, checked against a strict identifier grammar) and every
//! value travels as a positional parameter. `toSQL` and execution share the
//! same builders, so the preview is always the statement that would run.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::interpreter::capabilities::DbConnection;
use crate::interpreter::error::RuntimeError;
use crate::interpreter::schema::{Record, Schema};
use crate::interpreter::value::Value;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("identifier pattern"));

const MAX_IDENTIFIER_LEN: usize = 64;

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str) -> Result<(), RuntimeError> {
    if name.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER.is_match(name) {
        return Err(RuntimeError::db(
            "DB-0003",
            format!("invalid SQL identifier '{}'", name),
        ));
    }
    Ok(())
}

/// A statement with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone)]
struct BindingState {
    schema: Arc<Schema>,
    table: String,
    /// Equality filters accumulated by `where`
    filters: Vec<(String, Value)>,
    /// Order keys accumulated by `orderBy`, (column, descending)
    order_by: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    /// Column projection set by `select`; None selects all columns
    select: Option<Vec<String>>,
}

/// A schema bound to a database table
#[derive(Clone)]
pub struct TableBinding {
    state: Arc<BindingState>,
    conn: Arc<dyn DbConnection>,
}

impl std::fmt::Debug for TableBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableBinding")
            .field("schema", &self.state.schema.name)
            .field("table", &self.state.table)
            .field("filters", &self.state.filters.len())
            .finish()
    }
}

impl TableBinding {
    pub fn new(
        schema: Arc<Schema>,
        table: &str,
        conn: Arc<dyn DbConnection>,
    ) -> Result<Self, RuntimeError> {
        validate_identifier(table)?;
        for column in schema.fields.keys() {
            validate_identifier(column)?;
        }
        Ok(Self {
            state: Arc::new(BindingState {
                schema,
                table: table.to_string(),
                filters: Vec::new(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
                select: None,
            }),
            conn,
        })
    }

    pub fn ptr_eq(&self, other: &TableBinding) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.state.schema
    }

    pub fn table(&self) -> &str {
        &self.state.table
    }

    fn check_column(&self, column: &str) -> Result<(), RuntimeError> {
        if !self.state.schema.fields.contains_key(column) {
            return Err(RuntimeError::db(
                "DB-0004",
                format!(
                    "schema {} has no column '{}'",
                    self.state.schema.name, column
                ),
            ));
        }
        Ok(())
    }

    /// New binding with an extra equality filter
    pub fn filtered(&self, column: &str, value: Value) -> Result<TableBinding, RuntimeError> {
        self.check_column(column)?;
        let mut state = (*self.state).clone();
        state.filters.push((column.to_string(), value));
        Ok(TableBinding {
            state: Arc::new(state),
            conn: Arc::clone(&self.conn),
        })
    }

    /// New binding with an additional order key; chaining `orderBy` builds a
    /// multi-column ordering
    pub fn ordered(&self, column: &str, descending: bool) -> Result<TableBinding, RuntimeError> {
        self.check_column(column)?;
        let mut state = (*self.state).clone();
        state.order_by.push((column.to_string(), descending));
        Ok(TableBinding {
            state: Arc::new(state),
            conn: Arc::clone(&self.conn),
        })
    }

    /// New binding ordered by `column` alone, discarding accumulated keys
    pub fn reordered(&self, column: &str, descending: bool) -> Result<TableBinding, RuntimeError> {
        self.check_column(column)?;
        let mut state = (*self.state).clone();
        state.order_by = vec![(column.to_string(), descending)];
        Ok(TableBinding {
            state: Arc::new(state),
            conn: Arc::clone(&self.conn),
        })
    }

    /// Flip the effective ordering, for taking rows from the far end. An
    /// unordered binding reverses to primary key descending.
    pub fn reversed(&self) -> TableBinding {
        let mut state = (*self.state).clone();
        if state.order_by.is_empty() {
            state.order_by.push((state.schema.pk.clone(), true));
        } else {
            for (_, descending) in &mut state.order_by {
                *descending = !*descending;
            }
        }
        TableBinding {
            state: Arc::new(state),
            conn: Arc::clone(&self.conn),
        }
    }

    pub fn limited(&self, n: u64) -> TableBinding {
        let mut state = (*self.state).clone();
        state.limit = Some(n);
        TableBinding {
            state: Arc::new(state),
            conn: Arc::clone(&self.conn),
        }
    }

    pub fn offset(&self, n: u64) -> TableBinding {
        let mut state = (*self.state).clone();
        state.offset = Some(n);
        TableBinding {
            state: Arc::new(state),
            conn: Arc::clone(&self.conn),
        }
    }

    /// New binding projecting only the named columns
    pub fn selected(&self, columns: &[String]) -> Result<TableBinding, RuntimeError> {
        for column in columns {
            self.check_column(column)?;
        }
        let mut state = (*self.state).clone();
        state.select = Some(columns.to_vec());
        Ok(TableBinding {
            state: Arc::new(state),
            conn: Arc::clone(&self.conn),
        })
    }

    // Statement builders. These are the single source of statement text;
    // toSQL and execution both go through them.

    pub fn insert_query(&self, record: &Record) -> Query {
        let columns: Vec<&str> = record.fields.keys().map(|k| k.as_str()).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        Query {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.state.table,
                columns.join(", "),
                placeholders
            ),
            params: record.fields.values().cloned().collect(),
        }
    }

    pub fn update_query(&self, record: &Record) -> Result<Query, RuntimeError> {
        let pk = &self.state.schema.pk;
        let pk_value = record.pk_value().filter(|v| *v != Value::Null).ok_or_else(|| {
            RuntimeError::db(
                "DB-0016",
                format!("cannot update: record has no '{}' value", pk),
            )
        })?;
        let mut sets = Vec::new();
        let mut params = Vec::new();
        for (column, value) in record.fields.iter() {
            if column == pk {
                continue;
            }
            sets.push(format!("{} = ?", column));
            params.push(value.clone());
        }
        params.push(pk_value);
        Ok(Query {
            sql: format!(
                "UPDATE {} SET {} WHERE {} = ?",
                self.state.table,
                sets.join(", "),
                pk
            ),
            params,
        })
    }

    pub fn delete_query(&self, record: &Record) -> Result<Query, RuntimeError> {
        let pk = &self.state.schema.pk;
        let pk_value = record.pk_value().filter(|v| *v != Value::Null).ok_or_else(|| {
            RuntimeError::db(
                "DB-0017",
                format!("cannot delete: record has no '{}' value", pk),
            )
        })?;
        Ok(Query {
            sql: format!("DELETE FROM {} WHERE {} = ?", self.state.table, pk),
            params: vec![pk_value],
        })
    }

    pub fn select_query(&self, projection: &str) -> Query {
        // a `select` projection only narrows plain row reads, never aggregates
        let projection = match (&self.state.select, projection) {
            (Some(columns), "*") => columns.join(", "),
            _ => projection.to_string(),
        };
        let mut sql = format!("SELECT {} FROM {}", projection, self.state.table);
        let mut params = Vec::new();
        if !self.state.filters.is_empty() {
            let clauses: Vec<String> = self
                .state
                .filters
                .iter()
                .map(|(column, _)| format!("{} = ?", column))
                .collect();
            sql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
            params.extend(self.state.filters.iter().map(|(_, v)| v.clone()));
        }
        if !self.state.order_by.is_empty() {
            let keys: Vec<String> = self
                .state
                .order_by
                .iter()
                .map(|(column, descending)| {
                    format!("{} {}", column, if *descending { "DESC" } else { "ASC" })
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
        }
        match (self.state.limit, self.state.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // sqlite needs a LIMIT clause to carry an OFFSET
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        Query { sql, params }
    }

    pub fn aggregate_query(&self, func: &str, column: &str) -> Result<Query, RuntimeError> {
        self.check_column(column)?;
        Ok(self.select_query(&format!("{}({})", func, column)))
    }

    // Execution. Connection failures surface as catchable value errors.

    pub fn run_execute(&self, query: &Query) -> Result<u64, RuntimeError> {
        self.conn
            .execute(&query.sql, &query.params)
            .map_err(|e| RuntimeError::db("DB-0001", e))
    }

    pub fn run_query(&self, query: &Query) -> Result<Vec<Vec<(String, Value)>>, RuntimeError> {
        self.conn
            .query(&query.sql, &query.params)
            .map_err(|e| RuntimeError::db("DB-0001", e))
    }

    /// First cell of the first row, for aggregates
    pub fn run_scalar(&self, query: &Query) -> Result<Value, RuntimeError> {
        let rows = self.run_query(query)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .map(|(_, value)| value)
            .unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::capabilities::RecordingDb;
    use crate::interpreter::schema::FieldDef;
    use indexmap::IndexMap;

    fn binding() -> TableBinding {
        let mut fields = IndexMap::new();
        fields.insert(
            "id".to_string(),
            FieldDef {
                pk: true,
                ..FieldDef::of_type("int")
            },
        );
        fields.insert(
            "name".to_string(),
            FieldDef {
                required: true,
                nullable: false,
                ..FieldDef::of_type("string")
            },
        );
        let schema = Schema::new("User", fields);
        TableBinding::new(schema, "users", Arc::new(RecordingDb::default())).unwrap()
    }

    fn record_with(id: Option<i64>) -> Record {
        let binding = binding();
        let mut input = IndexMap::new();
        if let Some(id) = id {
            input.insert("id".to_string(), Value::Int(id));
        }
        input.insert("name".to_string(), Value::Str("ada".to_string()));
        binding.schema().validate(&input).unwrap()
    }

    #[test]
    fn rejects_bad_identifiers() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("users; DROP TABLE x").is_err());
        assert!(validate_identifier("1users").is_err());
        assert!(validate_identifier(&"x".repeat(65)).is_err());
    }

    #[test]
    fn insert_uses_positional_params() {
        let query = binding().insert_query(&record_with(Some(1)));
        assert_eq!(query.sql, "INSERT INTO users (id, name) VALUES (?, ?)");
        assert_eq!(query.params.len(), 2);
    }

    #[test]
    fn update_requires_a_primary_key() {
        let binding = binding();
        let query = binding.update_query(&record_with(Some(7))).unwrap();
        assert_eq!(query.sql, "UPDATE users SET name = ? WHERE id = ?");
        assert_eq!(query.params.last(), Some(&Value::Int(7)));

        let err = binding.update_query(&record_with(None)).unwrap_err();
        assert_eq!(err.code, "DB-0016");
        assert!(err.is_catchable());
    }

    #[test]
    fn delete_requires_a_primary_key() {
        let binding = binding();
        let err = binding.delete_query(&record_with(None)).unwrap_err();
        assert_eq!(err.code, "DB-0017");
    }

    #[test]
    fn filters_compose_without_mutating_the_source() {
        let all = binding();
        let active = all.filtered("name", Value::Str("ada".to_string())).unwrap();
        let query = active
            .ordered("id", true)
            .unwrap()
            .limited(10)
            .select_query("*");
        assert_eq!(
            query.sql,
            "SELECT * FROM users WHERE name = ? ORDER BY id DESC LIMIT 10"
        );
        assert_eq!(all.select_query("*").sql, "SELECT * FROM users");
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let err = binding().filtered("password", Value::Null).unwrap_err();
        assert_eq!(err.code, "DB-0004");
    }

    #[test]
    fn order_keys_accumulate_in_call_order() {
        let query = binding()
            .ordered("name", false)
            .unwrap()
            .ordered("id", true)
            .unwrap()
            .select_query("*");
        assert_eq!(query.sql, "SELECT * FROM users ORDER BY name ASC, id DESC");
    }

    #[test]
    fn reversed_flips_every_key_and_defaults_to_the_pk() {
        let query = binding().reversed().limited(1).select_query("*");
        assert_eq!(query.sql, "SELECT * FROM users ORDER BY id DESC LIMIT 1");

        let query = binding()
            .ordered("name", false)
            .unwrap()
            .reversed()
            .select_query("*");
        assert_eq!(query.sql, "SELECT * FROM users ORDER BY name DESC");
    }

    #[test]
    fn offset_rides_the_limit_clause() {
        let query = binding().limited(10).offset(20).select_query("*");
        assert_eq!(query.sql, "SELECT * FROM users LIMIT 10 OFFSET 20");

        let query = binding().offset(5).select_query("*");
        assert_eq!(query.sql, "SELECT * FROM users LIMIT -1 OFFSET 5");
    }

    #[test]
    fn select_narrows_row_reads_but_not_aggregates() {
        let narrowed = binding()
            .selected(&["id".to_string(), "name".to_string()])
            .unwrap();
        assert_eq!(narrowed.select_query("*").sql, "SELECT id, name FROM users");
        assert_eq!(
            narrowed.select_query("COUNT(*)").sql,
            "SELECT COUNT(*) FROM users"
        );

        let err = binding().selected(&["password".to_string()]).unwrap_err();
        assert_eq!(err.code, "DB-0004");
    }
}
