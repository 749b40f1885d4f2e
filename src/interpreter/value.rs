//! Runtime values.
//!
//! Containers are handle types: cloning a dictionary or table clones the
//! handle, not the contents, which gives dictionaries shared-mutation
//! semantics while table transforms stay immutable by always building new
//! tables. Everything is `Send + Sync` so module values can be shared
//! through the process-wide module cache.

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::interpreter::datetime::{Datetime, Duration};
use crate::interpreter::environment::Environment;
use crate::interpreter::error::RuntimeError;
use crate::interpreter::money::Money;
use crate::interpreter::regex::RegexValue;
use crate::interpreter::schema::{Record, Schema};
use crate::interpreter::sql::TableBinding;
use crate::interpreter::Evaluator;
use crate::parser::ast;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Money(Money),
    Duration(Duration),
    Datetime(Datetime),
    Path(PathValue),
    Url(UrlValue),
    Regex(RegexValue),
    Command(CommandValue),
    Array(Vec<Value>),
    Dict(Dict),
    Table(Table),
    Schema(Arc<Schema>),
    Record(Record),
    TableBinding(TableBinding),
    Function(FunctionValue),
    Builtin(Builtin),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Money(_) => "money",
            Value::Duration(_) => "duration",
            Value::Datetime(_) => "datetime",
            Value::Path(_) => "path",
            Value::Url(_) => "url",
            Value::Regex(_) => "regex",
            Value::Command(_) => "command",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Table(_) => "table",
            Value::Schema(_) => "schema",
            Value::Record(_) => "record",
            Value::TableBinding(_) => "binding",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin",
        }
    }

    /// Only `null` and `false` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Structural equality for scalars, handle identity for containers and
    /// functions. Language-level `==` (which forces dictionary entries and
    /// compares containers structurally) lives on the evaluator.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Money(a), Value::Money(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Datetime(a), Value::Datetime(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (Value::Url(a), Value::Url(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Command(a), Value::Command(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a.ptr_eq(b),
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Schema(a), Value::Schema(b)) => a.id == b.id,
            (Value::Record(a), Value::Record(b)) => {
                a.schema.id == b.schema.id && a.fields == b.fields
            }
            (Value::TableBinding(a), Value::TableBinding(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(&a.body, &b.body),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            _ => false,
        }
    }
}

/// Ordering for sortable value pairs. `None` when the pair has no defined
/// order (mixed types, mixed currencies).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Money(x), Value::Money(y)) if x.currency == y.currency => {
            Some(x.amount.cmp(&y.amount))
        }
        (Value::Datetime(x), Value::Datetime(y)) => Some(x.instant.cmp(&y.instant)),
        (Value::Duration(x), Value::Duration(y)) => {
            // approximate calendar units for ordering only
            let secs = |d: &Duration| d.months as i64 * 2_629_746 + d.days * 86_400 + d.secs;
            Some(secs(x).cmp(&secs(y)))
        }
        _ => None,
    }
}

/// Dictionary entry: values start as unevaluated expressions and are
/// replaced by their result on first access
#[derive(Debug, Clone)]
pub enum DictEntry {
    Expr(ast::Expr),
    Value(Value),
}

#[derive(Debug, Default)]
struct DictInner {
    entries: IndexMap<String, DictEntry>,
    env: Environment,
}

/// An insertion-ordered dictionary handle with lazy entry evaluation
#[derive(Debug, Clone, Default)]
pub struct Dict {
    inner: Arc<RwLock<DictInner>>,
}

impl Dict {
    /// Empty dictionary whose pending entries evaluate in `env`
    pub fn new(env: Environment) -> Self {
        Self {
            inner: Arc::new(RwLock::new(DictInner {
                entries: IndexMap::new(),
                env,
            })),
        }
    }

    pub fn from_exprs(pairs: Vec<(String, ast::Expr)>, env: Environment) -> Self {
        let dict = Dict::new(env);
        {
            let mut inner = dict.inner.write().unwrap_or_else(|e| e.into_inner());
            for (key, expr) in pairs {
                inner.entries.insert(key, DictEntry::Expr(expr));
            }
        }
        dict
    }

    pub fn env(&self) -> Environment {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .env
            .clone()
    }

    pub fn ptr_eq(&self, other: &Dict) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .keys()
            .cloned()
            .collect()
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .contains_key(key)
    }

    pub fn entry(&self, key: &str) -> Option<DictEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .get(key)
            .cloned()
    }

    pub fn insert_value(&self, key: impl Into<String>, value: Value) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .insert(key.into(), DictEntry::Value(value));
    }

    /// Remove a key, preserving the order of the remaining entries
    pub fn remove(&self, key: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .shift_remove(key)
            .is_some()
    }

    /// New dictionary with the given keys first, in the given order, followed
    /// by the remaining keys in their current order. The receiver is untouched.
    pub fn reorder(&self, first: &[String]) -> Dict {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let out = Dict::new(inner.env.clone());
        {
            let mut out_inner = out.inner.write().unwrap_or_else(|e| e.into_inner());
            for key in first {
                if let Some(entry) = inner.entries.get(key) {
                    out_inner.entries.insert(key.clone(), entry.clone());
                }
            }
            for (key, entry) in &inner.entries {
                if !out_inner.entries.contains_key(key) {
                    out_inner.entries.insert(key.clone(), entry.clone());
                }
            }
        }
        out
    }

    /// New dictionary with `other`'s entries layered over this one's
    pub fn merge(&self, other: &Dict) -> Dict {
        let out = Dict::new(self.env());
        {
            let a = self.inner.read().unwrap_or_else(|e| e.into_inner());
            let mut out_inner = out.inner.write().unwrap_or_else(|e| e.into_inner());
            for (key, entry) in &a.entries {
                out_inner.entries.insert(key.clone(), entry.clone());
            }
        }
        {
            let b = other.inner.read().unwrap_or_else(|e| e.into_inner());
            let mut out_inner = out.inner.write().unwrap_or_else(|e| e.into_inner());
            for (key, entry) in &b.entries {
                out_inner.entries.insert(key.clone(), entry.clone());
            }
        }
        out
    }
}

/// A user-defined function: parameters, shared body, captured environment
#[derive(Debug, Clone)]
pub struct FunctionValue {
    pub params: Vec<String>,
    pub body: Arc<ast::Block>,
    pub env: Environment,
}

pub type BuiltinFn = fn(&Evaluator, &Environment, Vec<Value>) -> Result<Value, RuntimeError>;

/// A native function exposed to scripts
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

/// A filesystem path value (`@./data/users.sl`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValue {
    pub raw: String,
}

impl PathValue {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn format(&self) -> String {
        format!("@{}", self.raw)
    }
}

/// A deferred process invocation. Building a handle performs no security
/// check; the execute gate applies when the handle runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandValue {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables applied at spawn time
    pub env: Vec<(String, String)>,
}

impl CommandValue {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    pub fn format(&self) -> String {
        let mut out = format!("<command {}", self.program);
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out.push('>');
        out
    }
}

/// A URL value with eagerly parsed components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlValue {
    pub raw: String,
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl UrlValue {
    pub fn parse(raw: &str) -> Result<Self, RuntimeError> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| RuntimeError::bad_syntax(format!("invalid URL '{}'", raw)))?;
        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) => (r, Some(f.to_string())),
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, Some(q.to_string())),
            None => (rest, None),
        };
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port = p.parse::<u16>().map_err(|_| {
                    RuntimeError::bad_syntax(format!("invalid URL port '{}'", p))
                })?;
                (h.to_string(), Some(port))
            }
            None => (authority.to_string(), None),
        };
        if host.is_empty() {
            return Err(RuntimeError::bad_syntax(format!(
                "invalid URL '{}': missing host",
                raw
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_string(),
            host,
            port,
            path,
            query,
            fragment,
        })
    }

    pub fn format(&self) -> String {
        self.raw.clone()
    }
}

#[derive(Debug, Default)]
struct TableData {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// An immutable columnar table. Transforms build new tables; existing
/// handles never observe changes.
#[derive(Debug, Clone, Default)]
pub struct Table {
    data: Arc<TableData>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            data: Arc::new(TableData { columns, rows }),
        }
    }

    pub fn ptr_eq(&self, other: &Table) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn columns(&self) -> &[String] {
        &self.data.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.data.rows
    }

    pub fn len(&self) -> usize {
        self.data.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.data.columns.iter().position(|c| c == name)
    }

    /// Row as a dictionary of column name to cell
    pub fn row_dict(&self, index: usize, env: &Environment) -> Option<Dict> {
        let row = self.data.rows.get(index)?;
        let dict = Dict::new(env.clone());
        for (col, cell) in self.data.columns.iter().zip(row) {
            dict.insert_value(col.clone(), cell.clone());
        }
        Some(dict)
    }

    pub fn with_rows(&self, rows: Vec<Vec<Value>>) -> Table {
        Table::new(self.data.columns.clone(), rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_preserves_insertion_order_across_delete() {
        let dict = Dict::new(Environment::new());
        dict.insert_value("a", Value::Int(1));
        dict.insert_value("b", Value::Int(2));
        dict.insert_value("c", Value::Int(3));
        dict.remove("b");
        dict.insert_value("d", Value::Int(4));
        assert_eq!(dict.keys(), vec!["a", "c", "d"]);
    }

    #[test]
    fn reorder_returns_a_new_dict() {
        let dict = Dict::new(Environment::new());
        dict.insert_value("a", Value::Int(1));
        dict.insert_value("b", Value::Int(2));
        dict.insert_value("c", Value::Int(3));
        let reordered = dict.reorder(&["c".to_string(), "a".to_string()]);
        assert_eq!(reordered.keys(), vec!["c", "a", "b"]);
        assert_eq!(dict.keys(), vec!["a", "b", "c"]);
        assert!(!dict.ptr_eq(&reordered));
    }

    #[test]
    fn merge_layers_right_over_left() {
        let a = Dict::new(Environment::new());
        a.insert_value("x", Value::Int(1));
        a.insert_value("y", Value::Int(2));
        let b = Dict::new(Environment::new());
        b.insert_value("y", Value::Int(20));
        b.insert_value("z", Value::Int(30));
        let merged = a.merge(&b);
        assert_eq!(merged.keys(), vec!["x", "y", "z"]);
        match merged.entry("y") {
            Some(DictEntry::Value(Value::Int(20))) => {}
            other => panic!("expected y=20, got {:?}", other),
        }
    }

    #[test]
    fn url_parsing_extracts_components() {
        let url = UrlValue::parse("https://example.com:8080/a/b?q=1#frag").unwrap();
        assert_eq!(url.scheme, "https");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, Some(8080));
        assert_eq!(url.path, "/a/b");
        assert_eq!(url.query.as_deref(), Some("q=1"));
        assert_eq!(url.fragment.as_deref(), Some("frag"));

        let bare = UrlValue::parse("http://example.com").unwrap();
        assert_eq!(bare.path, "/");
        assert_eq!(bare.port, None);
    }

    #[test]
    fn cross_type_numeric_ordering() {
        assert_eq!(
            compare_values(&Value::Int(2), &Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(compare_values(&Value::Int(1), &Value::Str("x".into())), None);
    }
}
