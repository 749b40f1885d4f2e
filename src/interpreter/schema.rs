//! Schemas and validated records.
//!
//! A schema is a named set of typed fields. Schema identity is nominal: two
//! schemas with identical fields are still different schemas, compared by a
//! process-unique id rather than by structure. Calling a schema validates a
//! dictionary into a record; validation failures are catchable value errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::interpreter::value::Value;

static NEXT_SCHEMA_ID: AtomicU64 = AtomicU64::new(1);

/// Declared shape of one schema field
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub type_name: String,
    pub required: bool,
    pub nullable: bool,
    pub default: Option<Value>,
    pub pk: bool,
}

impl FieldDef {
    /// Shorthand field declaration: just a type name
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            required: false,
            nullable: true,
            default: None,
            pk: false,
        }
    }
}

#[derive(Debug)]
pub struct Schema {
    pub id: u64,
    pub name: String,
    pub fields: IndexMap<String, FieldDef>,
    /// Primary key column, defaults to "id"
    pub pk: String,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: IndexMap<String, FieldDef>) -> Arc<Self> {
        let pk = fields
            .iter()
            .find(|(_, def)| def.pk)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| "id".to_string());
        Arc::new(Self {
            id: NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            fields,
            pk,
        })
    }

    /// Validate a set of input fields. On success the record carries the
    /// input values plus defaults for omitted optional fields.
    pub fn validate(
        self: &Arc<Self>,
        input: &IndexMap<String, Value>,
    ) -> Result<Record, Vec<String>> {
        let mut errors = Vec::new();
        let mut out: IndexMap<String, Value> = IndexMap::new();

        for (name, def) in &self.fields {
            match input.get(name) {
                Some(Value::Null) => {
                    if def.nullable {
                        out.insert(name.clone(), Value::Null);
                    } else {
                        errors.push(format!("field '{}' cannot be null", name));
                    }
                }
                Some(value) => {
                    if type_matches(&def.type_name, value) {
                        out.insert(name.clone(), value.clone());
                    } else {
                        errors.push(format!(
                            "field '{}' expects {}, got {}",
                            name,
                            def.type_name,
                            value.type_name()
                        ));
                    }
                }
                None => {
                    if let Some(default) = &def.default {
                        out.insert(name.clone(), default.clone());
                    } else if def.required {
                        errors.push(format!("missing required field '{}'", name));
                    }
                }
            }
        }
        for name in input.keys() {
            if !self.fields.contains_key(name) {
                errors.push(format!(
                    "unknown field '{}' for schema {}",
                    name, self.name
                ));
            }
        }

        if errors.is_empty() {
            Ok(Record {
                schema: Arc::clone(self),
                fields: Arc::new(out),
            })
        } else {
            Err(errors)
        }
    }
}

/// Does a runtime value satisfy a schema type name?
pub fn type_matches(type_name: &str, value: &Value) -> bool {
    match type_name {
        "int" => matches!(value, Value::Int(_)),
        "float" => matches!(value, Value::Int(_) | Value::Float(_)),
        "bool" => matches!(value, Value::Bool(_)),
        "string" => matches!(value, Value::Str(_)),
        "money" => matches!(value, Value::Money(_)),
        "duration" => matches!(value, Value::Duration(_)),
        "datetime" => matches!(value, Value::Datetime(_)),
        "array" => matches!(value, Value::Array(_)),
        "dict" => matches!(value, Value::Dict(_)),
        "any" => true,
        _ => false,
    }
}

/// A dictionary validated against a schema. Records are immutable snapshots;
/// mutate by validating a new dictionary.
#[derive(Debug, Clone)]
pub struct Record {
    pub schema: Arc<Schema>,
    pub fields: Arc<IndexMap<String, Value>>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    pub fn pk_value(&self) -> Option<Value> {
        self.get(&self.schema.pk)
    }
}
