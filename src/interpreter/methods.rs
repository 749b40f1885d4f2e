//! Method dispatch for built-in types.
//!
//! Each receiver type has its own method family. Unknown methods report the
//! family's method names for "did you mean" hints. Dictionary entries that
//! hold functions are resolved by the evaluator before dispatch reaches
//! here, so a dict method here is always one of the built-in ones.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::interpreter::datetime::Duration;
use crate::interpreter::environment::Environment;
use crate::interpreter::error::{check_arity, ErrorClass, RuntimeError};
use crate::interpreter::money::Money;
use crate::interpreter::regex::RegexValue;
use crate::interpreter::schema::Record;
use crate::interpreter::security::Access;
use crate::interpreter::sql::{Query, TableBinding};
use crate::interpreter::value::{compare_values, CommandValue, Dict, PathValue, Table, UrlValue, Value};
use crate::interpreter::Evaluator;

pub fn dispatch(
    ev: &Evaluator,
    env: &Environment,
    receiver: &Value,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Str(s) => string_method(s, method, args),
        Value::Array(items) => array_method(ev, env, items, method, args),
        Value::Dict(dict) => dict_method(ev, env, dict, method, args),
        Value::Money(m) => money_method(m, method, args),
        Value::Datetime(d) => datetime_method(d, method, args),
        Value::Duration(d) => duration_method(env, d, method, args),
        Value::Regex(r) => regex_method(env, r, method, args),
        Value::Path(p) => path_method(ev, p, method, args),
        Value::Url(u) => url_method(u, method, args),
        Value::Command(c) => command_method(ev, env, c, method, args),
        Value::Record(r) => record_method(env, r, method, args),
        Value::Schema(_) => schema_method(ev, env, receiver, method, args),
        Value::Table(t) => table_method(ev, env, t, method, args),
        Value::TableBinding(b) => binding_method(ev, env, b, method, args),
        other => Err(RuntimeError::unknown_method(other.type_name(), method, &[])),
    }
}

fn unknown(type_name: &str, method: &str, family: &[&str]) -> RuntimeError {
    let known: Vec<String> = family.iter().map(|m| m.to_string()).collect();
    RuntimeError::unknown_method(type_name, method, &known)
}

fn require_str(method: &str, value: &Value) -> Result<String, RuntimeError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(RuntimeError::type_mismatch("string", other.type_name())
            .with_hint(format!("{} takes a string argument", method))),
    }
}

fn require_int(method: &str, value: &Value) -> Result<i64, RuntimeError> {
    value.as_int().ok_or_else(|| {
        RuntimeError::type_mismatch("int", value.type_name())
            .with_hint(format!("{} takes an int argument", method))
    })
}

/// Apply a user callback with as many of `args` as it declares
fn call_callback(
    ev: &Evaluator,
    env: &Environment,
    callback: &Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    match callback {
        Value::Function(func) => ev.apply_callback(func, args),
        other => ev.call_value(other.clone(), args[..1].to_vec(), env),
    }
}

// Strings

const STRING_METHODS: &[&str] = &[
    "len", "upper", "lower", "trim", "split", "contains", "replace", "startsWith", "endsWith",
    "toInt", "toFloat",
];

fn string_method(s: &str, method: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match method {
        "len" => {
            check_arity("len", 0, &args)?;
            Ok(Value::Int(s.chars().count() as i64))
        }
        "upper" => {
            check_arity("upper", 0, &args)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        "lower" => {
            check_arity("lower", 0, &args)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        "trim" => {
            check_arity("trim", 0, &args)?;
            Ok(Value::Str(s.trim().to_string()))
        }
        "split" => {
            check_arity("split", 1, &args)?;
            let sep = require_str("split", &args[0])?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::Str(c.to_string())).collect()
            } else {
                s.split(&sep).map(|p| Value::Str(p.to_string())).collect()
            };
            Ok(Value::Array(parts))
        }
        "contains" => {
            check_arity("contains", 1, &args)?;
            Ok(Value::Bool(s.contains(&require_str("contains", &args[0])?)))
        }
        "replace" => {
            check_arity("replace", 2, &args)?;
            let from = require_str("replace", &args[0])?;
            let to = require_str("replace", &args[1])?;
            Ok(Value::Str(s.replace(&from, &to)))
        }
        "startsWith" => {
            check_arity("startsWith", 1, &args)?;
            Ok(Value::Bool(s.starts_with(&require_str("startsWith", &args[0])?)))
        }
        "endsWith" => {
            check_arity("endsWith", 1, &args)?;
            Ok(Value::Bool(s.ends_with(&require_str("endsWith", &args[0])?)))
        }
        "toInt" => {
            check_arity("toInt", 0, &args)?;
            s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                RuntimeError::new(
                    ErrorClass::Value,
                    "FMT-0003",
                    format!("'{}' is not an integer", s),
                )
            })
        }
        "toFloat" => {
            check_arity("toFloat", 0, &args)?;
            s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                RuntimeError::new(
                    ErrorClass::Value,
                    "FMT-0003",
                    format!("'{}' is not a number", s),
                )
            })
        }
        _ => Err(unknown("string", method, STRING_METHODS)),
    }
}

// Arrays

const ARRAY_METHODS: &[&str] = &[
    "len", "map", "filter", "reduce", "sort", "reverse", "first", "last", "push", "join",
    "contains", "sum", "slice", "indexOf",
];

fn array_method(
    ev: &Evaluator,
    env: &Environment,
    items: &[Value],
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match method {
        "len" => {
            check_arity("len", 0, &args)?;
            Ok(Value::Int(items.len() as i64))
        }
        "map" => {
            check_arity("map", 1, &args)?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(call_callback(
                    ev,
                    env,
                    &args[0],
                    &[item.clone(), Value::Int(i as i64)],
                )?);
            }
            Ok(Value::Array(out))
        }
        "filter" => {
            check_arity("filter", 1, &args)?;
            let mut out = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let keep = call_callback(
                    ev,
                    env,
                    &args[0],
                    &[item.clone(), Value::Int(i as i64)],
                )?;
                if keep.is_truthy() {
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        "reduce" => {
            // reduce(f) seeds with the first element; reduce(f, init) with init
            if args.is_empty() || args.len() > 2 {
                return Err(RuntimeError::arity_mismatch("reduce", 2, args.len()));
            }
            let mut iter = items.iter();
            let mut acc = if args.len() == 2 {
                args[1].clone()
            } else {
                iter.next()
                    .cloned()
                    .ok_or_else(|| RuntimeError::user_failure("reduce of an empty array"))?
            };
            for item in iter {
                acc = call_callback(ev, env, &args[0], &[acc, item.clone()])?;
            }
            Ok(acc)
        }
        "sort" => {
            check_arity("sort", 0, &args)?;
            let mut out = items.to_vec();
            let mut bad: Option<RuntimeError> = None;
            out.sort_by(|a, b| match compare_values(a, b) {
                Some(ord) => ord,
                None => {
                    if bad.is_none() {
                        bad = Some(RuntimeError::invalid_operands(
                            "sort",
                            a.type_name(),
                            b.type_name(),
                        ));
                    }
                    std::cmp::Ordering::Equal
                }
            });
            match bad {
                Some(err) => Err(err),
                None => Ok(Value::Array(out)),
            }
        }
        "reverse" => {
            check_arity("reverse", 0, &args)?;
            let mut out = items.to_vec();
            out.reverse();
            Ok(Value::Array(out))
        }
        "first" => {
            check_arity("first", 0, &args)?;
            Ok(items.first().cloned().unwrap_or(Value::Null))
        }
        "last" => {
            check_arity("last", 0, &args)?;
            Ok(items.last().cloned().unwrap_or(Value::Null))
        }
        "push" => {
            check_arity("push", 1, &args)?;
            let mut out = items.to_vec();
            out.push(args.into_iter().next().unwrap_or(Value::Null));
            Ok(Value::Array(out))
        }
        "join" => {
            check_arity("join", 1, &args)?;
            let sep = require_str("join", &args[0])?;
            let parts: Result<Vec<String>, RuntimeError> =
                items.iter().map(|v| ev.format_value(v)).collect();
            Ok(Value::Str(parts?.join(&sep)))
        }
        "contains" => {
            check_arity("contains", 1, &args)?;
            for item in items {
                if ev.values_equal(item, &args[0])? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "sum" => {
            check_arity("sum", 0, &args)?;
            let mut iter = items.iter();
            let Some(first) = iter.next() else {
                return Ok(Value::Int(0));
            };
            let mut acc = first.clone();
            for item in iter {
                acc = match (acc, item) {
                    (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
                    (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                    (Value::Int(a), Value::Float(b)) => Value::Float(a as f64 + b),
                    (Value::Float(a), Value::Int(b)) => Value::Float(a + *b as f64),
                    (Value::Money(a), Value::Money(b)) => Value::Money(a.add(b)?),
                    (a, b) => {
                        return Err(RuntimeError::invalid_operands(
                            "sum",
                            a.type_name(),
                            b.type_name(),
                        ));
                    }
                };
            }
            Ok(acc)
        }
        "slice" => {
            check_arity("slice", 2, &args)?;
            let len = items.len() as i64;
            let clamp = |i: i64| -> usize {
                let i = if i < 0 { len + i } else { i };
                i.clamp(0, len) as usize
            };
            let start = clamp(require_int("slice", &args[0])?);
            let end = clamp(require_int("slice", &args[1])?);
            if start >= end {
                return Ok(Value::Array(Vec::new()));
            }
            Ok(Value::Array(items[start..end].to_vec()))
        }
        "indexOf" => {
            check_arity("indexOf", 1, &args)?;
            for (i, item) in items.iter().enumerate() {
                if ev.values_equal(item, &args[0])? {
                    return Ok(Value::Int(i as i64));
                }
            }
            Ok(Value::Int(-1))
        }
        _ => Err(unknown("array", method, ARRAY_METHODS)),
    }
}

// Dictionaries

const DICT_METHODS: &[&str] = &[
    "keys", "values", "entries", "has", "get", "set", "delete", "reorder", "merge", "len",
];

fn dict_method(
    ev: &Evaluator,
    env: &Environment,
    dict: &Dict,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match method {
        "keys" => {
            check_arity("keys", 0, &args)?;
            Ok(Value::Array(dict.keys().into_iter().map(Value::Str).collect()))
        }
        "values" => {
            check_arity("values", 0, &args)?;
            let mut out = Vec::new();
            for key in dict.keys() {
                out.push(ev.dict_get(dict, &key)?);
            }
            Ok(Value::Array(out))
        }
        "entries" => {
            check_arity("entries", 0, &args)?;
            let mut out = Vec::new();
            for key in dict.keys() {
                let value = ev.dict_get(dict, &key)?;
                out.push(Value::Array(vec![Value::Str(key), value]));
            }
            Ok(Value::Array(out))
        }
        "has" => {
            check_arity("has", 1, &args)?;
            Ok(Value::Bool(dict.has(&require_str("has", &args[0])?)))
        }
        "get" => {
            check_arity("get", 1, &args)?;
            ev.dict_get(dict, &require_str("get", &args[0])?)
        }
        "set" => {
            check_arity("set", 2, &args)?;
            let key = require_str("set", &args[0])?;
            dict.insert_value(key, args[1].clone());
            Ok(Value::Dict(dict.clone()))
        }
        "delete" => {
            check_arity("delete", 1, &args)?;
            Ok(Value::Bool(dict.remove(&require_str("delete", &args[0])?)))
        }
        "reorder" => {
            check_arity("reorder", 1, &args)?;
            let Value::Array(keys) = &args[0] else {
                return Err(RuntimeError::type_mismatch("array", args[0].type_name()));
            };
            let mut first = Vec::with_capacity(keys.len());
            for key in keys {
                first.push(require_str("reorder", key)?);
            }
            Ok(Value::Dict(dict.reorder(&first)))
        }
        "merge" => {
            check_arity("merge", 1, &args)?;
            let Value::Dict(other) = &args[0] else {
                return Err(RuntimeError::type_mismatch("dict", args[0].type_name()));
            };
            Ok(Value::Dict(dict.merge(other)))
        }
        "len" => {
            check_arity("len", 0, &args)?;
            let _ = env;
            Ok(Value::Int(dict.len() as i64))
        }
        _ => Err(unknown("dict", method, DICT_METHODS)),
    }
}

// Money

const MONEY_METHODS: &[&str] = &["split", "format", "abs", "negate", "amount", "currency"];

fn money_method(m: &Money, method: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match method {
        "split" => {
            check_arity("split", 1, &args)?;
            let n = require_int("split", &args[0])?;
            Ok(Value::Array(
                m.split(n)?.into_iter().map(Value::Money).collect(),
            ))
        }
        "format" => {
            check_arity("format", 0, &args)?;
            Ok(Value::Str(m.format()))
        }
        "abs" => {
            check_arity("abs", 0, &args)?;
            Ok(Value::Money(m.abs()))
        }
        "negate" => {
            check_arity("negate", 0, &args)?;
            Ok(Value::Money(m.negate()))
        }
        "amount" => {
            check_arity("amount", 0, &args)?;
            Ok(Value::Int(m.amount))
        }
        "currency" => {
            check_arity("currency", 0, &args)?;
            Ok(Value::Str(m.currency.clone()))
        }
        _ => Err(unknown("money", method, MONEY_METHODS)),
    }
}

// Datetimes

const DATETIME_METHODS: &[&str] = &[
    "year", "month", "day", "hour", "minute", "second", "weekday", "iso", "unix", "format",
];

fn datetime_method(
    d: &crate::interpreter::datetime::Datetime,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    if DATETIME_METHODS.contains(&method) && method != "format" {
        check_arity(method, 0, &args)?;
    }
    match method {
        "year" => Ok(Value::Int(d.year())),
        "month" => Ok(Value::Int(d.month())),
        "day" => Ok(Value::Int(d.day())),
        "hour" => Ok(Value::Int(d.hour())),
        "minute" => Ok(Value::Int(d.minute())),
        "second" => Ok(Value::Int(d.second())),
        "weekday" => Ok(Value::Str(d.weekday())),
        "iso" => Ok(Value::Str(d.iso())),
        "unix" => Ok(Value::Int(d.unix())),
        "format" => {
            check_arity("format", 1, &args)?;
            Ok(Value::Str(d.format_with(&require_str("format", &args[0])?)))
        }
        _ => Err(unknown("datetime", method, DATETIME_METHODS)),
    }
}

// Durations

const DURATION_METHODS: &[&str] = &["toDict", "format"];

fn duration_method(
    env: &Environment,
    d: &Duration,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match method {
        "toDict" => {
            check_arity("toDict", 0, &args)?;
            let dict = Dict::new(env.clone());
            dict.insert_value("months", Value::Int(d.months as i64));
            dict.insert_value("days", Value::Int(d.days));
            dict.insert_value("seconds", Value::Int(d.secs));
            Ok(Value::Dict(dict))
        }
        "format" => {
            check_arity("format", 0, &args)?;
            Ok(Value::Str(d.format()))
        }
        _ => Err(unknown("duration", method, DURATION_METHODS)),
    }
}

// Regexes

const REGEX_METHODS: &[&str] = &["test", "match", "findAll", "replace", "split"];

fn regex_method(
    env: &Environment,
    r: &RegexValue,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match method {
        "test" => {
            check_arity("test", 1, &args)?;
            Ok(Value::Bool(r.compiled.is_match(&require_str("test", &args[0])?)))
        }
        "match" => {
            check_arity("match", 1, &args)?;
            let text = require_str("match", &args[0])?;
            match r.compiled.captures(&text) {
                None => Ok(Value::Null),
                Some(caps) => {
                    let dict = Dict::new(env.clone());
                    let whole = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
                    dict.insert_value("text", Value::Str(whole));
                    let groups: Vec<Value> = caps
                        .iter()
                        .skip(1)
                        .map(|g| match g {
                            Some(m) => Value::Str(m.as_str().to_string()),
                            None => Value::Null,
                        })
                        .collect();
                    dict.insert_value("groups", Value::Array(groups));
                    Ok(Value::Dict(dict))
                }
            }
        }
        "findAll" => {
            check_arity("findAll", 1, &args)?;
            let text = require_str("findAll", &args[0])?;
            Ok(Value::Array(
                r.compiled
                    .find_iter(&text)
                    .map(|m| Value::Str(m.as_str().to_string()))
                    .collect(),
            ))
        }
        "replace" => {
            check_arity("replace", 2, &args)?;
            let text = require_str("replace", &args[0])?;
            let replacement = require_str("replace", &args[1])?;
            Ok(Value::Str(
                r.compiled.replace_all(&text, replacement.as_str()).into_owned(),
            ))
        }
        "split" => {
            check_arity("split", 1, &args)?;
            let text = require_str("split", &args[0])?;
            Ok(Value::Array(
                r.compiled
                    .split(&text)
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
            ))
        }
        _ => Err(unknown("regex", method, REGEX_METHODS)),
    }
}

// Paths

const PATH_METHODS: &[&str] = &[
    "string", "exists", "join", "parent", "name", "ext", "isAbsolute",
];

fn path_method(
    ev: &Evaluator,
    p: &PathValue,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let path = Path::new(&p.raw);
    match method {
        "string" => {
            check_arity("string", 0, &args)?;
            Ok(Value::Str(p.raw.clone()))
        }
        "exists" => {
            check_arity("exists", 0, &args)?;
            ev.check_access(path, Access::Read)?;
            Ok(Value::Bool(path.exists()))
        }
        "join" => {
            check_arity("join", 1, &args)?;
            let part = require_str("join", &args[0])?;
            let joined: PathBuf = path.join(part);
            Ok(Value::Path(PathValue::new(joined.to_string_lossy().into_owned())))
        }
        "parent" => {
            check_arity("parent", 0, &args)?;
            Ok(path
                .parent()
                .map(|p| Value::Path(PathValue::new(p.to_string_lossy().into_owned())))
                .unwrap_or(Value::Null))
        }
        "name" => {
            check_arity("name", 0, &args)?;
            Ok(path
                .file_name()
                .map(|n| Value::Str(n.to_string_lossy().into_owned()))
                .unwrap_or(Value::Null))
        }
        "ext" => {
            check_arity("ext", 0, &args)?;
            Ok(path
                .extension()
                .map(|e| Value::Str(e.to_string_lossy().into_owned()))
                .unwrap_or(Value::Null))
        }
        "isAbsolute" => {
            check_arity("isAbsolute", 0, &args)?;
            Ok(Value::Bool(path.is_absolute()))
        }
        _ => Err(unknown("path", method, PATH_METHODS)),
    }
}

// URLs

const URL_METHODS: &[&str] = &[
    "scheme", "host", "port", "path", "query", "fragment", "string",
];

fn url_method(u: &UrlValue, method: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    if URL_METHODS.contains(&method) {
        check_arity(method, 0, &args)?;
    }
    match method {
        "scheme" => Ok(Value::Str(u.scheme.clone())),
        "host" => Ok(Value::Str(u.host.clone())),
        "port" => Ok(u.port.map(|p| Value::Int(p as i64)).unwrap_or(Value::Null)),
        "path" => Ok(Value::Str(u.path.clone())),
        "query" => Ok(u.query.clone().map(Value::Str).unwrap_or(Value::Null)),
        "fragment" => Ok(u.fragment.clone().map(Value::Str).unwrap_or(Value::Null)),
        "string" => Ok(Value::Str(u.format())),
        _ => Err(unknown("url", method, URL_METHODS)),
    }
}

// Commands

const COMMAND_METHODS: &[&str] = &["run", "program", "args", "withEnv", "string"];

fn command_method(
    ev: &Evaluator,
    env: &Environment,
    c: &CommandValue,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match method {
        // run() or run(stdinText); the execute gate applies here, not at
        // handle construction
        "run" => {
            let input = match args.len() {
                0 => None,
                1 => Some(require_str("run", &args[0])?),
                n => return Err(RuntimeError::arity_mismatch("run", 1, n)),
            };
            crate::interpreter::builtins::run_command(ev, env, c, input.as_deref())
        }
        "program" => {
            check_arity("program", 0, &args)?;
            Ok(Value::Str(c.program.clone()))
        }
        "args" => {
            check_arity("args", 0, &args)?;
            Ok(Value::Array(
                c.args.iter().cloned().map(Value::Str).collect(),
            ))
        }
        "withEnv" => {
            check_arity("withEnv", 1, &args)?;
            let Value::Dict(vars) = &args[0] else {
                return Err(RuntimeError::type_mismatch("dict", args[0].type_name()));
            };
            let mut out = c.clone();
            for key in vars.keys() {
                let value = ev.dict_get(vars, &key)?;
                out.env.push((key, require_str("withEnv", &value)?));
            }
            Ok(Value::Command(out))
        }
        "string" => {
            check_arity("string", 0, &args)?;
            Ok(Value::Str(c.format()))
        }
        _ => Err(unknown("command", method, COMMAND_METHODS)),
    }
}

// Records and schemas

const RECORD_METHODS: &[&str] = &["toDict", "schemaName"];

fn record_method(
    env: &Environment,
    r: &Record,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match method {
        "toDict" => {
            check_arity("toDict", 0, &args)?;
            let dict = Dict::new(env.clone());
            for (key, value) in r.fields.iter() {
                dict.insert_value(key.clone(), value.clone());
            }
            Ok(Value::Dict(dict))
        }
        "schemaName" => {
            check_arity("schemaName", 0, &args)?;
            Ok(Value::Str(r.schema.name.clone()))
        }
        _ => Err(unknown("record", method, RECORD_METHODS)),
    }
}

const SCHEMA_METHODS: &[&str] = &["validate", "name", "fields"];

fn schema_method(
    ev: &Evaluator,
    env: &Environment,
    receiver: &Value,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let Value::Schema(schema) = receiver else {
        return Err(unknown("schema", method, SCHEMA_METHODS));
    };
    match method {
        // non-throwing validation: returns {valid, errors}
        "validate" => {
            check_arity("validate", 1, &args)?;
            let Value::Dict(dict) = &args[0] else {
                return Err(RuntimeError::type_mismatch("dict", args[0].type_name()));
            };
            let input = ev.force_dict(dict)?;
            let report = Dict::new(env.clone());
            match schema.validate(&input) {
                Ok(_) => {
                    report.insert_value("valid", Value::Bool(true));
                    report.insert_value("errors", Value::Array(Vec::new()));
                }
                Err(errors) => {
                    report.insert_value("valid", Value::Bool(false));
                    report.insert_value(
                        "errors",
                        Value::Array(errors.into_iter().map(Value::Str).collect()),
                    );
                }
            }
            Ok(Value::Dict(report))
        }
        "name" => {
            check_arity("name", 0, &args)?;
            Ok(Value::Str(schema.name.clone()))
        }
        "fields" => {
            check_arity("fields", 0, &args)?;
            Ok(Value::Array(
                schema.fields.keys().cloned().map(Value::Str).collect(),
            ))
        }
        _ => Err(unknown("schema", method, SCHEMA_METHODS)),
    }
}

// Tables

const TABLE_METHODS: &[&str] = &[
    "where", "orderBy", "select", "limit", "offset", "count", "first", "last", "appendRow",
    "appendCol", "rows", "reverse",
];

fn table_column(table: &Table, name: &str) -> Result<usize, RuntimeError> {
    table.column_index(name).ok_or_else(|| {
        let known: Vec<String> = table.columns().to_vec();
        RuntimeError::unknown_method("table column", name, &known)
    })
}

fn table_method(
    ev: &Evaluator,
    env: &Environment,
    table: &Table,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match method {
        "where" => {
            check_arity("where", 2, &args)?;
            let col = table_column(table, &require_str("where", &args[0])?)?;
            let mut rows = Vec::new();
            for row in table.rows() {
                if ev.values_equal(&row[col], &args[1])? {
                    rows.push(row.clone());
                }
            }
            Ok(Value::Table(table.with_rows(rows)))
        }
        "orderBy" => {
            if args.is_empty() || args.len() > 2 {
                return Err(RuntimeError::arity_mismatch("orderBy", 2, args.len()));
            }
            let col = table_column(table, &require_str("orderBy", &args[0])?)?;
            let descending = match args.get(1) {
                Some(Value::Str(dir)) if dir == "desc" => true,
                Some(Value::Str(dir)) if dir == "asc" => false,
                None => false,
                Some(other) => {
                    return Err(RuntimeError::type_mismatch(
                        "\"asc\" or \"desc\"",
                        other.type_name(),
                    ));
                }
            };
            let mut rows = table.rows().to_vec();
            rows.sort_by(|a, b| {
                compare_values(&a[col], &b[col]).unwrap_or(std::cmp::Ordering::Equal)
            });
            if descending {
                rows.reverse();
            }
            Ok(Value::Table(table.with_rows(rows)))
        }
        "select" => {
            check_arity("select", 1, &args)?;
            let Value::Array(wanted) = &args[0] else {
                return Err(RuntimeError::type_mismatch("array", args[0].type_name()));
            };
            let mut indices = Vec::with_capacity(wanted.len());
            let mut columns = Vec::with_capacity(wanted.len());
            for want in wanted {
                let name = require_str("select", want)?;
                indices.push(table_column(table, &name)?);
                columns.push(name);
            }
            let rows: Vec<Vec<Value>> = table
                .rows()
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect();
            Ok(Value::Table(Table::new(columns, rows)))
        }
        "limit" => {
            check_arity("limit", 1, &args)?;
            let n = require_int("limit", &args[0])?.max(0) as usize;
            Ok(Value::Table(
                table.with_rows(table.rows().iter().take(n).cloned().collect()),
            ))
        }
        "offset" => {
            check_arity("offset", 1, &args)?;
            let n = require_int("offset", &args[0])?.max(0) as usize;
            Ok(Value::Table(
                table.with_rows(table.rows().iter().skip(n).cloned().collect()),
            ))
        }
        "count" => {
            check_arity("count", 0, &args)?;
            Ok(Value::Int(table.len() as i64))
        }
        "first" => {
            check_arity("first", 0, &args)?;
            Ok(table.row_dict(0, env).map(Value::Dict).unwrap_or(Value::Null))
        }
        "last" => {
            check_arity("last", 0, &args)?;
            if table.is_empty() {
                return Ok(Value::Null);
            }
            Ok(table
                .row_dict(table.len() - 1, env)
                .map(Value::Dict)
                .unwrap_or(Value::Null))
        }
        "appendRow" => {
            check_arity("appendRow", 1, &args)?;
            let Value::Dict(dict) = &args[0] else {
                return Err(RuntimeError::type_mismatch("dict", args[0].type_name()));
            };
            let mut cells = Vec::with_capacity(table.columns().len());
            for column in table.columns() {
                cells.push(ev.dict_get(dict, column)?);
            }
            let mut rows = table.rows().to_vec();
            rows.push(cells);
            Ok(Value::Table(table.with_rows(rows)))
        }
        "appendCol" => {
            check_arity("appendCol", 2, &args)?;
            let name = require_str("appendCol", &args[0])?;
            let Value::Array(values) = &args[1] else {
                return Err(RuntimeError::type_mismatch("array", args[1].type_name()));
            };
            if values.len() != table.len() {
                return Err(RuntimeError::new(
                    ErrorClass::Value,
                    "VAL-0022",
                    format!(
                        "column has {} values but the table has {} rows",
                        values.len(),
                        table.len()
                    ),
                ));
            }
            let mut columns = table.columns().to_vec();
            columns.push(name);
            let rows: Vec<Vec<Value>> = table
                .rows()
                .iter()
                .zip(values)
                .map(|(row, extra)| {
                    let mut row = row.clone();
                    row.push(extra.clone());
                    row
                })
                .collect();
            Ok(Value::Table(Table::new(columns, rows)))
        }
        "rows" => {
            check_arity("rows", 0, &args)?;
            let rows: Vec<Value> = (0..table.len())
                .filter_map(|i| table.row_dict(i, env).map(Value::Dict))
                .collect();
            Ok(Value::Array(rows))
        }
        "reverse" => {
            check_arity("reverse", 0, &args)?;
            let mut rows = table.rows().to_vec();
            rows.reverse();
            Ok(Value::Table(table.with_rows(rows)))
        }
        _ => Err(unknown("table", method, TABLE_METHODS)),
    }
}

// Database bindings

const BINDING_METHODS: &[&str] = &[
    "insert", "update", "save", "delete", "find", "findBy", "where", "orderBy", "limit",
    "offset", "select", "all", "count", "sum", "avg", "min", "max", "first", "last", "exists",
    "toSQL",
];

/// Coerce an argument to a record of the binding's schema. Dictionaries are
/// validated first; records must come from the same schema; any other value
/// is treated as a primary-key lookup.
fn binding_record(
    ev: &Evaluator,
    binding: &TableBinding,
    value: &Value,
) -> Result<Record, RuntimeError> {
    match value {
        Value::Record(record) => {
            if record.schema.id != binding.schema().id {
                return Err(RuntimeError::new(
                    ErrorClass::Value,
                    "VAL-0023",
                    format!(
                        "record of schema {} does not match binding schema {}",
                        record.schema.name,
                        binding.schema().name
                    ),
                ));
            }
            Ok(record.clone())
        }
        Value::Dict(dict) => {
            let input = ev.force_dict(dict)?;
            binding.schema().validate(&input).map_err(|errors| {
                RuntimeError::new(
                    ErrorClass::Value,
                    "VAL-0020",
                    format!(
                        "{} validation failed: {}",
                        binding.schema().name,
                        errors.join("; ")
                    ),
                )
            })
        }
        other => {
            let pk = binding.schema().pk.clone();
            let shown = ev.inspect_value(other)?;
            let narrowed = binding.filtered(&pk, other.clone())?.limited(1);
            let row = narrowed
                .run_query(&narrowed.select_query("*"))?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    RuntimeError::db(
                        "DB-0002",
                        format!("no {} row with {} = {}", binding.table(), pk, shown),
                    )
                })?;
            let input: IndexMap<String, Value> = row.into_iter().collect();
            binding.schema().validate(&input).map_err(|errors| {
                RuntimeError::db(
                    "DB-0005",
                    format!(
                        "row does not match schema {}: {}",
                        binding.schema().name,
                        errors.join("; ")
                    ),
                )
            })
        }
    }
}

/// `{sql, params}` dictionary handed back by `toSQL`
fn query_preview(env: &Environment, query: Query) -> Value {
    let dict = Dict::new(env.clone());
    dict.insert_value("sql", Value::Str(query.sql));
    dict.insert_value("params", Value::Array(query.params));
    Value::Dict(dict)
}

fn rows_to_records(
    binding: &TableBinding,
    rows: Vec<Vec<(String, Value)>>,
) -> Result<Vec<Value>, RuntimeError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let input: IndexMap<String, Value> = row.into_iter().collect();
        let record = binding.schema().validate(&input).map_err(|errors| {
            RuntimeError::db(
                "DB-0005",
                format!(
                    "row does not match schema {}: {}",
                    binding.schema().name,
                    errors.join("; ")
                ),
            )
        })?;
        out.push(Value::Record(record));
    }
    Ok(out)
}

fn binding_method(
    ev: &Evaluator,
    env: &Environment,
    binding: &TableBinding,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match method {
        "insert" => {
            check_arity("insert", 1, &args)?;
            let record = binding_record(ev, binding, &args[0])?;
            let query = binding.insert_query(&record);
            binding.run_execute(&query)?;
            Ok(Value::Record(record))
        }
        "update" => {
            check_arity("update", 1, &args)?;
            let record = binding_record(ev, binding, &args[0])?;
            let query = binding.update_query(&record)?;
            binding.run_execute(&query)?;
            Ok(Value::Record(record))
        }
        // save inserts when the record has no primary key, updates otherwise
        "save" => {
            check_arity("save", 1, &args)?;
            let record = binding_record(ev, binding, &args[0])?;
            let query = match record.pk_value().filter(|v| *v != Value::Null) {
                Some(_) => binding.update_query(&record)?,
                None => binding.insert_query(&record),
            };
            binding.run_execute(&query)?;
            Ok(Value::Record(record))
        }
        "delete" => {
            check_arity("delete", 1, &args)?;
            let record = binding_record(ev, binding, &args[0])?;
            let query = binding.delete_query(&record)?;
            Ok(Value::Int(binding.run_execute(&query)? as i64))
        }
        "find" => {
            check_arity("find", 1, &args)?;
            let pk = binding.schema().pk.clone();
            let narrowed = binding.filtered(&pk, args[0].clone())?.limited(1);
            let rows = narrowed.run_query(&narrowed.select_query("*"))?;
            Ok(rows_to_records(binding, rows)?.into_iter().next().unwrap_or(Value::Null))
        }
        "findBy" => {
            check_arity("findBy", 2, &args)?;
            let column = require_str("findBy", &args[0])?;
            let narrowed = binding.filtered(&column, args[1].clone())?.limited(1);
            let rows = narrowed.run_query(&narrowed.select_query("*"))?;
            Ok(rows_to_records(binding, rows)?.into_iter().next().unwrap_or(Value::Null))
        }
        "where" => {
            check_arity("where", 2, &args)?;
            let column = require_str("where", &args[0])?;
            Ok(Value::TableBinding(
                binding.filtered(&column, args[1].clone())?,
            ))
        }
        "orderBy" => {
            if args.is_empty() || args.len() > 2 {
                return Err(RuntimeError::arity_mismatch("orderBy", 2, args.len()));
            }
            let column = require_str("orderBy", &args[0])?;
            let descending = matches!(args.get(1), Some(Value::Str(d)) if d == "desc");
            Ok(Value::TableBinding(binding.ordered(&column, descending)?))
        }
        "limit" => {
            check_arity("limit", 1, &args)?;
            let n = require_int("limit", &args[0])?.max(0) as u64;
            Ok(Value::TableBinding(binding.limited(n)))
        }
        "offset" => {
            check_arity("offset", 1, &args)?;
            let n = require_int("offset", &args[0])?.max(0) as u64;
            Ok(Value::TableBinding(binding.offset(n)))
        }
        "select" => {
            check_arity("select", 1, &args)?;
            let columns = match &args[0] {
                Value::Array(items) => items
                    .iter()
                    .map(|item| require_str("select", item))
                    .collect::<Result<Vec<String>, RuntimeError>>()?,
                other => {
                    return Err(RuntimeError::type_mismatch("array", other.type_name())
                        .with_hint("select takes an array of column names"));
                }
            };
            Ok(Value::TableBinding(binding.selected(&columns)?))
        }
        "all" => {
            check_arity("all", 0, &args)?;
            let rows = binding.run_query(&binding.select_query("*"))?;
            Ok(Value::Array(rows_to_records(binding, rows)?))
        }
        "count" => {
            check_arity("count", 0, &args)?;
            binding.run_scalar(&binding.select_query("COUNT(*)"))
        }
        "sum" | "avg" | "min" | "max" => {
            check_arity(method, 1, &args)?;
            let column = require_str(method, &args[0])?;
            let func = method.to_uppercase();
            binding.run_scalar(&binding.aggregate_query(&func, &column)?)
        }
        // first([column[, dir]]): an explicit column overrides any
        // accumulated ordering for this read only
        "first" => {
            let narrowed = match args.len() {
                0 => binding.clone(),
                1 | 2 => {
                    let column = require_str("first", &args[0])?;
                    let descending = matches!(args.get(1), Some(Value::Str(d)) if d == "desc");
                    binding.reordered(&column, descending)?
                }
                n => return Err(RuntimeError::arity_mismatch("first", 2, n)),
            }
            .limited(1);
            let rows = narrowed.run_query(&narrowed.select_query("*"))?;
            Ok(rows_to_records(binding, rows)?.into_iter().next().unwrap_or(Value::Null))
        }
        // last([column[, dir]]): first() from the far end; the effective
        // ordering is reversed, defaulting to primary key descending
        "last" => {
            let narrowed = match args.len() {
                0 => binding.reversed(),
                1 | 2 => {
                    let column = require_str("last", &args[0])?;
                    let descending = matches!(args.get(1), Some(Value::Str(d)) if d == "desc");
                    binding.reordered(&column, descending)?.reversed()
                }
                n => return Err(RuntimeError::arity_mismatch("last", 2, n)),
            }
            .limited(1);
            let rows = narrowed.run_query(&narrowed.select_query("*"))?;
            Ok(rows_to_records(binding, rows)?.into_iter().next().unwrap_or(Value::Null))
        }
        "exists" => {
            check_arity("exists", 0, &args)?;
            let count = binding.run_scalar(&binding.select_query("COUNT(*)"))?;
            Ok(Value::Bool(matches!(count, Value::Int(n) if n > 0)))
        }
        // statement preview; toSQL() shows the select, toSQL("insert", x)
        // and friends show the write statement that would run. The result is
        // the {sql, params} pair execution would hand the connection.
        "toSQL" => match args.len() {
            0 => Ok(query_preview(env, binding.select_query("*"))),
            2 => {
                let op = require_str("toSQL", &args[0])?;
                let record = binding_record(ev, binding, &args[1])?;
                let query = match op.as_str() {
                    "insert" => binding.insert_query(&record),
                    "update" => binding.update_query(&record)?,
                    "delete" => binding.delete_query(&record)?,
                    other => {
                        return Err(RuntimeError::new(
                            ErrorClass::Value,
                            "VAL-0024",
                            format!("unknown toSQL operation '{}'", other),
                        ));
                    }
                };
                Ok(query_preview(env, query))
            }
            n => Err(RuntimeError::arity_mismatch("toSQL", 2, n)),
        },
        _ => Err(unknown("binding", method, BINDING_METHODS)),
    }
}
