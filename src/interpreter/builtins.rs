//! Native functions exposed to scripts.
//!
//! Builtins resolve by name after the lexical environment misses, so scripts
//! can shadow any of them. File and process builtins consult the security
//! policy before touching the system; capability-backed builtins degrade to
//! a defined fallback when the host provides no capability.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::interpreter::datetime::Datetime;
use crate::interpreter::environment::Environment;
use crate::interpreter::error::{check_arity, ErrorClass, RuntimeError};
use crate::interpreter::schema::{FieldDef, Schema};
use crate::interpreter::security::Access;
use crate::interpreter::sql::TableBinding;
use crate::interpreter::value::{Builtin, CommandValue, Dict, Table, Value};
use crate::interpreter::Evaluator;

macro_rules! builtin_table {
    ($(($name:literal, $func:ident)),* $(,)?) => {
        static BUILTINS: &[Builtin] = &[
            $(Builtin { name: $name, func: $func }),*
        ];
    };
}

builtin_table![
    ("len", builtin_len),
    ("type", builtin_type),
    ("inspect", builtin_inspect),
    ("log", builtin_log),
    ("logLine", builtin_log_line),
    ("print", builtin_log),
    ("println", builtin_log_line),
    ("range", builtin_range),
    ("abs", builtin_abs),
    ("min", builtin_min),
    ("max", builtin_max),
    ("now", builtin_now),
    ("jsonEncode", builtin_json_encode),
    ("jsonDecode", builtin_json_decode),
    ("fail", builtin_fail),
    ("fileRead", builtin_file_read),
    ("fileWrite", builtin_file_write),
    ("fileList", builtin_file_list),
    ("cmd", builtin_cmd),
    ("shell", builtin_shell),
    ("publicUrl", builtin_public_url),
    ("devLog", builtin_dev_log),
    ("devLogClear", builtin_dev_log_clear),
    ("schema", builtin_schema),
    ("bind", builtin_bind),
    ("table", builtin_table_ctor),
];

pub fn lookup(name: &str) -> Option<Builtin> {
    BUILTINS.iter().find(|b| b.name == name).copied()
}

pub fn names() -> Vec<&'static str> {
    BUILTINS.iter().map(|b| b.name).collect()
}

/// Built-in `std/` modules, materialized fresh per import
pub fn std_module(name: &str, env: &Environment) -> Result<Value, RuntimeError> {
    match name {
        "math" => {
            let dict = Dict::new(env.clone());
            dict.insert_value("pi", Value::Float(std::f64::consts::PI));
            dict.insert_value("e", Value::Float(std::f64::consts::E));
            dict.insert_value("floor", Value::Builtin(Builtin { name: "floor", func: math_floor }));
            dict.insert_value("ceil", Value::Builtin(Builtin { name: "ceil", func: math_ceil }));
            dict.insert_value("round", Value::Builtin(Builtin { name: "round", func: math_round }));
            dict.insert_value("sqrt", Value::Builtin(Builtin { name: "sqrt", func: math_sqrt }));
            dict.insert_value("pow", Value::Builtin(Builtin { name: "pow", func: math_pow }));
            Ok(Value::Dict(dict))
        }
        other => Err(RuntimeError::import_failed(
            &format!("std/{}", other),
            "unknown standard module",
        )),
    }
}

fn as_float(name: &str, value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(RuntimeError::type_mismatch("number", other.type_name())
            .with_hint(format!("{} works on ints and floats", name))),
    }
}

fn math_floor(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("floor", 1, &args)?;
    Ok(Value::Int(as_float("floor", &args[0])?.floor() as i64))
}

fn math_ceil(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("ceil", 1, &args)?;
    Ok(Value::Int(as_float("ceil", &args[0])?.ceil() as i64))
}

fn math_round(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("round", 1, &args)?;
    Ok(Value::Int(as_float("round", &args[0])?.round() as i64))
}

fn math_sqrt(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("sqrt", 1, &args)?;
    Ok(Value::Float(as_float("sqrt", &args[0])?.sqrt()))
}

fn math_pow(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("pow", 2, &args)?;
    Ok(Value::Float(
        as_float("pow", &args[0])?.powf(as_float("pow", &args[1])?),
    ))
}

// Core builtins

fn builtin_len(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("len", 1, &args)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Dict(dict) => dict.len(),
        Value::Table(table) => table.len(),
        other => return Err(RuntimeError::type_mismatch("string, array, dict, or table", other.type_name())),
    };
    Ok(Value::Int(n as i64))
}

fn builtin_type(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("type", 1, &args)?;
    Ok(Value::Str(args[0].type_name().to_string()))
}

fn builtin_inspect(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    check_arity("inspect", 1, &args)?;
    Ok(Value::Str(ev.inspect_value(&args[0])?))
}

fn format_args(ev: &Evaluator, args: &[Value]) -> Result<String, RuntimeError> {
    let parts: Result<Vec<String>, RuntimeError> =
        args.iter().map(|v| ev.format_value(v)).collect();
    Ok(parts?.join(" "))
}

fn builtin_log(ev: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    ev.capabilities().logger.log(&format_args(ev, &args)?);
    Ok(Value::Null)
}

fn builtin_log_line(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    ev.capabilities().logger.log_line(&format_args(ev, &args)?);
    Ok(Value::Null)
}

fn builtin_range(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let (start, end) = match args.len() {
        1 => (0, require_int("range", &args[0])?),
        2 => (require_int("range", &args[0])?, require_int("range", &args[1])?),
        n => return Err(RuntimeError::arity_mismatch("range", 2, n)),
    };
    Ok(Value::Array((start..end).map(Value::Int).collect()))
}

fn require_int(name: &str, value: &Value) -> Result<i64, RuntimeError> {
    value.as_int().ok_or_else(|| {
        RuntimeError::type_mismatch("int", value.type_name())
            .with_hint(format!("{} takes integer arguments", name))
    })
}

fn builtin_abs(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("abs", 1, &args)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(n.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Money(m) => Ok(Value::Money(m.abs())),
        other => Err(RuntimeError::type_mismatch("number or money", other.type_name())),
    }
}

fn extreme(
    name: &str,
    args: Vec<Value>,
    keep_left: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, RuntimeError> {
    let items = match args.len() {
        0 => return Err(RuntimeError::arity_mismatch(name, 1, 0)),
        1 => match args.into_iter().next() {
            Some(Value::Array(items)) => items,
            Some(single) => return Ok(single),
            None => unreachable!(),
        },
        _ => args,
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| RuntimeError::user_failure(format!("{} of an empty array", name)))?;
    for item in iter {
        let ord = crate::interpreter::value::compare_values(&best, &item).ok_or_else(|| {
            RuntimeError::invalid_operands(name, best.type_name(), item.type_name())
        })?;
        if !keep_left(ord) {
            best = item;
        }
    }
    Ok(best)
}

fn builtin_min(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    extreme("min", args, |ord| ord.is_le())
}

fn builtin_max(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    extreme("max", args, |ord| ord.is_ge())
}

fn builtin_now(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("now", 0, &args)?;
    Ok(Value::Datetime(Datetime::now()))
}

// JSON

fn builtin_json_encode(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    check_arity("jsonEncode", 1, &args)?;
    let json = value_to_json(ev, &args[0])?;
    serde_json::to_string(&json)
        .map(Value::Str)
        .map_err(|e| RuntimeError::new(ErrorClass::Value, "FMT-0001", e.to_string()))
}

fn builtin_json_decode(
    _: &Evaluator,
    env: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    check_arity("jsonDecode", 1, &args)?;
    let Value::Str(text) = &args[0] else {
        return Err(RuntimeError::type_mismatch("string", args[0].type_name()));
    };
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        RuntimeError::new(ErrorClass::Value, "FMT-0002", format!("invalid JSON: {}", e))
    })?;
    Ok(json_to_value(&json, env))
}

/// Script value to JSON, forcing dictionary entries. Values without a JSON
/// shape render as their literal form.
pub fn value_to_json(ev: &Evaluator, value: &Value) -> Result<serde_json::Value, RuntimeError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(n) => serde_json::json!(n),
        Value::Float(f) => serde_json::json!(f),
        Value::Bool(b) => serde_json::json!(b),
        Value::Str(s) => serde_json::json!(s),
        Value::Array(items) => {
            let encoded: Result<Vec<serde_json::Value>, RuntimeError> =
                items.iter().map(|v| value_to_json(ev, v)).collect();
            serde_json::Value::Array(encoded?)
        }
        Value::Dict(dict) => {
            let mut map = serde_json::Map::new();
            for key in dict.keys() {
                let entry = ev.dict_get(dict, &key)?;
                map.insert(key, value_to_json(ev, &entry)?);
            }
            serde_json::Value::Object(map)
        }
        Value::Record(record) => {
            let mut map = serde_json::Map::new();
            for (key, entry) in record.fields.iter() {
                map.insert(key.clone(), value_to_json(ev, entry)?);
            }
            serde_json::Value::Object(map)
        }
        other => serde_json::json!(ev.inspect_value(other)?),
    })
}

pub fn json_to_value(json: &serde_json::Value, env: &Environment) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(|v| json_to_value(v, env)).collect())
        }
        serde_json::Value::Object(map) => {
            let dict = Dict::new(env.clone());
            for (key, val) in map {
                dict.insert_value(key.clone(), json_to_value(val, env));
            }
            Value::Dict(dict)
        }
    }
}

// Failure

fn builtin_fail(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("fail", 1, &args)?;
    match &args[0] {
        Value::Str(message) => Err(RuntimeError::user_failure(message.clone())),
        other => Err(RuntimeError::fail_requires_string(other.type_name())),
    }
}

// Filesystem, gated by the security policy

fn arg_path(name: &str, value: &Value) -> Result<std::path::PathBuf, RuntimeError> {
    match value {
        Value::Path(p) => Ok(std::path::PathBuf::from(&p.raw)),
        Value::Str(s) => Ok(std::path::PathBuf::from(s)),
        other => Err(RuntimeError::type_mismatch("path", other.type_name())
            .with_hint(format!("{} takes a path or string", name))),
    }
}

fn builtin_file_read(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    check_arity("fileRead", 1, &args)?;
    let path = arg_path("fileRead", &args[0])?;
    ev.check_access(&path, Access::Read)?;
    std::fs::read_to_string(&path)
        .map(Value::Str)
        .map_err(|e| RuntimeError::io(format!("cannot read '{}': {}", path.display(), e)))
}

fn builtin_file_write(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    check_arity("fileWrite", 2, &args)?;
    let path = arg_path("fileWrite", &args[0])?;
    let Value::Str(content) = &args[1] else {
        return Err(RuntimeError::type_mismatch("string", args[1].type_name()));
    };
    ev.check_access(&path, Access::Write)?;
    std::fs::write(&path, content)
        .map(|_| Value::Null)
        .map_err(|e| RuntimeError::io(format!("cannot write '{}': {}", path.display(), e)))
}

fn builtin_file_list(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    check_arity("fileList", 1, &args)?;
    let path = arg_path("fileList", &args[0])?;
    ev.check_access(&path, Access::Read)?;
    let entries = std::fs::read_dir(&path)
        .map_err(|e| RuntimeError::io(format!("cannot list '{}': {}", path.display(), e)))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| RuntimeError::io(format!("cannot list '{}': {}", path.display(), e)))?;
        names.push(Value::Str(entry.file_name().to_string_lossy().into_owned()));
    }
    names.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    Ok(Value::Array(names))
}

// Process execution, gated on the program path at run time

fn command_handle(name: &str, args: &[Value]) -> Result<CommandValue, RuntimeError> {
    if args.is_empty() {
        return Err(RuntimeError::arity_mismatch(name, 1, 0));
    }
    let Value::Str(program) = &args[0] else {
        return Err(RuntimeError::type_mismatch("string", args[0].type_name()));
    };
    let mut cmd_args = Vec::with_capacity(args.len() - 1);
    for arg in &args[1..] {
        let Value::Str(s) = arg else {
            return Err(RuntimeError::type_mismatch("string", arg.type_name()));
        };
        cmd_args.push(s.clone());
    }
    Ok(CommandValue::new(program.clone(), cmd_args))
}

/// `cmd(program, args...)` builds a handle; nothing runs until `.run()`
fn builtin_cmd(_: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    command_handle("cmd", &args).map(Value::Command)
}

/// `shell(program, args...)` builds a handle and runs it immediately
fn builtin_shell(
    ev: &Evaluator,
    env: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let command = command_handle("shell", &args)?;
    run_command(ev, env, &command, None)
}

/// Spawn a command handle synchronously and capture its output. Arguments
/// pass to the process verbatim; no shell interprets them.
pub(crate) fn run_command(
    ev: &Evaluator,
    env: &Environment,
    command: &CommandValue,
    input: Option<&str>,
) -> Result<Value, RuntimeError> {
    use std::io::Write;
    use std::process::Stdio;

    ev.check_access(Path::new(&command.program), Access::Execute)?;
    let mut process = std::process::Command::new(&command.program);
    process.args(&command.args);
    for (key, val) in &command.env {
        process.env(key, val);
    }
    let spawn_err =
        |e: std::io::Error| RuntimeError::io(format!("cannot run '{}': {}", command.program, e));
    let output = match input {
        Some(text) => {
            process
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            let mut child = process.spawn().map_err(spawn_err)?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes()).map_err(spawn_err)?;
            }
            child.wait_with_output().map_err(spawn_err)?
        }
        None => process.output().map_err(spawn_err)?,
    };
    let dict = Dict::new(env.clone());
    dict.insert_value(
        "stdout",
        Value::Str(String::from_utf8_lossy(&output.stdout).into_owned()),
    );
    dict.insert_value(
        "stderr",
        Value::Str(String::from_utf8_lossy(&output.stderr).into_owned()),
    );
    dict.insert_value(
        "exitCode",
        Value::Int(output.status.code().unwrap_or(-1) as i64),
    );
    Ok(Value::Dict(dict))
}

// Capability-backed builtins

fn builtin_public_url(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    check_arity("publicUrl", 1, &args)?;
    let path = match &args[0] {
        Value::Str(s) => s.clone(),
        Value::Path(p) => p.raw.clone(),
        other => return Err(RuntimeError::type_mismatch("path", other.type_name())),
    };
    let registrar = ev.capabilities().assets.as_ref().ok_or_else(|| {
        RuntimeError::user_failure("no asset registrar available in this context")
    })?;
    registrar
        .public_url(&path)
        .map(Value::Str)
        .ok_or_else(|| RuntimeError::user_failure(format!("no public URL for '{}'", path)))
}

/// Extract the level from a trailing `{level: ...}` options dictionary;
/// None means the value is not an options dictionary at all
fn dev_log_level(ev: &Evaluator, value: &Value) -> Result<Option<String>, RuntimeError> {
    let Value::Dict(dict) = value else {
        return Ok(None);
    };
    if !dict.has("level") {
        return Ok(None);
    }
    match ev.dict_get(dict, "level")? {
        Value::Str(level) => Ok(Some(level)),
        _ => Ok(Some("info".to_string())),
    }
}

/// devLog(value), devLog(label, value), either with a trailing
/// {level: "..."} options dictionary. No-op without a writer.
fn builtin_dev_log(
    ev: &Evaluator,
    env: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let Some(dev_log) = ev.capabilities().dev_log.clone() else {
        return Ok(Value::Null);
    };
    let mut level = "info".to_string();
    let (label, value) = match args.len() {
        1 => (None, &args[0]),
        2 => match dev_log_level(ev, &args[1])? {
            Some(l) => {
                level = l;
                (None, &args[0])
            }
            None => (Some(ev.format_value(&args[0])?), &args[1]),
        },
        3 => {
            if let Some(l) = dev_log_level(ev, &args[2])? {
                level = l;
            }
            (Some(ev.format_value(&args[0])?), &args[1])
        }
        n => return Err(RuntimeError::arity_mismatch("devLog", 1, n)),
    };
    let call = match &label {
        Some(label) => format!("devLog({})", label),
        None => "devLog".to_string(),
    };
    let filename = env
        .filename()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    dev_log.log(
        &ev.dev_route(),
        &level,
        &filename,
        ev.call_site().line,
        &call,
        &ev.inspect_value(value)?,
    );
    Ok(Value::Null)
}

/// devLogClear([route]); defaults to the evaluation's own route
fn builtin_dev_log_clear(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let route = match args.as_slice() {
        [] => ev.dev_route(),
        [Value::Str(route)] => route.clone(),
        [other] => return Err(RuntimeError::type_mismatch("string", other.type_name())),
        _ => return Err(RuntimeError::arity_mismatch("devLogClear", 1, args.len())),
    };
    if let Some(dev_log) = &ev.capabilities().dev_log {
        dev_log.clear(&route);
    }
    Ok(Value::Null)
}

// Schemas, bindings, tables

fn builtin_schema(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    check_arity("schema", 2, &args)?;
    let Value::Str(name) = &args[0] else {
        return Err(RuntimeError::type_mismatch("string", args[0].type_name()));
    };
    let Value::Dict(fields_dict) = &args[1] else {
        return Err(RuntimeError::type_mismatch("dict", args[1].type_name()));
    };
    let mut fields = IndexMap::new();
    for key in fields_dict.keys() {
        let def = match ev.dict_get(fields_dict, &key)? {
            // shorthand: field: "type"
            Value::Str(type_name) => FieldDef::of_type(type_name),
            Value::Dict(spec) => {
                let forced = ev.force_dict(&spec)?;
                let type_name = match forced.get("type") {
                    Some(Value::Str(t)) => t.clone(),
                    Some(other) => {
                        return Err(RuntimeError::type_mismatch("string", other.type_name()));
                    }
                    None => {
                        return Err(RuntimeError::new(
                            ErrorClass::Value,
                            "VAL-0021",
                            format!("field '{}' is missing a type", key),
                        ));
                    }
                };
                FieldDef {
                    type_name,
                    required: matches!(forced.get("required"), Some(Value::Bool(true))),
                    nullable: !matches!(forced.get("nullable"), Some(Value::Bool(false))),
                    default: forced.get("default").cloned(),
                    pk: matches!(forced.get("pk"), Some(Value::Bool(true))),
                }
            }
            other => {
                return Err(RuntimeError::type_mismatch(
                    "string or dict",
                    other.type_name(),
                ));
            }
        };
        fields.insert(key, def);
    }
    Ok(Value::Schema(Schema::new(name.clone(), fields)))
}

fn builtin_bind(ev: &Evaluator, _: &Environment, args: Vec<Value>) -> Result<Value, RuntimeError> {
    check_arity("bind", 2, &args)?;
    let Value::Schema(schema) = &args[0] else {
        return Err(RuntimeError::type_mismatch("schema", args[0].type_name()));
    };
    let Value::Str(table) = &args[1] else {
        return Err(RuntimeError::type_mismatch("string", args[1].type_name()));
    };
    let conn = ev
        .capabilities()
        .db
        .as_ref()
        .map(Arc::clone)
        .ok_or_else(|| RuntimeError::db("DB-0002", "no database connection in this context"))?;
    TableBinding::new(Arc::clone(schema), table, conn).map(Value::TableBinding)
}

fn builtin_table_ctor(
    ev: &Evaluator,
    _: &Environment,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    match args.len() {
        // table([{...}, {...}]) infers columns from the first row
        1 => {
            let Value::Array(rows_in) = &args[0] else {
                return Err(RuntimeError::type_mismatch("array", args[0].type_name()));
            };
            let mut columns: Vec<String> = Vec::new();
            let mut rows = Vec::with_capacity(rows_in.len());
            for row in rows_in {
                let Value::Dict(dict) = row else {
                    return Err(RuntimeError::type_mismatch("dict", row.type_name()));
                };
                if columns.is_empty() {
                    columns = dict.keys();
                }
                let mut cells = Vec::with_capacity(columns.len());
                for column in &columns {
                    cells.push(ev.dict_get(dict, column)?);
                }
                rows.push(cells);
            }
            Ok(Value::Table(Table::new(columns, rows)))
        }
        // table(["a", "b"], [[1, 2], [3, 4]])
        2 => {
            let Value::Array(column_vals) = &args[0] else {
                return Err(RuntimeError::type_mismatch("array", args[0].type_name()));
            };
            let Value::Array(row_vals) = &args[1] else {
                return Err(RuntimeError::type_mismatch("array", args[1].type_name()));
            };
            let mut columns = Vec::with_capacity(column_vals.len());
            for c in column_vals {
                match c {
                    Value::Str(s) => columns.push(s.clone()),
                    other => {
                        return Err(RuntimeError::type_mismatch("string", other.type_name()));
                    }
                }
            }
            let mut rows = Vec::with_capacity(row_vals.len());
            for row in row_vals {
                let Value::Array(cells) = row else {
                    return Err(RuntimeError::type_mismatch("array", row.type_name()));
                };
                if cells.len() != columns.len() {
                    return Err(RuntimeError::new(
                        ErrorClass::Value,
                        "VAL-0022",
                        format!(
                            "row has {} cells but the table has {} columns",
                            cells.len(),
                            columns.len()
                        ),
                    ));
                }
                rows.push(cells.clone());
            }
            Ok(Value::Table(Table::new(columns, rows)))
        }
        n => Err(RuntimeError::arity_mismatch("table", 2, n)),
    }
}
