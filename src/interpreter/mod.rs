//! Tree-walking evaluator.
//!
//! The evaluator owns the global environment, the host capability set, the
//! security policy, and a handle to the module cache. Evaluation methods take
//! the current lexical environment as a parameter so one evaluator can run
//! many scopes (closures, modules, loop bodies) concurrently.

pub mod builtins;
pub mod capabilities;
pub mod datetime;
pub mod environment;
pub mod error;
pub mod methods;
pub mod modules;
pub mod money;
pub mod regex;
pub mod schema;
pub mod security;
pub mod sql;
pub mod value;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::diagnostics::Position;
use crate::parser::ast::{
    Block, ElseBranch, Expr, ForBinding, ForBody, InfixOp, PrefixOp, Program, Stmt,
};

use capabilities::Capabilities;
use datetime::{Datetime, Duration};
use environment::Environment;
use error::{ErrorClass, RuntimeError, Signal};
use modules::ModuleCache;
use money::Money;
use regex::RegexValue;
use security::{Access, SecurityPolicy};
use value::{Dict, DictEntry, FunctionValue, PathValue, UrlValue, Value};

pub struct Evaluator {
    env: Environment,
    /// Dynamic context for host-provided values (@params); consulted only
    /// for @-prefixed names that miss the lexical chain
    context: Environment,
    capabilities: Capabilities,
    security: Arc<SecurityPolicy>,
    module_cache: Arc<ModuleCache>,
    /// Files currently being imported, for circular import detection
    import_stack: Mutex<Vec<PathBuf>>,
    /// Process-unique id identifying this evaluation to the module cache,
    /// so cycles split across evaluators are detected instead of deadlocking
    evaluation_id: u64,
    /// Position of the call currently being dispatched, read by
    /// position-aware builtins (devLog)
    call_site: Mutex<Position>,
    /// Route label attached to dev-log entries, set by the host
    dev_route: Mutex<String>,
}

static NEXT_EVALUATION_ID: AtomicU64 = AtomicU64::new(1);

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        let env = Environment::new();
        let evaluator = Self {
            env,
            context: Environment::new(),
            capabilities: Capabilities::default(),
            security: Arc::new(SecurityPolicy::default()),
            module_cache: ModuleCache::global(),
            import_stack: Mutex::new(Vec::new()),
            evaluation_id: NEXT_EVALUATION_ID.fetch_add(1, Ordering::Relaxed),
            call_site: Mutex::new(Position::default()),
            dev_route: Mutex::new(String::new()),
        };
        evaluator.install_host_bindings();
        evaluator
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_security(mut self, policy: SecurityPolicy) -> Self {
        self.security = Arc::new(policy);
        self
    }

    /// Swap in a private module cache (tests, isolated embeddings)
    pub fn with_module_cache(mut self, cache: Arc<ModuleCache>) -> Self {
        self.module_cache = cache;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn security(&self) -> &SecurityPolicy {
        &self.security
    }

    pub fn module_cache(&self) -> &Arc<ModuleCache> {
        &self.module_cache
    }

    /// Bind a host context value, visible as an @-name (e.g. @params)
    pub fn set_context_value(&self, name: &str, value: Value) {
        self.context.set(name, value);
    }

    /// Route label for dev-log entries produced by this evaluation
    pub fn set_dev_route(&self, route: &str) {
        *self.dev_route.lock().unwrap_or_else(|e| e.into_inner()) = route.to_string();
    }

    pub fn dev_route(&self) -> String {
        self.dev_route
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Position of the call being dispatched (0,0 outside any call)
    pub fn call_site(&self) -> Position {
        *self.call_site.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Host-provided script arguments, exposed as the protected @args array
    pub fn set_args(&self, args: Vec<String>) {
        self.env
            .set_protected("@args", Value::Array(args.into_iter().map(Value::Str).collect()));
    }

    fn install_host_bindings(&self) {
        let env_dict = Dict::new(self.env.clone());
        for (key, val) in std::env::vars() {
            env_dict.insert_value(key, Value::Str(val));
        }
        self.env.set_protected("@env", Value::Dict(env_dict));
        self.env.set_protected("@args", Value::Array(Vec::new()));
    }

    pub fn check_access(&self, path: &Path, access: Access) -> Result<(), RuntimeError> {
        self.security.check(path, access)
    }

    // Program and statement evaluation

    /// Evaluate a program in the global environment; a top-level `return`
    /// ends it early with the returned value.
    pub fn eval_program(&self, program: &Program) -> Result<Value, RuntimeError> {
        let mut last = Value::Null;
        for stmt in &program.statements {
            match self.eval_stmt(stmt, &self.env) {
                Ok(value) => last = value,
                Err(err) => match err.signal {
                    Some(Signal::Return(value)) => return Ok(value),
                    _ => return Err(err),
                },
            }
        }
        Ok(last)
    }

    /// Read, parse, and evaluate a file in the global environment
    pub fn run_file(&self, path: &Path) -> Result<Value, RuntimeError> {
        self.check_access(path, Access::Read)?;
        let source = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::io(format!("cannot read '{}': {}", path.display(), e)))?;
        self.env.set_filename(path);
        if self.env.root_path().is_none() {
            if let Some(parent) = path.parent() {
                self.env.set_root_path(parent);
            }
        }
        let program = crate::parser::parse_program(&source).map_err(|diags| {
            let first = diags.into_iter().next();
            let mut err = RuntimeError::bad_syntax(
                first
                    .as_ref()
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| "parse error".to_string()),
            );
            if let Some(d) = first {
                err = err.at(d.position);
            }
            err
        })?;
        self.eval_program(&program)
    }

    fn eval_stmt(&self, stmt: &Stmt, env: &Environment) -> Result<Value, RuntimeError> {
        match stmt {
            Stmt::Let {
                name,
                value,
                export,
                pos,
            } => {
                let value = self.eval_expr(value, env)?;
                env.declare(name, value, *export).map_err(|e| e.at(*pos))?;
                Ok(Value::Null)
            }
            Stmt::Assign { target, value, pos } => {
                let value = self.eval_expr(value, env)?;
                self.assign_target(target, value, env).map_err(|e| e.at(*pos))?;
                Ok(Value::Null)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                Err(RuntimeError::return_signal(value))
            }
            Stmt::Expr(expr) => self.eval_expr(expr, env),
        }
    }

    fn assign_target(
        &self,
        target: &Expr,
        value: Value,
        env: &Environment,
    ) -> Result<(), RuntimeError> {
        match target {
            Expr::Ident { name, .. } => env.assign(name, value),
            Expr::Member { receiver, name, .. } => {
                match self.eval_expr(receiver, env)? {
                    Value::Dict(dict) => {
                        dict.insert_value(name.clone(), value);
                        Ok(())
                    }
                    Value::Record(_) => Err(RuntimeError::new(
                        ErrorClass::Value,
                        "VAL-0011",
                        "records are immutable; validate a new dictionary instead",
                    )),
                    other => Err(RuntimeError::type_mismatch("dict", other.type_name())),
                }
            }
            Expr::Index {
                receiver, index, ..
            } => {
                let idx = self.eval_expr(index, env)?;
                match (self.eval_expr(receiver, env)?, idx) {
                    (Value::Dict(dict), Value::Str(key)) => {
                        dict.insert_value(key, value);
                        Ok(())
                    }
                    (Value::Array(mut items), Value::Int(i)) => {
                        // arrays copy on assignment, so only plain variables
                        // can be updated in place
                        let Expr::Ident { name, .. } = receiver.as_ref() else {
                            return Err(RuntimeError::new(
                                ErrorClass::Value,
                                "VAL-0012",
                                "cannot assign into a temporary array",
                            ));
                        };
                        let len = items.len() as i64;
                        if i < 0 || i >= len {
                            return Err(RuntimeError::new(
                                ErrorClass::Value,
                                "VAL-0013",
                                format!("index {} out of bounds for array of length {}", i, len),
                            ));
                        }
                        items[i as usize] = value;
                        env.assign(name, Value::Array(items))
                    }
                    (other, _) => Err(RuntimeError::type_mismatch(
                        "dict or array",
                        other.type_name(),
                    )),
                }
            }
            other => Err(RuntimeError::new(
                ErrorClass::Value,
                "VAL-0014",
                "left side of '=' must be a variable, member, or index",
            )
            .at(other.pos())),
        }
    }

    /// Evaluate a block in its own child scope; the value is the last
    /// statement's value
    pub fn eval_block(&self, block: &Block, env: &Environment) -> Result<Value, RuntimeError> {
        let scope = Environment::enclosed(env);
        let mut last = Value::Null;
        for stmt in &block.statements {
            last = self.eval_stmt(stmt, &scope)?;
        }
        Ok(last)
    }

    // Expression evaluation

    pub fn eval_expr(&self, expr: &Expr, env: &Environment) -> Result<Value, RuntimeError> {
        match expr {
            Expr::IntLit { value, .. } => Ok(Value::Int(*value)),
            Expr::FloatLit { value, .. } => Ok(Value::Float(*value)),
            Expr::StrLit { value, .. } => Ok(Value::Str(value.clone())),
            Expr::BoolLit { value, .. } => Ok(Value::Bool(*value)),
            Expr::NullLit { .. } => Ok(Value::Null),
            Expr::MoneyLit {
                amount,
                currency,
                scale,
                ..
            } => Ok(Value::Money(Money::new(*amount, currency.clone(), *scale))),
            Expr::DurationLit {
                months, days, secs, ..
            } => Ok(Value::Duration(Duration::new(*months, *days, *secs))),
            Expr::DatetimeLit { raw, pos } => Ok(Value::Datetime(
                Datetime::parse(raw).map_err(|e| e.at(*pos))?,
            )),
            Expr::PathLit { raw, .. } => Ok(Value::Path(PathValue::new(raw.clone()))),
            Expr::UrlLit { raw, pos } => {
                Ok(Value::Url(UrlValue::parse(raw).map_err(|e| e.at(*pos))?))
            }
            Expr::RegexLit {
                pattern,
                flags,
                pos,
            } => Ok(Value::Regex(
                RegexValue::compile(pattern, flags).map_err(|e| e.at(*pos))?,
            )),
            Expr::Ident { name, pos } => self.resolve_ident(name, env).map_err(|e| e.at(*pos)),
            Expr::ArrayLit { elements, .. } => {
                Ok(Value::Array(self.eval_exprs_with_spread(elements, env)?))
            }
            Expr::Spread { pos, .. } => Err(RuntimeError::new(
                ErrorClass::Type,
                "TYPE-0004",
                "spread is only allowed inside array literals and call arguments",
            )
            .at(*pos)),
            Expr::DictLit { pairs, .. } => Ok(Value::Dict(Dict::from_exprs(
                pairs.clone(),
                env.clone(),
            ))),
            Expr::FnLit { params, body, .. } => Ok(Value::Function(FunctionValue {
                params: params.clone(),
                body: Arc::clone(body),
                env: env.clone(),
            })),
            Expr::Call { func, args, pos } => {
                let callee = self.eval_expr(func, env)?;
                let args = self.eval_exprs_with_spread(args, env)?;
                *self.call_site.lock().unwrap_or_else(|e| e.into_inner()) = *pos;
                self.call_value(callee, args, env).map_err(|e| e.at(*pos))
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
                pos,
            } => {
                let receiver = self.eval_expr(receiver, env)?;
                if matches!(receiver, Value::Null) {
                    return Ok(Value::Null);
                }
                let args = self.eval_exprs_with_spread(args, env)?;
                // dictionary entries that hold functions act as methods
                if let Value::Dict(dict) = &receiver {
                    if dict.has(method) {
                        let member = self.dict_get(dict, method)?;
                        if matches!(
                            member,
                            Value::Function(_) | Value::Builtin(_) | Value::Schema(_)
                        ) {
                            return self.call_value(member, args, env).map_err(|e| e.at(*pos));
                        }
                    }
                }
                methods::dispatch(self, env, &receiver, method, args).map_err(|e| e.at(*pos))
            }
            Expr::Member { receiver, name, pos } => {
                let receiver = self.eval_expr(receiver, env)?;
                self.member_access(&receiver, name).map_err(|e| e.at(*pos))
            }
            Expr::Index {
                receiver,
                index,
                pos,
            } => {
                let receiver = self.eval_expr(receiver, env)?;
                let index = self.eval_expr(index, env)?;
                self.index_access(&receiver, &index, env)
                    .map_err(|e| e.at(*pos))
            }
            Expr::Prefix { op, operand, pos } => {
                let operand = self.eval_expr(operand, env)?;
                self.eval_prefix(*op, operand).map_err(|e| e.at(*pos))
            }
            Expr::Infix {
                op,
                left,
                right,
                pos,
            } => self.eval_infix(*op, left, right, env).map_err(|e| e.at(*pos)),
            Expr::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval_expr(cond, env)?.is_truthy() {
                    self.eval_block(then_branch, env)
                } else {
                    match else_branch {
                        Some(ElseBranch::Block(block)) => self.eval_block(block, env),
                        Some(ElseBranch::If(expr)) => self.eval_expr(expr, env),
                        None => Ok(Value::Null),
                    }
                }
            }
            Expr::For {
                binding,
                iterable,
                body,
                pos,
            } => self
                .eval_for(binding, iterable, body, env)
                .map_err(|e| e.at(*pos)),
            Expr::Try { call, .. } => self.eval_try(call, env),
            Expr::Import { path, pos } => {
                let spec = match self.eval_expr(path, env)? {
                    Value::Path(p) => p.raw,
                    Value::Str(s) => s,
                    other => {
                        return Err(RuntimeError::type_mismatch("path", other.type_name())
                            .at(*pos));
                    }
                };
                self.import_module(&spec, env).map_err(|e| e.at(*pos))
            }
            Expr::Stop { .. } => Err(RuntimeError::stop_signal()),
            Expr::Skip { .. } => Err(RuntimeError::skip_signal()),
        }
    }

    fn resolve_ident(&self, name: &str, env: &Environment) -> Result<Value, RuntimeError> {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        if name.starts_with('@') {
            if let Some(value) = self.context.get(name) {
                return Ok(value);
            }
            return Err(RuntimeError::undefined_param(name));
        }
        if let Some(builtin) = builtins::lookup(name) {
            return Ok(Value::Builtin(builtin));
        }
        let mut known = env.known_names();
        known.extend(builtins::names().iter().map(|n| n.to_string()));
        Err(RuntimeError::undefined_variable(name, &known))
    }

    fn eval_exprs_with_spread(
        &self,
        exprs: &[Expr],
        env: &Environment,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut out = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match expr {
                Expr::Spread { inner, pos } => match self.eval_expr(inner, env)? {
                    Value::Array(items) => out.extend(items),
                    other => {
                        return Err(RuntimeError::type_mismatch("array", other.type_name())
                            .at(*pos));
                    }
                },
                _ => out.push(self.eval_expr(expr, env)?),
            }
        }
        Ok(out)
    }

    // Calls

    pub fn call_value(
        &self,
        callee: Value,
        args: Vec<Value>,
        env: &Environment,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(func) => self.apply_function(&func, args),
            Value::Builtin(builtin) => (builtin.func)(self, env, args),
            Value::Schema(schema) => {
                error::check_arity(&schema.name, 1, &args)?;
                let Value::Dict(dict) = args.into_iter().next().unwrap_or(Value::Null) else {
                    return Err(RuntimeError::type_mismatch("dict", "other"));
                };
                let input = self.force_dict(&dict)?;
                schema.validate(&input).map(Value::Record).map_err(|errors| {
                    RuntimeError::new(
                        ErrorClass::Value,
                        "VAL-0020",
                        format!("{} validation failed: {}", schema.name, errors.join("; ")),
                    )
                })
            }
            other => Err(RuntimeError::not_callable(other.type_name())),
        }
    }

    pub fn apply_function(
        &self,
        func: &FunctionValue,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if args.len() != func.params.len() {
            return Err(RuntimeError::arity_mismatch(
                "function",
                func.params.len(),
                args.len(),
            ));
        }
        let scope = Environment::enclosed(&func.env);
        for (param, arg) in func.params.iter().zip(args) {
            scope.set(param, arg);
        }
        let mut last = Value::Null;
        for stmt in &func.body.statements {
            match self.eval_stmt(stmt, &scope) {
                Ok(value) => last = value,
                Err(err) => match err.signal {
                    Some(Signal::Return(value)) => return Ok(value),
                    _ => return Err(err),
                },
            }
        }
        Ok(last)
    }

    /// Call a function with fewer required arguments than parameters is an
    /// error; used by iteration helpers that pass one or two arguments
    /// depending on the callback's arity.
    pub fn apply_callback(
        &self,
        func: &FunctionValue,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let take = func.params.len().min(args.len());
        self.apply_function(func, args[..take].to_vec())
    }

    // Operators

    fn eval_prefix(&self, op: PrefixOp, operand: Value) -> Result<Value, RuntimeError> {
        match op {
            PrefixOp::Not => Ok(Value::Bool(!operand.is_truthy())),
            PrefixOp::Neg => match operand {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| RuntimeError::integer_overflow("-")),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Money(m) => Ok(Value::Money(m.negate())),
                Value::Duration(d) => Ok(Value::Duration(d.negate())),
                other => Err(RuntimeError::invalid_operands("-", "nothing", other.type_name())),
            },
        }
    }

    fn eval_infix(
        &self,
        op: InfixOp,
        left: &Expr,
        right: &Expr,
        env: &Environment,
    ) -> Result<Value, RuntimeError> {
        // short-circuit forms first
        match op {
            InfixOp::And => {
                let lhs = self.eval_expr(left, env)?;
                if !lhs.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(self.eval_expr(right, env)?.is_truthy()));
            }
            InfixOp::Or => {
                let lhs = self.eval_expr(left, env)?;
                if lhs.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(self.eval_expr(right, env)?.is_truthy()));
            }
            InfixOp::Coalesce => {
                let lhs = self.eval_expr(left, env)?;
                if matches!(lhs, Value::Null) {
                    return self.eval_expr(right, env);
                }
                return Ok(lhs);
            }
            _ => {}
        }

        let lhs = self.eval_expr(left, env)?;
        let rhs = self.eval_expr(right, env)?;
        match op {
            InfixOp::Eq => Ok(Value::Bool(self.values_equal(&lhs, &rhs)?)),
            InfixOp::Ne => Ok(Value::Bool(!self.values_equal(&lhs, &rhs)?)),
            InfixOp::Is => Ok(Value::Bool(schema_identity(&lhs, &rhs)?)),
            InfixOp::IsNot => Ok(Value::Bool(!schema_identity(&lhs, &rhs)?)),
            InfixOp::Lt | InfixOp::Le | InfixOp::Gt | InfixOp::Ge => {
                let ord = value::compare_values(&lhs, &rhs).ok_or_else(|| {
                    RuntimeError::invalid_operands(
                        &op.to_string(),
                        lhs.type_name(),
                        rhs.type_name(),
                    )
                })?;
                Ok(Value::Bool(match op {
                    InfixOp::Lt => ord.is_lt(),
                    InfixOp::Le => ord.is_le(),
                    InfixOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }))
            }
            InfixOp::Add => self.eval_add(lhs, rhs),
            InfixOp::Sub => self.eval_sub(lhs, rhs),
            InfixOp::Mul => self.eval_mul(lhs, rhs),
            InfixOp::Div => self.eval_div(lhs, rhs),
            InfixOp::Mod => match (lhs, rhs) {
                (Value::Int(_), Value::Int(0)) => Err(RuntimeError::division_by_zero()),
                (Value::Int(a), Value::Int(b)) => a
                    .checked_rem(b)
                    .map(Value::Int)
                    .ok_or_else(|| RuntimeError::integer_overflow("%")),
                (a, b) => Err(RuntimeError::invalid_operands("%", a.type_name(), b.type_name())),
            },
            InfixOp::Concat => match (lhs, rhs) {
                (Value::Array(mut a), Value::Array(b)) => {
                    a.extend(b);
                    Ok(Value::Array(a))
                }
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
                (a, b) => Err(RuntimeError::invalid_operands("++", a.type_name(), b.type_name())),
            },
            InfixOp::And | InfixOp::Or | InfixOp::Coalesce => unreachable!("handled above"),
        }
    }

    fn eval_add(&self, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::integer_overflow("+")),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + b as f64)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::Money(a), Value::Money(b)) => Ok(Value::Money(a.add(&b)?)),
            (Value::Duration(a), Value::Duration(b)) => Ok(Value::Duration(a.add(&b))),
            (Value::Datetime(a), Value::Duration(b)) => Ok(Value::Datetime(a.add_duration(&b)?)),
            (Value::Duration(a), Value::Datetime(b)) => Ok(Value::Datetime(b.add_duration(&a)?)),
            (a, b) => Err(RuntimeError::invalid_operands("+", a.type_name(), b.type_name())),
        }
    }

    fn eval_sub(&self, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(b)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::integer_overflow("-")),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 - b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a - b as f64)),
            (Value::Money(a), Value::Money(b)) => Ok(Value::Money(a.sub(&b)?)),
            (Value::Duration(a), Value::Duration(b)) => Ok(Value::Duration(a.add(&b.negate()))),
            (Value::Datetime(a), Value::Duration(b)) => Ok(Value::Datetime(a.sub_duration(&b)?)),
            (Value::Datetime(a), Value::Datetime(b)) => Ok(Value::Duration(a.diff(&b))),
            (a, b) => Err(RuntimeError::invalid_operands("-", a.type_name(), b.type_name())),
        }
    }

    fn eval_mul(&self, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(b)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::integer_overflow("*")),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 * b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a * b as f64)),
            (Value::Money(m), Value::Int(n)) | (Value::Int(n), Value::Money(m)) => {
                Ok(Value::Money(m.mul_int(n)))
            }
            (Value::Money(m), Value::Float(f)) | (Value::Float(f), Value::Money(m)) => {
                Ok(Value::Money(m.mul_float(f)))
            }
            (Value::Duration(d), Value::Int(n)) | (Value::Int(n), Value::Duration(d)) => {
                Ok(Value::Duration(d.scale(n)))
            }
            (a, b) => Err(RuntimeError::invalid_operands("*", a.type_name(), b.type_name())),
        }
    }

    fn eval_div(&self, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        match (lhs, rhs) {
            (Value::Int(_), Value::Int(0)) => Err(RuntimeError::division_by_zero()),
            (Value::Int(a), Value::Int(b)) => a
                .checked_div(b)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::integer_overflow("/")),
            (_, Value::Float(f)) if f == 0.0 => Err(RuntimeError::division_by_zero()),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 / b)),
            (Value::Float(_), Value::Int(0)) => Err(RuntimeError::division_by_zero()),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a / b as f64)),
            (Value::Money(m), Value::Int(n)) => Ok(Value::Money(m.div_int(n)?)),
            (Value::Money(m), Value::Float(f)) => Ok(Value::Money(m.div_float(f)?)),
            (a, b) => Err(RuntimeError::invalid_operands("/", a.type_name(), b.type_name())),
        }
    }

    // Equality with dictionary forcing

    /// Language-level equality: scalars by value (int/float compare across
    /// types), arrays element-wise in order, dictionaries by key set and
    /// values regardless of insertion order.
    pub fn values_equal(&self, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
        match (a, b) {
            (Value::Array(xs), Value::Array(ys)) => {
                if xs.len() != ys.len() {
                    return Ok(false);
                }
                for (x, y) in xs.iter().zip(ys) {
                    if !self.values_equal(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Dict(x), Value::Dict(y)) => {
                if x.ptr_eq(y) {
                    return Ok(true);
                }
                let mut x_keys = x.keys();
                let mut y_keys = y.keys();
                x_keys.sort();
                y_keys.sort();
                if x_keys != y_keys {
                    return Ok(false);
                }
                for key in &x_keys {
                    let xv = self.dict_get(x, key)?;
                    let yv = self.dict_get(y, key)?;
                    if !self.values_equal(&xv, &yv)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Record(x), Value::Record(y)) => {
                Ok(x.schema.id == y.schema.id && x.fields == y.fields)
            }
            _ => Ok(a == b),
        }
    }

    // Member, index, and dictionary access

    /// Force a dictionary entry: stored expressions re-evaluate in the
    /// dictionary's own environment on every access, so entries reading
    /// mutable bindings or @-context always see the current values
    pub fn dict_get(&self, dict: &Dict, key: &str) -> Result<Value, RuntimeError> {
        match dict.entry(key) {
            None => Ok(Value::Null),
            Some(DictEntry::Value(value)) => Ok(value),
            Some(DictEntry::Expr(expr)) => self.eval_expr(&expr, &dict.env()),
        }
    }

    /// Force every entry of a dictionary into an ordered map
    pub fn force_dict(&self, dict: &Dict) -> Result<IndexMap<String, Value>, RuntimeError> {
        let mut out = IndexMap::new();
        for key in dict.keys() {
            let value = self.dict_get(dict, &key)?;
            out.insert(key, value);
        }
        Ok(out)
    }

    fn member_access(&self, receiver: &Value, name: &str) -> Result<Value, RuntimeError> {
        match receiver {
            Value::Null => Ok(Value::Null),
            Value::Dict(dict) => self.dict_get(dict, name),
            Value::Record(record) => record.get(name).ok_or_else(|| {
                let known: Vec<String> = record.fields.keys().cloned().collect();
                RuntimeError::unknown_method(&format!("record {}", record.schema.name), name, &known)
            }),
            other => Err(RuntimeError::new(
                ErrorClass::Undefined,
                "UNDEF-0011",
                format!("{} has no member '{}'", other.type_name(), name),
            )),
        }
    }

    fn index_access(
        &self,
        receiver: &Value,
        index: &Value,
        env: &Environment,
    ) -> Result<Value, RuntimeError> {
        match (receiver, index) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Array(items), Value::Int(i)) => {
                let len = items.len() as i64;
                let idx = if *i < 0 { len + i } else { *i };
                if idx < 0 || idx >= len {
                    Ok(Value::Null)
                } else {
                    Ok(items[idx as usize].clone())
                }
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len() as i64;
                let idx = if *i < 0 { len + i } else { *i };
                if idx < 0 || idx >= len {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Str(chars[idx as usize].to_string()))
                }
            }
            (Value::Dict(dict), Value::Str(key)) => self.dict_get(dict, key),
            (Value::Record(record), Value::Str(key)) => Ok(record.get(key).unwrap_or(Value::Null)),
            (Value::Table(table), Value::Int(i)) => {
                let len = table.len() as i64;
                let idx = if *i < 0 { len + i } else { *i };
                if idx < 0 || idx >= len {
                    Ok(Value::Null)
                } else {
                    Ok(table
                        .row_dict(idx as usize, env)
                        .map(Value::Dict)
                        .unwrap_or(Value::Null))
                }
            }
            (recv, idx) => Err(RuntimeError::invalid_operands(
                "[]",
                recv.type_name(),
                idx.type_name(),
            )),
        }
    }

    // Control flow

    fn eval_for(
        &self,
        binding: &ForBinding,
        iterable: &Expr,
        body: &ForBody,
        env: &Environment,
    ) -> Result<Value, RuntimeError> {
        let iterable = self.eval_expr(iterable, env)?;
        let pairs: Vec<(Value, Value)> = match &iterable {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v.clone()))
                .collect(),
            Value::Dict(dict) => {
                let mut pairs = Vec::new();
                for key in dict.keys() {
                    let value = self.dict_get(dict, &key)?;
                    pairs.push((Value::Str(key), value));
                }
                pairs
            }
            Value::Table(table) => (0..table.len())
                .map(|i| {
                    (
                        Value::Int(i as i64),
                        table.row_dict(i, env).map(Value::Dict).unwrap_or(Value::Null),
                    )
                })
                .collect(),
            other => {
                return Err(RuntimeError::type_mismatch(
                    "array, dict, or table",
                    other.type_name(),
                ));
            }
        };

        let mut results = Vec::new();
        for (key, value) in pairs {
            let outcome = match body {
                ForBody::Block(block) => {
                    let scope = Environment::enclosed(env);
                    match binding {
                        ForBinding::None => {}
                        ForBinding::One(name) => {
                            // one binding: dict iteration yields keys,
                            // arrays yield elements
                            let bound = if matches!(iterable, Value::Dict(_)) {
                                key.clone()
                            } else {
                                value.clone()
                            };
                            scope.set(name, bound);
                        }
                        ForBinding::Two(k, v) => {
                            scope.set(k, key.clone());
                            scope.set(v, value.clone());
                        }
                    }
                    self.eval_loop_block(block, &scope)
                }
                ForBody::Func(expr) => {
                    let callee = self.eval_expr(expr, env)?;
                    match callee {
                        Value::Function(func) => {
                            self.apply_callback(&func, &[value.clone(), key.clone()])
                        }
                        other => self.call_value(other, vec![value.clone()], env),
                    }
                }
            };
            match outcome {
                Ok(Value::Null) => {}
                Ok(v) => results.push(v),
                Err(err) => match err.signal {
                    Some(Signal::Stop) => break,
                    Some(Signal::Skip) => continue,
                    _ => return Err(err),
                },
            }
        }
        Ok(Value::Array(results))
    }

    /// Loop body without the extra scope (the caller already made one)
    fn eval_loop_block(&self, block: &Block, scope: &Environment) -> Result<Value, RuntimeError> {
        let mut last = Value::Null;
        for stmt in &block.statements {
            last = self.eval_stmt(stmt, scope)?;
        }
        Ok(last)
    }

    fn eval_try(&self, call: &Expr, env: &Environment) -> Result<Value, RuntimeError> {
        let dict = Dict::new(env.clone());
        match self.eval_expr(call, env) {
            Ok(value) => {
                dict.insert_value("result", value);
                dict.insert_value("error", Value::Null);
            }
            Err(err) if err.is_catchable() => {
                dict.insert_value("result", Value::Null);
                dict.insert_value("error", Value::Str(err.message));
            }
            Err(err) => return Err(err),
        }
        Ok(Value::Dict(dict))
    }

    // Imports

    pub fn import_module(&self, spec: &str, env: &Environment) -> Result<Value, RuntimeError> {
        if let Some(name) = spec.strip_prefix("std/") {
            return builtins::std_module(name, env);
        }
        let path = modules::resolve_import(spec, env)?;
        self.check_access(&path, Access::Read)?;

        // circular detection comes before the cache: a file on the stack is
        // mid-evaluation and cannot be waited on
        {
            let stack = self.import_stack.lock().unwrap_or_else(|e| e.into_inner());
            if stack.contains(&path) {
                return Err(RuntimeError::circular_import(spec));
            }
        }

        self.module_cache.get_or_load(&path, self.evaluation_id, || {
            self.import_stack
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(path.clone());
            let result = self.load_module_file(&path, env);
            self.import_stack
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop();
            result
        })
    }

    fn load_module_file(&self, path: &Path, env: &Environment) -> Result<Value, RuntimeError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::import_failed(&path.display().to_string(), e))?;
        let program = crate::parser::parse_program(&source).map_err(|diags| {
            let detail = diags
                .first()
                .map(|d| d.message.clone())
                .unwrap_or_else(|| "parse error".to_string());
            RuntimeError::import_failed(&path.display().to_string(), detail)
        })?;

        // modules evaluate in an isolated scope; only the importing file's
        // root path carries over
        let module_env = Environment::new();
        module_env.set_filename(path);
        if let Some(root) = env.root_path() {
            module_env.set_root_path(root);
        }

        for stmt in &program.statements {
            match self.eval_stmt(stmt, &module_env) {
                Ok(_) => {}
                Err(err) => match err.signal {
                    Some(Signal::Return(_)) => break,
                    _ => return Err(err),
                },
            }
        }

        let dict = Dict::new(module_env.clone());
        for (name, value) in module_env.exports() {
            dict.insert_value(name, value);
        }
        Ok(Value::Dict(dict))
    }

    // Rendering

    /// Human-facing rendering: strings bare, containers in literal form
    pub fn format_value(&self, value: &Value) -> Result<String, RuntimeError> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            _ => self.inspect_value(value),
        }
    }

    /// Literal-form rendering, forcing dictionary entries
    pub fn inspect_value(&self, value: &Value) -> Result<String, RuntimeError> {
        Ok(match value {
            Value::Null => "null".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => format!("{:?}", s),
            Value::Money(m) => m.format(),
            Value::Duration(d) => d.format(),
            Value::Datetime(d) => d.format(),
            Value::Path(p) => p.format(),
            Value::Url(u) => u.format(),
            Value::Regex(r) => r.format(),
            Value::Command(c) => c.format(),
            Value::Array(items) => {
                let rendered: Result<Vec<String>, RuntimeError> =
                    items.iter().map(|v| self.inspect_value(v)).collect();
                format!("[{}]", rendered?.join(", "))
            }
            Value::Dict(dict) => {
                let mut parts = Vec::new();
                for key in dict.keys() {
                    let value = self.dict_get(dict, &key)?;
                    parts.push(format!("{}: {}", key, self.inspect_value(&value)?));
                }
                format!("{{{}}}", parts.join(", "))
            }
            Value::Table(table) => {
                format!("<table {} rows x {} cols>", table.len(), table.columns().len())
            }
            Value::Schema(schema) => format!("<schema {}>", schema.name),
            Value::Record(record) => {
                let mut parts = Vec::new();
                for (key, value) in record.fields.iter() {
                    parts.push(format!("{}: {}", key, self.inspect_value(value)?));
                }
                format!("{}{{{}}}", record.schema.name, parts.join(", "))
            }
            Value::TableBinding(binding) => {
                format!("<binding {} -> {}>", binding.schema().name, binding.table())
            }
            Value::Function(func) => format!("<fn({})>", func.params.join(", ")),
            Value::Builtin(builtin) => format!("<builtin {}>", builtin.name),
        })
    }
}

/// `is` / `is not`: nominal schema identity
fn schema_identity(left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    match (left, right) {
        (Value::Record(record), Value::Schema(schema)) => Ok(record.schema.id == schema.id),
        (Value::Schema(a), Value::Schema(b)) => Ok(a.id == b.id),
        (Value::Null, Value::Schema(_)) => Ok(false),
        (l, r) => Err(RuntimeError::invalid_operands(
            "is",
            l.type_name(),
            r.type_name(),
        )),
    }
}
