//! Lexical environments.
//!
//! An `Environment` is a cheaply clonable handle onto a shared scope; child
//! scopes hold a handle to their parent. Handles are `Send + Sync` so
//! closures and module dictionaries can cross threads, which the module
//! cache requires.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::interpreter::error::{ErrorClass, RuntimeError};
use crate::interpreter::value::Value;

#[derive(Debug, Default)]
struct Scope {
    store: HashMap<String, Value>,
    /// Names bound with `let` in this scope (export fallback set)
    lets: HashSet<String>,
    /// Names explicitly exported
    exports: HashSet<String>,
    /// Names that cannot be rebound or assigned (@env, @args, ...)
    protected: HashSet<String>,
    outer: Option<Environment>,
    /// Source file this scope evaluates, for relative import resolution
    filename: Option<PathBuf>,
    /// Project root, the base for `@~/` paths
    root_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct Environment {
    inner: Arc<RwLock<Scope>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child scope; inherits file and root paths from the parent
    pub fn enclosed(outer: &Environment) -> Self {
        let (filename, root_path) = {
            let scope = outer.inner.read().unwrap_or_else(|e| e.into_inner());
            (scope.filename.clone(), scope.root_path.clone())
        };
        let env = Environment::new();
        {
            let mut scope = env.inner.write().unwrap_or_else(|e| e.into_inner());
            scope.outer = Some(outer.clone());
            scope.filename = filename;
            scope.root_path = root_path;
        }
        env
    }

    /// Same underlying scope?
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn filename(&self) -> Option<PathBuf> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .filename
            .clone()
    }

    pub fn set_filename(&self, path: impl Into<PathBuf>) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .filename = Some(path.into());
    }

    pub fn root_path(&self) -> Option<PathBuf> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .root_path
            .clone()
    }

    pub fn set_root_path(&self, path: impl Into<PathBuf>) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .root_path = Some(path.into());
    }

    /// Look a name up through the scope chain
    pub fn get(&self, name: &str) -> Option<Value> {
        // Clone the outer handle before recursing so no lock is held
        // across scope boundaries.
        let outer = {
            let scope = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(value) = scope.store.get(name) {
                return Some(value.clone());
            }
            scope.outer.clone()
        };
        outer.and_then(|env| env.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind a name in this scope via `let`. Rebinding a protected name in the
    /// same scope is an error; shadowing one from an outer scope is fine.
    pub fn declare(&self, name: &str, value: Value, export: bool) -> Result<(), RuntimeError> {
        let mut scope = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if scope.protected.contains(name) {
            return Err(RuntimeError::new(
                ErrorClass::Value,
                "VAL-0010",
                format!("'{}' is protected and cannot be rebound", name),
            ));
        }
        scope.store.insert(name.to_string(), value);
        scope.lets.insert(name.to_string());
        if export {
            scope.exports.insert(name.to_string());
        }
        Ok(())
    }

    /// Bind without `let` bookkeeping (builtins, loop variables, parameters)
    pub fn set(&self, name: &str, value: Value) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .store
            .insert(name.to_string(), value);
    }

    /// Bind and protect (host-provided names like @env and @args)
    pub fn set_protected(&self, name: &str, value: Value) {
        let mut scope = self.inner.write().unwrap_or_else(|e| e.into_inner());
        scope.store.insert(name.to_string(), value);
        scope.protected.insert(name.to_string());
    }

    /// Reassign an existing binding, walking up the scope chain
    pub fn assign(&self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let outer = {
            let mut scope = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if scope.protected.contains(name) {
                return Err(RuntimeError::new(
                    ErrorClass::Value,
                    "VAL-0010",
                    format!("'{}' is protected and cannot be assigned", name),
                ));
            }
            if scope.store.contains_key(name) {
                scope.store.insert(name.to_string(), value);
                return Ok(());
            }
            scope.outer.clone()
        };
        match outer {
            Some(env) => env.assign(name, value),
            None => Err(RuntimeError::undefined_variable(name, &self.known_names())),
        }
    }

    /// Exported bindings of this scope. Falls back to all `let` bindings when
    /// nothing was exported explicitly, in declaration-independent name order.
    pub fn exports(&self) -> Vec<(String, Value)> {
        let scope = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let names: Vec<&String> = if scope.exports.is_empty() {
            scope.lets.iter().collect()
        } else {
            scope.exports.iter().collect()
        };
        let mut pairs: Vec<(String, Value)> = names
            .into_iter()
            .filter_map(|n| scope.store.get(n).map(|v| (n.clone(), v.clone())))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// All names visible from this scope, for typo suggestions
    pub fn known_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(self.clone());
        while let Some(env) = current {
            let scope = env.inner.read().unwrap_or_else(|e| e.into_inner());
            names.extend(scope.store.keys().cloned());
            current = scope.outer.clone();
        }
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_the_scope_chain() {
        let global = Environment::new();
        global.set("a", Value::Int(1));
        let inner = Environment::enclosed(&global);
        inner.set("b", Value::Int(2));
        assert_eq!(inner.get("a"), Some(Value::Int(1)));
        assert_eq!(inner.get("b"), Some(Value::Int(2)));
        assert_eq!(global.get("b"), None);
    }

    #[test]
    fn assign_updates_the_defining_scope() {
        let global = Environment::new();
        global.set("counter", Value::Int(0));
        let inner = Environment::enclosed(&global);
        inner.assign("counter", Value::Int(5)).unwrap();
        assert_eq!(global.get("counter"), Some(Value::Int(5)));
    }

    #[test]
    fn protected_names_cannot_be_rebound_in_scope() {
        let env = Environment::new();
        env.set_protected("@env", Value::Null);
        assert!(env.declare("@env", Value::Int(1), false).is_err());
        assert!(env.assign("@env", Value::Int(1)).is_err());

        // shadowing in a child scope is allowed
        let inner = Environment::enclosed(&env);
        assert!(inner.declare("@env", Value::Int(1), false).is_ok());
    }

    #[test]
    fn exports_fall_back_to_let_bindings() {
        let env = Environment::new();
        env.declare("a", Value::Int(1), false).unwrap();
        env.declare("b", Value::Int(2), false).unwrap();
        let names: Vec<String> = env.exports().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);

        env.declare("c", Value::Int(3), true).unwrap();
        let names: Vec<String> = env.exports().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["c"]);
    }

    #[test]
    fn enclosed_scope_inherits_paths() {
        let env = Environment::new();
        env.set_filename("/proj/main.sl");
        env.set_root_path("/proj");
        let inner = Environment::enclosed(&env);
        assert_eq!(inner.filename(), Some(PathBuf::from("/proj/main.sl")));
        assert_eq!(inner.root_path(), Some(PathBuf::from("/proj")));
    }
}
