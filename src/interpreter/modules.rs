//! Module cache and import path resolution.
//!
//! The cache maps canonical file paths to evaluated module dictionaries and
//! is shared process-wide by default, so concurrent imports of the same file
//! evaluate it at most once per cache generation. A path being evaluated
//! holds a `Loading` slot stamped with the loading evaluation's id: other
//! evaluations block on a condvar until the value is ready, while imports of
//! unrelated paths proceed in parallel. The waiting graph is tracked so an
//! import cycle split across evaluations (thread A loading `a.sl` waits on
//! `b.sl` while thread B loading `b.sl` waits on `a.sl`) is reported as a
//! circular import instead of deadlocking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use once_cell::sync::Lazy;

use crate::interpreter::environment::Environment;
use crate::interpreter::error::RuntimeError;
use crate::interpreter::value::Value;

#[derive(Debug, Clone)]
enum Slot {
    /// Mid-evaluation by the evaluation with this id
    Loading(u64),
    Ready(Value),
}

#[derive(Debug, Default)]
struct CacheState {
    /// Bumped by `clear`; loads finishing against an old generation are
    /// not re-installed
    generation: u64,
    slots: HashMap<PathBuf, Slot>,
    /// Evaluation id -> the path whose load it is currently blocked on
    waiting: HashMap<u64, PathBuf>,
}

impl CacheState {
    /// Would `evaluation` waiting on `owner` close a wait cycle? Walks the
    /// chain owner -> path-it-waits-on -> that slot's loader until it either
    /// reaches `evaluation` (cycle) or an evaluation that is not waiting.
    fn blocks(&self, owner: u64, evaluation: u64) -> bool {
        let mut current = owner;
        for _ in 0..=self.waiting.len() {
            let Some(path) = self.waiting.get(&current) else {
                return false;
            };
            match self.slots.get(path) {
                Some(Slot::Loading(next)) if *next == evaluation => return true,
                Some(Slot::Loading(next)) => current = *next,
                _ => return false,
            }
        }
        false
    }
}

#[derive(Debug, Default)]
pub struct ModuleCache {
    state: Mutex<CacheState>,
    ready: Condvar,
}

static GLOBAL_CACHE: Lazy<Arc<ModuleCache>> = Lazy::new(|| Arc::new(ModuleCache::default()));

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by evaluators unless one is injected
    pub fn global() -> Arc<ModuleCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Return the cached module for `path`, or run `load` under a `Loading`
    /// slot and cache its result. `evaluation` identifies the importing
    /// evaluation; concurrent importers of the same path block until the
    /// winner finishes, unless waiting would close a cycle with the loader,
    /// which is a circular-import error.
    pub fn get_or_load<F>(
        &self,
        path: &Path,
        evaluation: u64,
        load: F,
    ) -> Result<Value, RuntimeError>
    where
        F: FnOnce() -> Result<Value, RuntimeError>,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match state.slots.get(path) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::Loading(owner)) => {
                    let owner = *owner;
                    if owner == evaluation || state.blocks(owner, evaluation) {
                        return Err(RuntimeError::circular_import(
                            &path.display().to_string(),
                        ));
                    }
                    state.waiting.insert(evaluation, path.to_path_buf());
                    state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
                    state.waiting.remove(&evaluation);
                }
                None => break,
            }
        }
        state
            .slots
            .insert(path.to_path_buf(), Slot::Loading(evaluation));
        let generation = state.generation;
        drop(state);

        let result = load();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.generation == generation {
            match &result {
                Ok(value) => {
                    state
                        .slots
                        .insert(path.to_path_buf(), Slot::Ready(value.clone()));
                }
                Err(_) => {
                    state.slots.remove(path);
                }
            }
        }
        drop(state);
        self.ready.notify_all();
        result
    }

    /// Peek without loading
    pub fn get(&self, path: &Path) -> Option<Value> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.slots.get(path) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Number of fully loaded modules
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached module and start a new generation. In-flight loads
    /// finish but are not re-installed; the next import re-evaluates.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.generation += 1;
        state.slots.clear();
        drop(state);
        self.ready.notify_all();
    }
}

/// Resolve an import spec to an absolute filesystem path.
///
/// `./` and `../` are relative to the importing file's directory, `~/` to
/// the project root (falling back to `$HOME`), and absolute paths pass
/// through. The result is canonicalized so the cache never stores two keys
/// for the same file.
pub fn resolve_import(spec: &str, env: &Environment) -> Result<PathBuf, RuntimeError> {
    let candidate = if spec.starts_with("./") || spec.starts_with("../") {
        let base = env
            .filename()
            .and_then(|f| f.parent().map(Path::to_path_buf))
            .ok_or_else(|| {
                RuntimeError::import_failed(spec, "relative import outside a file context")
            })?;
        base.join(spec)
    } else if let Some(rest) = spec.strip_prefix("~/") {
        let root = env
            .root_path()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .ok_or_else(|| RuntimeError::import_failed(spec, "no project root configured"))?;
        root.join(rest)
    } else if spec.starts_with('/') {
        PathBuf::from(spec)
    } else {
        return Err(RuntimeError::import_failed(
            spec,
            "import paths must start with './', '../', '~/', '/', or 'std/'",
        ));
    };
    candidate
        .canonicalize()
        .map_err(|e| RuntimeError::import_failed(spec, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn loads_once_and_serves_from_cache() {
        let cache = ModuleCache::new();
        let loads = AtomicUsize::new(0);
        let path = Path::new("/fake/mod.sl");
        for _ in 0..3 {
            let value = cache
                .get_or_load(path, 1, || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Int(42))
                })
                .unwrap();
            assert_eq!(value, Value::Int(42));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let cache = ModuleCache::new();
        let path = Path::new("/fake/broken.sl");
        let err = cache.get_or_load(path, 1, || Err(RuntimeError::io("no such file")));
        assert!(err.is_err());

        let value = cache.get_or_load(path, 2, || Ok(Value::Int(1))).unwrap();
        assert_eq!(value, Value::Int(1));
    }

    #[test]
    fn reentrant_load_of_a_loading_path_is_circular() {
        let cache = ModuleCache::new();
        let path = Path::new("/fake/self.sl");
        let err = cache
            .get_or_load(path, 1, || {
                // the same evaluation importing the path it is loading
                cache.get_or_load(path, 1, || Ok(Value::Int(0)))
            })
            .unwrap_err();
        assert_eq!(err.code, "IMPORT-0002");
        // the failed load leaves no slot behind
        assert!(cache.get(path).is_none());
    }

    #[test]
    fn clear_starts_a_new_generation() {
        let cache = ModuleCache::new();
        let path = Path::new("/fake/mod.sl");
        cache.get_or_load(path, 1, || Ok(Value::Int(1))).unwrap();
        cache.clear();
        assert!(cache.get(path).is_none());
        let value = cache.get_or_load(path, 2, || Ok(Value::Int(2))).unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn relative_imports_resolve_against_the_importing_file() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib.sl");
        std::fs::write(&lib, "let x = 1").unwrap();
        let env = Environment::new();
        env.set_filename(dir.path().join("main.sl"));
        let resolved = resolve_import("./lib.sl", &env).unwrap();
        assert_eq!(resolved, lib.canonicalize().unwrap());
    }

    #[test]
    fn bare_specs_are_rejected() {
        let env = Environment::new();
        let err = resolve_import("lib.sl", &env).unwrap_err();
        assert_eq!(err.code, "IMPORT-0004");
        assert!(err.is_catchable());
    }
}
