//! Concurrency behavior of the shared module cache.
//!
//! Many threads importing the same file must evaluate it at most once per
//! cache generation, while imports of distinct files proceed independently.
//! A cycle split across evaluations must surface as a circular-import error
//! rather than a deadlock.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use sorrel::interpreter::modules::ModuleCache;
use sorrel::interpreter::value::Value;
use sorrel::interpreter::Evaluator;

#[test]
fn racing_loads_of_one_path_run_the_loader_once() {
    let cache = Arc::new(ModuleCache::new());
    let evaluations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let evaluations = Arc::clone(&evaluations);
            thread::spawn(move || {
                cache
                    .get_or_load(Path::new("/virtual/shared.sl"), i as u64 + 1, || {
                        evaluations.fetch_add(1, Ordering::SeqCst);
                        // hold the slot long enough for losers to queue up
                        thread::sleep(std::time::Duration::from_millis(20));
                        Ok(Value::Int(7))
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Value::Int(7));
    }
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn distinct_paths_load_independently() {
    let cache = Arc::new(ModuleCache::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let path = format!("/virtual/mod{}.sl", i);
                cache
                    .get_or_load(Path::new(&path), i as u64 + 1, || Ok(Value::Int(i)))
                    .unwrap()
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), Value::Int(i as i64));
    }
    assert_eq!(cache.len(), 8);
}

#[test]
fn failed_loads_are_not_cached() {
    let cache = ModuleCache::new();
    let path = Path::new("/virtual/broken.sl");

    let err = cache.get_or_load(path, 1, || {
        Err(sorrel::interpreter::error::RuntimeError::user_failure(
            "load failed",
        ))
    });
    assert!(err.is_err());
    assert!(cache.get(path).is_none());

    // the next attempt runs the loader again and its value sticks
    let value = cache.get_or_load(path, 2, || Ok(Value::Int(3))).unwrap();
    assert_eq!(value, Value::Int(3));
    assert_eq!(cache.get(path), Some(Value::Int(3)));
}

#[test]
fn evaluators_on_separate_threads_share_an_injected_cache() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("lib.sl");
    std::fs::write(&module, "export answer = 42").unwrap();
    let main = dir.path().join("main.sl");
    std::fs::write(&main, "(import @./lib.sl).answer").unwrap();

    let cache = Arc::new(ModuleCache::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let main = main.clone();
            thread::spawn(move || {
                let ev = Evaluator::new().with_module_cache(cache);
                ev.run_file(&main).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Value::Int(42));
    }
    // one entry for lib.sl; main.sl itself is run, not imported
    assert_eq!(cache.len(), 1);
}

#[test]
fn cached_modules_read_each_evaluators_own_context() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lib.sl"), "export view = { current: @params }").unwrap();
    let main = dir.path().join("main.sl");
    std::fs::write(&main, "(import @./lib.sl).view.current").unwrap();

    let cache = Arc::new(ModuleCache::new());

    let first = Evaluator::new().with_module_cache(Arc::clone(&cache));
    first.set_context_value("@params", Value::Int(1));
    assert_eq!(first.run_file(&main).unwrap(), Value::Int(1));

    // the module dictionary is served from the cache, yet its entry still
    // reads the importing evaluator's context, not a load-time snapshot
    let second = Evaluator::new().with_module_cache(Arc::clone(&cache));
    second.set_context_value("@params", Value::Int(2));
    assert_eq!(second.run_file(&main).unwrap(), Value::Int(2));

    assert_eq!(cache.len(), 1);
}

#[test]
fn cross_evaluation_import_cycle_errors_instead_of_deadlocking() {
    let cache = Arc::new(ModuleCache::new());
    let barrier = Arc::new(Barrier::new(2));

    // evaluation 1 loads a.sl and then wants b.sl; evaluation 2 does the
    // reverse. Exactly one side must get a circular-import error, after
    // which the other completes.
    let t1 = {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            cache.get_or_load(Path::new("/virtual/a.sl"), 1, || {
                barrier.wait();
                cache.get_or_load(Path::new("/virtual/b.sl"), 1, || Ok(Value::Int(1)))
            })
        })
    };
    let t2 = {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            cache.get_or_load(Path::new("/virtual/b.sl"), 2, || {
                barrier.wait();
                cache.get_or_load(Path::new("/virtual/a.sl"), 2, || Ok(Value::Int(2)))
            })
        })
    };

    let results = [t1.join().unwrap(), t2.join().unwrap()];
    let failures: Vec<_> = results.iter().filter(|r| r.is_err()).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].as_ref().unwrap_err().code, "IMPORT-0002");
}

#[test]
fn clear_starts_a_new_generation() {
    let cache = ModuleCache::new();
    let path = Path::new("/virtual/gen.sl");
    cache.get_or_load(path, 1, || Ok(Value::Int(1))).unwrap();
    cache.clear();
    assert!(cache.get(path).is_none());
    let value = cache.get_or_load(path, 2, || Ok(Value::Int(2))).unwrap();
    assert_eq!(value, Value::Int(2));
}
