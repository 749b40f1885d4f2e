//! Host capabilities.
//!
//! The evaluator reaches the outside world only through these traits. The
//! embedding host decides which to provide; builtins backed by an absent
//! capability degrade to a defined fallback (no-op or error) rather than
//! touching the system directly. Everything is `Send + Sync` because module
//! evaluation can happen on any thread.

use std::sync::{Arc, Mutex};

use crate::interpreter::value::Value;

/// Destination for `log` / `logLine` output
pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
    fn log_line(&self, message: &str);
}

/// Development log sink for `devLog` / `devLogClear`. Entries carry the
/// route being served, a severity level, the calling source position, and
/// the rendered call and value text; `clear` drops one route's entries.
pub trait DevLogWriter: Send + Sync {
    fn log(&self, route: &str, level: &str, filename: &str, line: usize, call: &str, value: &str);
    fn clear(&self, route: &str);
}

/// Maps project-relative asset paths to public URLs for `publicUrl`
pub trait AssetRegistrar: Send + Sync {
    fn public_url(&self, path: &str) -> Option<String>;
}

/// Database access for table bindings. Rows come back as column/value pairs
/// in select order; errors are plain strings that surface as catchable
/// value errors.
pub trait DbConnection: Send + Sync {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<(String, Value)>>, String>;
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, String>;
}

/// Logger that writes to standard output
#[derive(Debug, Default)]
pub struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, message: &str) {
        print!("{}", message);
    }

    fn log_line(&self, message: &str) {
        println!("{}", message);
    }
}

/// Logger that keeps output in memory, for tests and embedding
#[derive(Debug, Default)]
pub struct BufferLogger {
    buffer: Mutex<String>,
}

impl BufferLogger {
    pub fn contents(&self) -> String {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Logger for BufferLogger {
    fn log(&self, message: &str) {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_str(message);
    }

    fn log_line(&self, message: &str) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push_str(message);
        buffer.push('\n');
    }
}

/// The capability set handed to an evaluator
#[derive(Clone)]
pub struct Capabilities {
    pub logger: Arc<dyn Logger>,
    pub dev_log: Option<Arc<dyn DevLogWriter>>,
    pub assets: Option<Arc<dyn AssetRegistrar>>,
    pub db: Option<Arc<dyn DbConnection>>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            logger: Arc::new(StdoutLogger),
            dev_log: None,
            assets: None,
            db: None,
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("dev_log", &self.dev_log.is_some())
            .field("assets", &self.assets.is_some())
            .field("db", &self.db.is_some())
            .finish()
    }
}

/// One entry captured by [`RecordingDevLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevLogEntry {
    pub route: String,
    pub level: String,
    pub filename: String,
    pub line: usize,
    pub call: String,
    pub value: String,
}

/// Dev-log sink keeping entries in memory, for tests
#[derive(Debug, Default)]
pub struct RecordingDevLog {
    entries: Mutex<Vec<DevLogEntry>>,
    cleared: Mutex<Vec<String>>,
}

impl RecordingDevLog {
    pub fn entries(&self) -> Vec<DevLogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.cleared.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DevLogWriter for RecordingDevLog {
    fn log(&self, route: &str, level: &str, filename: &str, line: usize, call: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DevLogEntry {
                route: route.to_string(),
                level: level.to_string(),
                filename: filename.to_string(),
                line,
                call: call.to_string(),
                value: value.to_string(),
            });
    }

    fn clear(&self, route: &str) {
        self.cleared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(route.to_string());
    }
}

/// In-memory database stub recording every statement, for tests
#[derive(Debug, Default)]
pub struct RecordingDb {
    pub statements: Mutex<Vec<(String, Vec<Value>)>>,
    /// Rows returned by the next query
    pub next_rows: Mutex<Vec<Vec<(String, Value)>>>,
}

impl RecordingDb {
    pub fn recorded(&self) -> Vec<(String, Vec<Value>)> {
        self.statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl DbConnection for RecordingDb {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<(String, Value)>>, String> {
        self.statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((sql.to_string(), params.to_vec()));
        Ok(std::mem::take(
            &mut *self.next_rows.lock().unwrap_or_else(|e| e.into_inner()),
        ))
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, String> {
        self.statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((sql.to_string(), params.to_vec()));
        Ok(1)
    }
}
