//! Sorrel Scripting Language
//!
//! Sorrel is an embedded, dynamically-typed scripting language for server-side
//! templating and light application logic, with a capability-based security
//! policy gating filesystem and process access.

pub mod cli;
pub mod diagnostics;
pub mod interpreter;
pub mod parser;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::diagnostics::Position;
    pub use crate::interpreter::error::{ErrorClass, RuntimeError};
    pub use crate::interpreter::security::{Access, SecurityPolicy};
    pub use crate::interpreter::value::Value;
    pub use crate::interpreter::Evaluator;
    pub use crate::parser::ast::*;
}
