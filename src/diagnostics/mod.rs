//! Diagnostic reporting for the Sorrel toolchain
//!
//! Provides source positions and structured parse diagnostics with stable
//! error codes and machine-readable JSON output. Runtime errors live in
//! `interpreter::error`; this module covers everything the parser reports
//! before evaluation starts.

use serde::{Deserialize, Serialize};

/// A source position (1-indexed line and column, 0 = unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Position for a whole file (line 1, column 1)
    pub fn file_start() -> Self {
        Self { line: 1, column: 1 }
    }

    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A parse-time diagnostic with a stable code and fix hints.
///
/// Parse errors short-circuit before evaluation: the evaluator never sees a
/// program that produced one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    /// Stable error code (SYN-xxxx series)
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Suggested fixes ("Did you mean 'let'?")
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub hints: Vec<String>,

    /// Source position of the offending token
    pub position: Position,
}

impl ParseDiagnostic {
    pub fn new(code: impl Into<String>, message: impl Into<String>, position: Position) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hints: Vec::new(),
            position,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    /// Serialize to a JSON value for `--json` output
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] ", self.code)?;
        if self.position.is_known() {
            write!(f, "{}: ", self.position)?;
        }
        write!(f, "{}", self.message)?;
        for hint in &self.hints {
            write!(f, "\n  {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseDiagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_display() {
        let pos = Position::new(3, 14);
        assert_eq!(pos.to_string(), "line 3, column 14");
        assert!(pos.is_known());
        assert!(!Position::default().is_known());
    }

    #[test]
    fn diagnostic_display_includes_code_and_hints() {
        let diag = ParseDiagnostic::new("SYN-0001", "unexpected token '}'", Position::new(2, 5))
            .with_hint("Did you mean 'let'?");
        let rendered = diag.to_string();
        assert!(rendered.contains("SYN-0001"));
        assert!(rendered.contains("line 2, column 5"));
        assert!(rendered.contains("Did you mean 'let'?"));
    }

    #[test]
    fn diagnostic_json_roundtrip() {
        let diag = ParseDiagnostic::new("SYN-0002", "expected ')'", Position::new(1, 9));
        let json = diag.to_json();
        assert_eq!(json["code"], "SYN-0002");
        assert_eq!(json["position"]["line"], 1);
    }
}
