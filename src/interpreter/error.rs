//! Runtime error taxonomy.
//!
//! Every runtime error carries a class, a stable code, a message, optional
//! fix hints, and a source position. The class decides catchability: only
//! `Value`-class errors can be intercepted by `try`; everything else is a
//! program defect or a security violation and always propagates.
//!
//! Loop and function control flow (`return`, `stop`, `skip`) rides the same
//! channel as a signal so it unwinds through nested evaluation the same way
//! errors do. Signals are never catchable and never reach the user.

use crate::diagnostics::Position;
use crate::interpreter::value::Value;

/// Error class, the unit of catchability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Wrong operand or argument type
    Type,
    /// Wrong number of arguments
    Arity,
    /// Unknown identifier, member, or method
    Undefined,
    /// Bad runtime value: division by zero, failed validation, I/O and
    /// database failures, user-raised `fail(...)`
    Value,
    /// Security policy violation
    Security,
    /// Malformed input discovered at runtime (dynamic regex, JSON, dates)
    Syntax,
}

impl ErrorClass {
    /// Only Value-class errors can be caught by `try`
    pub fn is_catchable(self) -> bool {
        matches!(self, ErrorClass::Value)
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorClass::Type => "type",
            ErrorClass::Arity => "arity",
            ErrorClass::Undefined => "undefined",
            ErrorClass::Value => "value",
            ErrorClass::Security => "security",
            ErrorClass::Syntax => "syntax",
        }
    }
}

/// Non-error control flow carried through the error channel
#[derive(Debug, Clone)]
pub enum Signal {
    Return(Value),
    Stop,
    Skip,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub class: ErrorClass,
    pub code: &'static str,
    pub message: String,
    pub hints: Vec<String>,
    pub position: Position,
    pub signal: Option<Signal>,
}

impl RuntimeError {
    pub fn new(class: ErrorClass, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            class,
            code,
            message: message.into(),
            hints: Vec::new(),
            position: Position::default(),
            signal: None,
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        if !self.position.is_known() {
            self.position = position;
        }
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn is_catchable(&self) -> bool {
        self.signal.is_none() && self.class.is_catchable()
    }

    pub fn is_signal(&self) -> bool {
        self.signal.is_some()
    }

    // Control-flow signals

    pub fn return_signal(value: Value) -> Self {
        Self {
            signal: Some(Signal::Return(value)),
            ..Self::new(ErrorClass::Value, "", "return outside function")
        }
    }

    pub fn stop_signal() -> Self {
        Self {
            signal: Some(Signal::Stop),
            ..Self::new(ErrorClass::Value, "", "'stop' outside loop")
        }
    }

    pub fn skip_signal() -> Self {
        Self {
            signal: Some(Signal::Skip),
            ..Self::new(ErrorClass::Value, "", "'skip' outside loop")
        }
    }

    // Named constructors for the common cases

    pub fn undefined_variable(name: &str, known: &[String]) -> Self {
        let mut err = Self::new(
            ErrorClass::Undefined,
            "UNDEF-0001",
            format!("undefined identifier '{}'", name),
        );
        if let Some(suggestion) = closest_match(name, known) {
            err = err.with_hint(format!("Did you mean '{}'?", suggestion));
        }
        err
    }

    pub fn undefined_param(name: &str) -> Self {
        Self::new(
            ErrorClass::Undefined,
            "PART-0002",
            format!("'{}' is not defined in the current context", name),
        )
        .with_hint("context values like @params are provided by the host when it runs a partial")
        .with_hint("pass the value explicitly or run this file through a context that defines it")
    }

    pub fn unknown_method(type_name: &str, method: &str, known: &[String]) -> Self {
        let mut err = Self::new(
            ErrorClass::Undefined,
            "UNDEF-0010",
            format!("unknown method '{}' for type {}", method, type_name),
        );
        if let Some(suggestion) = closest_match(method, known) {
            err = err.with_hint(format!("Did you mean '{}'?", suggestion));
        }
        err
    }

    pub fn type_mismatch(expected: &str, got: &str) -> Self {
        Self::new(
            ErrorClass::Type,
            "TYPE-0001",
            format!("expected {}, got {}", expected, got),
        )
    }

    pub fn invalid_operands(op: &str, left: &str, right: &str) -> Self {
        Self::new(
            ErrorClass::Type,
            "TYPE-0002",
            format!("operator '{}' not supported for {} and {}", op, left, right),
        )
    }

    pub fn not_callable(type_name: &str) -> Self {
        Self::new(
            ErrorClass::Type,
            "TYPE-0003",
            format!("{} is not callable", type_name),
        )
    }

    pub fn fail_requires_string(got: &str) -> Self {
        Self::new(
            ErrorClass::Type,
            "TYPE-0005",
            format!("fail() requires a string message, got {}", got),
        )
    }

    pub fn arity_mismatch(name: &str, expected: usize, got: usize) -> Self {
        Self::new(
            ErrorClass::Arity,
            "ARITY-0001",
            format!(
                "{} expects {} argument{}, got {}",
                name,
                expected,
                if expected == 1 { "" } else { "s" },
                got
            ),
        )
    }

    pub fn division_by_zero() -> Self {
        Self::new(ErrorClass::Value, "VAL-0001", "division by zero")
    }

    pub fn integer_overflow(op: &str) -> Self {
        Self::new(
            ErrorClass::Value,
            "VAL-0003",
            format!("integer overflow in '{}'", op),
        )
    }

    pub fn currency_mismatch(left: &str, right: &str) -> Self {
        Self::new(
            ErrorClass::Value,
            "VAL-0002",
            format!("cannot combine {} and {} amounts", left, right),
        )
    }

    pub fn user_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Value, "USER-0001", message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Value, "IO-0002", message)
    }

    pub fn db(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Value, code, message)
    }

    pub fn security(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Security, code, message)
    }

    pub fn circular_import(path: &str) -> Self {
        Self::new(
            ErrorClass::Value,
            "IMPORT-0002",
            format!("circular import of '{}'", path),
        )
    }

    pub fn import_failed(path: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorClass::Value,
            "IMPORT-0004",
            format!("cannot import '{}': {}", path, reason),
        )
    }

    pub fn bad_syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Syntax, "SYN-0100", message)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} error", self.code, self.class.name())?;
        if self.position.is_known() {
            write!(f, " at {}", self.position)?;
        }
        write!(f, ": {}", self.message)?;
        for hint in &self.hints {
            write!(f, "\n  {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Verify argument count, shared by builtins and method dispatch
pub fn check_arity(name: &str, expected: usize, args: &[Value]) -> Result<(), RuntimeError> {
    if args.len() != expected {
        Err(RuntimeError::arity_mismatch(name, expected, args.len()))
    } else {
        Ok(())
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Pick the closest known name within edit distance 2
pub fn closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (levenshtein(target, c), c.as_str()))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_value_class_is_catchable() {
        assert!(RuntimeError::division_by_zero().is_catchable());
        assert!(RuntimeError::user_failure("boom").is_catchable());
        assert!(RuntimeError::io("file missing").is_catchable());
        assert!(!RuntimeError::type_mismatch("int", "string").is_catchable());
        assert!(!RuntimeError::arity_mismatch("f", 2, 1).is_catchable());
        assert!(!RuntimeError::undefined_variable("x", &[]).is_catchable());
        assert!(!RuntimeError::security("SEC-0002", "denied").is_catchable());
    }

    #[test]
    fn signals_are_never_catchable() {
        assert!(!RuntimeError::return_signal(Value::Null).is_catchable());
        assert!(!RuntimeError::stop_signal().is_catchable());
        assert!(RuntimeError::stop_signal().is_signal());
    }

    #[test]
    fn undefined_variable_suggests_close_names() {
        let known = vec!["counter".to_string(), "total".to_string()];
        let err = RuntimeError::undefined_variable("countre", &known);
        assert!(err.hints[0].contains("counter"));

        let err = RuntimeError::undefined_variable("zzzzz", &known);
        assert!(err.hints.is_empty());
    }

    #[test]
    fn context_param_error_has_guidance() {
        let err = RuntimeError::undefined_param("@params");
        assert_eq!(err.code, "PART-0002");
        assert_eq!(err.class, ErrorClass::Undefined);
        assert!(err.hints.len() >= 2);
    }

    #[test]
    fn display_includes_code_class_and_position() {
        let err = RuntimeError::division_by_zero().at(Position::new(4, 2));
        let rendered = err.to_string();
        assert!(rendered.contains("VAL-0001"));
        assert!(rendered.contains("value error"));
        assert!(rendered.contains("line 4, column 2"));
    }
}
