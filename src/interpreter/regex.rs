//! Regex values.
//!
//! Literal patterns (`r/[a-z]+/i`) are validated at parse time by the caller;
//! dynamically built patterns surface compile failures as runtime syntax
//! errors. Flags map onto the engine's inline modifiers.

use std::sync::Arc;

use regex::Regex;

use crate::interpreter::error::RuntimeError;

#[derive(Debug, Clone)]
pub struct RegexValue {
    pub pattern: String,
    pub flags: String,
    pub compiled: Arc<Regex>,
}

impl RegexValue {
    /// Compile a pattern with Sorrel flags: `i` (case-insensitive),
    /// `m` (multi-line), `s` (dot matches newline)
    pub fn compile(pattern: &str, flags: &str) -> Result<Self, RuntimeError> {
        let mut modifiers = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' => modifiers.push(flag),
                other => {
                    return Err(RuntimeError::bad_syntax(format!(
                        "unknown regex flag '{}'",
                        other
                    )));
                }
            }
        }
        let full = if modifiers.is_empty() {
            pattern.to_string()
        } else {
            format!("(?{}){}", modifiers, pattern)
        };
        let compiled = Regex::new(&full)
            .map_err(|e| RuntimeError::bad_syntax(format!("invalid regex: {}", e)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
            compiled: Arc::new(compiled),
        })
    }

    pub fn format(&self) -> String {
        format!("r/{}/{}", self.pattern, self.flags)
    }
}

impl PartialEq for RegexValue {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.flags == other.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_flag() {
        let re = RegexValue::compile("hello", "i").unwrap();
        assert!(re.compiled.is_match("HELLO world"));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = RegexValue::compile("x", "g").unwrap_err();
        assert_eq!(err.code, "SYN-0100");
    }

    #[test]
    fn invalid_pattern_is_a_syntax_error() {
        let err = RegexValue::compile("[unclosed", "").unwrap_err();
        assert!(!err.is_catchable());
    }
}
