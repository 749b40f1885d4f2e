//! Lexer and parser for the Sorrel language.
//!
//! The evaluator consumes the AST produced here; programs with parse errors
//! are never evaluated.

pub mod ast;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;

#[cfg(test)]
mod tests;

pub use lexer::{tokenize, Token, TokenKind};
pub use parser::Parser;

use crate::diagnostics::ParseDiagnostic;

/// Parse a full program from source. Convenience wrapper used by the CLI,
/// the module loader, and tests.
pub fn parse_program(source: &str) -> Result<ast::Program, Vec<ParseDiagnostic>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}
