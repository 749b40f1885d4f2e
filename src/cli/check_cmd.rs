//! Handler for the `sorrel check` subcommand.

use std::path::Path;

use super::{parse_failure, CliError};

pub(crate) fn run_check(file: &Path, json: bool) -> Result<(), CliError> {
    let source = std::fs::read_to_string(file).map_err(|e| CliError::Io {
        path: file.to_path_buf(),
        source: e,
    })?;
    match crate::parser::parse_program(&source) {
        Ok(program) => {
            if json {
                println!("{}", serde_json::json!({ "ok": true }));
            } else {
                println!(
                    "{}: {} statements, no errors",
                    file.display(),
                    program.statements.len()
                );
            }
            Ok(())
        }
        Err(diagnostics) => Err(parse_failure(diagnostics, json)),
    }
}
