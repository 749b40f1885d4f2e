//! Handler for the `sorrel run` subcommand.

use std::path::{Path, PathBuf};

use crate::interpreter::Evaluator;

use super::{CliError, SecurityArgs};

pub(crate) fn run_script(
    file: &Path,
    args: Vec<String>,
    root: Option<PathBuf>,
    security: SecurityArgs,
    json: bool,
) -> Result<(), CliError> {
    let ev = Evaluator::new().with_security(security.into_policy());
    ev.set_args(args);
    if let Some(root) = root {
        ev.env().set_root_path(root);
    }
    let value = ev.run_file(file)?;
    print_result(&ev, &value, json)
}

/// Print a script's final value; `null` results print nothing
pub(super) fn print_result(
    ev: &Evaluator,
    value: &crate::interpreter::value::Value,
    json: bool,
) -> Result<(), CliError> {
    if matches!(value, crate::interpreter::value::Value::Null) {
        return Ok(());
    }
    if json {
        let encoded = crate::interpreter::builtins::value_to_json(ev, value)?;
        println!("{}", encoded);
    } else {
        println!("{}", ev.inspect_value(value)?);
    }
    Ok(())
}
