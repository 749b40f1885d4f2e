//! Handler for the `sorrel eval` subcommand.

use crate::interpreter::Evaluator;

use super::run_cmd::print_result;
use super::{parse_failure, CliError, SecurityArgs};

pub(crate) fn run_eval(source: &str, security: SecurityArgs, json: bool) -> Result<(), CliError> {
    let program = crate::parser::parse_program(source).map_err(|d| parse_failure(d, json))?;
    let ev = Evaluator::new().with_security(security.into_policy());
    let value = ev.eval_program(&program)?;
    print_result(&ev, &value, json)
}
