//! Sorrel CLI - runs, evaluates, and checks Sorrel scripts

use std::process::ExitCode;

use sorrel::cli::Cli;

fn main() -> ExitCode {
    match Cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}
