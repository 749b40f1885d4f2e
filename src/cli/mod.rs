//! Command-line interface for the Sorrel runtime
//!
//! Provides commands: run, eval, check

mod check_cmd;
mod eval_cmd;
mod run_cmd;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::Diagnostic;
use thiserror::Error;

use crate::diagnostics::ParseDiagnostic;
use crate::interpreter::error::RuntimeError;
use crate::interpreter::security::SecurityPolicy;

/// Sorrel - an embedded scripting language with capability-based security
#[derive(Parser, Debug)]
#[command(name = "sorrel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output results and diagnostics as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a Sorrel script
    Run {
        /// File to run
        file: PathBuf,

        /// Arguments exposed to the script as @args
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,

        /// Project root for ~/ imports (defaults to the script's directory)
        #[arg(long)]
        root: Option<PathBuf>,

        #[command(flatten)]
        security: SecurityArgs,
    },

    /// Evaluate a source string and print the result
    Eval {
        /// Source text
        source: String,

        #[command(flatten)]
        security: SecurityArgs,
    },

    /// Parse a file and report diagnostics without running it
    Check {
        /// File to check
        file: PathBuf,
    },
}

/// Security flags shared by the executing subcommands. Without any of them
/// scripts can read files and imports but cannot write or run processes.
#[derive(Args, Debug, Default)]
pub struct SecurityArgs {
    /// Deny all file reads (imports included)
    #[arg(long)]
    no_read: bool,

    /// Deny reads under these paths
    #[arg(long, value_name = "PATH")]
    restrict_read: Vec<PathBuf>,

    /// Deny all file writes, overriding any allow flags
    #[arg(long)]
    no_write: bool,

    /// Allow writes anywhere
    #[arg(long)]
    allow_write_all: bool,

    /// Allow writes under these paths
    #[arg(long, value_name = "PATH")]
    allow_write: Vec<PathBuf>,

    /// Deny writes under these paths even when otherwise allowed
    #[arg(long, value_name = "PATH")]
    restrict_write: Vec<PathBuf>,

    /// Allow executing any program
    #[arg(long)]
    allow_execute_all: bool,

    /// Allow executing these programs
    #[arg(long, value_name = "PATH")]
    allow_execute: Vec<PathBuf>,
}

impl SecurityArgs {
    fn into_policy(self) -> SecurityPolicy {
        SecurityPolicy {
            no_read: self.no_read,
            restrict_read: self.restrict_read,
            no_write: self.no_write,
            allow_write_all: self.allow_write_all,
            allow_write: self.allow_write,
            restrict_write: self.restrict_write,
            allow_execute_all: self.allow_execute_all,
            allow_execute: self.allow_execute,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("{0}")]
    #[diagnostic(code(sorrel::parse))]
    Parse(String),

    #[error(transparent)]
    #[diagnostic(code(sorrel::runtime))]
    Runtime(#[from] RuntimeError),

    #[error("cannot read '{path}': {source}")]
    #[diagnostic(code(sorrel::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fold parse diagnostics into one error, rendered per the output mode
fn parse_failure(diagnostics: Vec<ParseDiagnostic>, json: bool) -> CliError {
    let lines: Vec<String> = if json {
        diagnostics.iter().map(|d| d.to_json().to_string()).collect()
    } else {
        diagnostics.iter().map(|d| d.to_string()).collect()
    };
    CliError::Parse(lines.join("\n"))
}

impl Cli {
    /// Run the CLI
    pub fn run() -> Result<(), CliError> {
        let cli = Cli::parse();

        match cli.command {
            Command::Run {
                file,
                args,
                root,
                security,
            } => run_cmd::run_script(&file, args, root, security, cli.json),
            Command::Eval { source, security } => {
                eval_cmd::run_eval(&source, security, cli.json)
            }
            Command::Check { file } => check_cmd::run_check(&file, cli.json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn security_flags_map_onto_the_policy() {
        let cli = Cli::parse_from([
            "sorrel",
            "run",
            "--allow-write",
            "/tmp/out",
            "--restrict-read",
            "/etc",
            "--allow-execute",
            "/bin/echo",
            "script.sl",
        ]);
        let Command::Run { security, .. } = cli.command else {
            panic!("expected run command");
        };
        let policy = security.into_policy();
        assert_eq!(policy.allow_write, vec![PathBuf::from("/tmp/out")]);
        assert_eq!(policy.restrict_read, vec![PathBuf::from("/etc")]);
        assert_eq!(policy.allow_execute, vec![PathBuf::from("/bin/echo")]);
        assert!(!policy.allow_write_all);
    }

    #[test]
    fn script_args_follow_the_file() {
        let cli = Cli::parse_from(["sorrel", "run", "script.sl", "one", "two"]);
        let Command::Run { file, args, .. } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(file, PathBuf::from("script.sl"));
        assert_eq!(args, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn json_flag_is_global() {
        let cli = Cli::parse_from(["sorrel", "check", "script.sl", "--json"]);
        assert!(cli.json);
    }
}
