//! CLI command definitions and dispatch.

pub mod check;
pub mod run;

use clap::{Parser, Subcommand};

/// hutch: a minimal Linux container runtime.
#[derive(Parser, Debug)]
#[command(name = hutch_common::constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level.
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command inside a new container and wait for it.
    Run(run::RunArgs),
    /// Report whether this host can run containers.
    Check(check::CheckArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// Returns the process exit status to report.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Run(args) => run::execute(args, cli.debug),
        Command::Check(args) => check::execute(&args, cli.debug),
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
    fn debug_flag_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["hutch", "check", "--debug"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(cli.command, Command::Check(_)));
    }
}
