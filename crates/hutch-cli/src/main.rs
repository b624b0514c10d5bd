//! # hutch
//!
//! Runs one command inside a fresh set of Linux namespaces, with its own
//! root filesystem, a reduced capability set, a seccomp filter, and cgroup
//! limits, then cleans up after it.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use hutch_common::error::HutchError;

use crate::commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match commands::execute(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            tracing::error!(error = %err, "hutch failed");
            #[allow(clippy::print_stderr)]
            {
                eprintln!("hutch: {err:#}");
            }
            exit_code(
                err.downcast_ref::<HutchError>()
                    .map_or(1, HutchError::exit_code),
            )
        }
    }
}

/// Installs the global subscriber. `debug` raises the default level; an
/// explicit `RUST_LOG` still wins.
pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // A second init (tests, repeated calls) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
