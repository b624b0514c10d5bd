//! Formatted output helpers for CLI commands.

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Formats one line of a host report, e.g. `  ok    cgroup pids: mounted`.
#[must_use]
pub fn status_line(ok: bool, label: &str, detail: &str) -> String {
    let (color, mark) = if ok { (GREEN, "ok") } else { (YELLOW, "warn") };
    format!("  {color}{mark:<5}{RESET} {label}: {detail}")
}

/// Prints a [`status_line`] to stdout.
#[allow(clippy::print_stdout)]
pub fn status(ok: bool, label: &str, detail: &str) {
    println!("{}", status_line(ok, label, detail));
}
