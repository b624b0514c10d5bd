//! `hutch check`: report what this host supports.

use std::path::PathBuf;

use clap::Args;
use hutch_common::constants::CGROUP_V1_PATH;
use hutch_common::types::Control;
use hutch_core::cgroup::CgroupHierarchy;
use hutch_runtime::environment;

use crate::output;

/// Arguments for the `check` command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Root of the cgroup v1 hierarchies to inspect.
    #[arg(long, default_value = CGROUP_V1_PATH)]
    pub cgroup_root: PathBuf,
}

/// Executes the `check` command.
///
/// Controllers and user namespaces are informational; only an unsupported
/// kernel or architecture fails the check.
///
/// # Errors
///
/// Returns an error if the host is unsupported or the mount table cannot
/// be read.
pub fn execute(args: &CheckArgs, debug: bool) -> anyhow::Result<i32> {
    crate::init_logging(debug);

    let host = environment::check();
    match &host {
        Ok(host) => output::status(true, "kernel", &format!("{} on {}", host.release, host.machine)),
        Err(e) => output::status(false, "kernel", &e.to_string()),
    }

    let hierarchy = CgroupHierarchy::detect(&args.cgroup_root)?;
    for control in Control::defaults() {
        let supported = hierarchy.supports(&control.control);
        let detail = if supported { "mounted" } else { "not mounted, will be skipped" };
        output::status(supported, &format!("cgroup {}", control.control), detail);
    }

    let userns = environment::user_namespaces_enabled();
    output::status(
        userns,
        "user namespaces",
        if userns { "enabled" } else { "disabled" },
    );

    let _host = host?;
    Ok(0)
}
