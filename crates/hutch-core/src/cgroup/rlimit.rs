//! Per-process resource limits applied alongside the cgroups.

use hutch_common::error::{HutchError, Result};
use nix::errno::Errno;
use nix::unistd::Pid;

/// Sets the soft and hard `RLIMIT_NOFILE` of `pid` to `limit`.
///
/// Uses `prlimit(2)` so the runtime can cap the container process from
/// outside instead of limiting itself.
///
/// # Errors
///
/// Returns [`HutchError::Cgroups`] if the kernel refuses the new limit.
pub fn set_nofile(pid: Pid, limit: u64) -> Result<()> {
    let new = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    // SAFETY: `new` outlives the call and the old-limit pointer may be null.
    let ret = unsafe {
        libc::prlimit(
            pid.as_raw(),
            libc::RLIMIT_NOFILE,
            &raw const new,
            std::ptr::null_mut(),
        )
    };
    Errno::result(ret)
        .map(drop)
        .map_err(|e| HutchError::cgroups(format!("RLIMIT_NOFILE={limit} for pid {pid}"), e))?;
    tracing::debug!(%pid, limit, "open file limit set");
    Ok(())
}

/// Reads the `(soft, hard)` `RLIMIT_NOFILE` of `pid`.
///
/// # Errors
///
/// Returns [`HutchError::Cgroups`] if the limit cannot be read.
pub fn nofile(pid: Pid) -> Result<(u64, u64)> {
    let mut old = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: a null new-limit pointer only reads into `old`, which outlives the call.
    let ret = unsafe {
        libc::prlimit(
            pid.as_raw(),
            libc::RLIMIT_NOFILE,
            std::ptr::null(),
            &raw mut old,
        )
    };
    Errno::result(ret)
        .map(drop)
        .map_err(|e| HutchError::cgroups(format!("RLIMIT_NOFILE of pid {pid}"), e))?;
    Ok((old.rlim_cur, old.rlim_max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn limit_applies_to_another_process() {
        let mut sleeper = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(i32::try_from(sleeper.id()).unwrap());

        let result = set_nofile(pid, 64).and_then(|()| nofile(pid));
        sleeper.kill().unwrap();
        let _status = sleeper.wait().unwrap();

        assert_eq!(result.unwrap(), (64, 64));
    }

    #[test]
    fn unknown_pid_is_a_cgroups_error() {
        let err = set_nofile(Pid::from_raw(i32::MAX), 64).unwrap_err();
        assert_eq!(err.kind(), hutch_common::error::ErrorKind::Cgroups);
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }
}
