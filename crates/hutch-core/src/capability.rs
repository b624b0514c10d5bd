//! Linux capability management for least-privilege execution.
//!
//! Root inside the container keeps most of its powers, but a fixed set of
//! capabilities that reach outside the container (auditing, kernel modules,
//! raw I/O, MAC policy, boot/time/resource control, ...) is removed from the
//! bounding set, so it can never be regained, and from the inheritable set,
//! so the exec'd command does not start with it.
//!
//! After a switch away from uid 0 the effective set is empty, so
//! `CAP_SETPCAP` is raised from the permitted set first. That only works if
//! the switch kept the permitted set (`PR_SET_KEEPCAPS`).

use caps::{CapSet, Capability, CapsHashSet};
use hutch_common::error::{HutchError, Result};

/// Capabilities removed from the container process.
pub const DROPPED: [Capability; 21] = [
    Capability::CAP_AUDIT_CONTROL,
    Capability::CAP_AUDIT_READ,
    Capability::CAP_AUDIT_WRITE,
    Capability::CAP_BLOCK_SUSPEND,
    Capability::CAP_DAC_READ_SEARCH,
    Capability::CAP_DAC_OVERRIDE,
    Capability::CAP_FSETID,
    Capability::CAP_IPC_LOCK,
    Capability::CAP_MAC_ADMIN,
    Capability::CAP_MAC_OVERRIDE,
    Capability::CAP_MKNOD,
    Capability::CAP_SETFCAP,
    Capability::CAP_SYSLOG,
    Capability::CAP_SYS_ADMIN,
    Capability::CAP_SYS_BOOT,
    Capability::CAP_SYS_MODULE,
    Capability::CAP_SYS_NICE,
    Capability::CAP_SYS_RAWIO,
    Capability::CAP_SYS_RESOURCE,
    Capability::CAP_SYS_TIME,
    Capability::CAP_WAKE_ALARM,
];

/// Drops [`DROPPED`] from the bounding and inheritable sets of the calling thread.
///
/// Runs once, inside the container process, before exec.
///
/// # Errors
///
/// Returns [`HutchError::Capabilities`] if `CAP_SETPCAP` cannot be raised,
/// any bounding-set drop fails, or the inheritable set cannot be read or
/// committed.
pub fn setup() -> Result<()> {
    tracing::debug!(count = DROPPED.len(), "clearing unwanted capabilities");

    caps::raise(None, CapSet::Effective, Capability::CAP_SETPCAP)
        .map_err(|e| caps_error("cannot raise CAP_SETPCAP", &e))?;

    for cap in DROPPED {
        caps::drop(None, CapSet::Bounding, cap)
            .map_err(|e| caps_error(format!("cannot drop {cap} from the bounding set"), &e))?;
    }

    let inheritable = caps::read(None, CapSet::Inheritable)
        .map_err(|e| caps_error("cannot read the inheritable set", &e))?;
    let cleared = without_dropped(&inheritable);
    caps::set(None, CapSet::Inheritable, &cleared)
        .map_err(|e| caps_error("cannot commit the inheritable set", &e))?;

    tracing::info!(retained = cleared.len(), "capabilities dropped");
    Ok(())
}

/// Returns `set` minus every capability in [`DROPPED`].
#[must_use]
pub fn without_dropped(set: &CapsHashSet) -> CapsHashSet {
    set.iter()
        .copied()
        .filter(|cap| !DROPPED.contains(cap))
        .collect()
}

/// Must be called right after the failing `caps` call, whose errno it reads.
fn caps_error(context: impl Into<String>, err: &caps::errors::CapsError) -> HutchError {
    let os_error = std::io::Error::last_os_error();
    tracing::debug!(error = %err, "caps call failed");
    HutchError::capabilities(context, os_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hutch_common::error::ErrorKind;
    use hutch_common::types::UserNamespaceConfig;
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::{ForkResult, Pid, Uid, fork, getuid};

    use crate::ipc::{IpcChannel, Rendezvous};
    use crate::namespace::user::{self, IdentityOps};
    use crate::syscall::SyscallFilter;

    /// Runs `body` in a forked child and returns its exit code.
    ///
    /// Identity and capability changes are process-wide, so they must never
    /// reach the test runner. The child never returns to the harness.
    fn in_forked_child(body: impl FnOnce() -> i32) -> i32 {
        // SAFETY: the child only runs `body` and leaves through `_exit`.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body))
                    .unwrap_or(101);
                // SAFETY: skips the harness's atexit handlers and destructors.
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => wait_code(child),
        }
    }

    fn wait_code(pid: Pid) -> i32 {
        match waitpid(pid, None).unwrap() {
            WaitStatus::Exited(_, code) => code,
            other => panic!("unexpected wait status {other:?}"),
        }
    }

    #[test]
    fn capability_errors_keep_the_os_error() {
        // Without PR_SET_KEEPCAPS a switch away from root empties the
        // permitted set, as does never having been root.
        let code = in_forked_child(|| {
            if Uid::effective().is_root() && user::Kernel.set_uid(1000).is_err() {
                return 100;
            }
            match setup() {
                Err(e) if e.kind() == ErrorKind::Capabilities => e.raw_os_error().unwrap_or(0),
                Err(_) => 102,
                Ok(()) => 103,
            }
        });
        assert_eq!(code, libc::EPERM);
    }

    #[test]
    #[ignore = "needs root"]
    fn non_root_uid_completes_the_container_sequence() {
        let mut channel = IpcChannel::new().unwrap();
        let timeout = Some(Duration::from_secs(5));
        let parent = channel.parent_endpoint(timeout);
        let child_end = channel.child_endpoint(timeout);

        // SAFETY: the child only runs the container sequence and leaves through `_exit`.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let result = user::child_setup(&child_end, &user::Kernel, 1000)
                    .and_then(|()| setup())
                    .and_then(|()| SyscallFilter::setup()?.clean());
                let code = match result {
                    Ok(()) if getuid().as_raw() == 1000 => 0,
                    Ok(()) => 100,
                    Err(e) => e.exit_code(),
                };
                // SAFETY: skips the harness's atexit handlers and destructors.
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => {
                let mapped =
                    user::parent_map(&parent, child, &UserNamespaceConfig::default(), &user::Kernel)
                        .unwrap();
                parent.send_boolean(false).unwrap();
                assert!(mapped);
                assert_eq!(wait_code(child), 0);
            }
        }
        channel.close().unwrap();
    }

    #[test]
    fn dropped_list_has_no_duplicates() {
        let unique: CapsHashSet = DROPPED.iter().copied().collect();
        assert_eq!(unique.len(), DROPPED.len());
    }

    #[test]
    fn dropped_list_keeps_what_the_handshake_needs() {
        // The container still switches ids and chowns its own files.
        for needed in [
            Capability::CAP_SETUID,
            Capability::CAP_SETGID,
            Capability::CAP_CHOWN,
        ] {
            assert!(!DROPPED.contains(&needed), "{needed} must be retained");
        }
    }

    #[test]
    fn without_dropped_removes_only_listed_capabilities() {
        let set: CapsHashSet = [
            Capability::CAP_SYS_ADMIN,
            Capability::CAP_CHOWN,
            Capability::CAP_MKNOD,
            Capability::CAP_KILL,
        ]
        .into_iter()
        .collect();
        let cleared = without_dropped(&set);
        let expected: CapsHashSet = [Capability::CAP_CHOWN, Capability::CAP_KILL]
            .into_iter()
            .collect();
        assert_eq!(cleared, expected);
    }
}
