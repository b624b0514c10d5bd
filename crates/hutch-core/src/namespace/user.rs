//! User namespace isolation.
//!
//! Root inside the container is mapped to an unprivileged range of host
//! ids. The container process cannot write its own maps, so the setup is a
//! handshake over the rendezvous channel:
//!
//! 1. the child tries `unshare(CLONE_NEWUSER)` and sends whether it worked;
//! 2. the runtime writes `/proc/<pid>/uid_map` and `gid_map` when it did;
//! 3. the runtime replies with an abort flag (`false` to continue);
//! 4. the child switches to the configured uid/gid, keeping its
//!    capabilities so it can still drop them before exec.

use std::path::PathBuf;

use hutch_common::error::{HutchError, Result};
use hutch_common::types::UserNamespaceConfig;
use nix::sched::{CloneFlags, unshare};
use nix::sys::prctl;
use nix::unistd::{Gid, Pid, Uid, setgroups, setresgid, setresuid};

use crate::ipc::Rendezvous;

/// The kernel calls the handshake makes, so the protocol can be driven
/// against a recording fake.
pub trait IdentityOps {
    /// Moves the caller into a new user namespace. Returns whether it worked.
    fn unshare_user(&self) -> bool;

    /// Replaces the supplementary group list with `gid`.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Namespace`] on failure.
    fn set_groups(&self, gid: u32) -> Result<()>;

    /// Keeps the permitted capabilities across a switch away from uid 0.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Namespace`] on failure.
    fn keep_capabilities(&self) -> Result<()>;

    /// Sets real, effective, and saved gid.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Namespace`] on failure.
    fn set_gid(&self, gid: u32) -> Result<()>;

    /// Sets real, effective, and saved uid.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Namespace`] on failure.
    fn set_uid(&self, uid: u32) -> Result<()>;

    /// Writes `line` to `/proc/<pid>/<map>`.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Namespace`] on failure.
    fn write_map(&self, pid: i32, map: &str, line: &str) -> Result<()>;
}

/// [`IdentityOps`] backed by the real system calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kernel;

impl IdentityOps for Kernel {
    fn unshare_user(&self) -> bool {
        match unshare(CloneFlags::CLONE_NEWUSER) {
            Ok(()) => true,
            Err(errno) => {
                tracing::debug!(%errno, "unshare(CLONE_NEWUSER) refused");
                false
            }
        }
    }

    fn set_groups(&self, gid: u32) -> Result<()> {
        setgroups(&[Gid::from_raw(gid)])
            .map_err(|e| HutchError::namespace(format!("cannot set groups to [{gid}]"), e))
    }

    fn keep_capabilities(&self) -> Result<()> {
        prctl::set_keepcaps(true)
            .map_err(|e| HutchError::namespace("cannot set PR_SET_KEEPCAPS", e))
    }

    fn set_gid(&self, gid: u32) -> Result<()> {
        let gid = Gid::from_raw(gid);
        setresgid(gid, gid, gid)
            .map_err(|e| HutchError::namespace(format!("cannot switch to gid {gid}"), e))
    }

    fn set_uid(&self, uid: u32) -> Result<()> {
        let uid = Uid::from_raw(uid);
        setresuid(uid, uid, uid)
            .map_err(|e| HutchError::namespace(format!("cannot switch to uid {uid}"), e))
    }

    fn write_map(&self, pid: i32, map: &str, line: &str) -> Result<()> {
        let path = PathBuf::from(format!("/proc/{pid}/{map}"));
        std::fs::write(&path, line)
            .map_err(|e| HutchError::namespace(path.display().to_string(), e))
    }
}

/// Container side of the handshake.
///
/// Runs inside the new process before it execs. The gid is the uid.
///
/// # Errors
///
/// Returns [`HutchError::Namespace`] if the runtime aborts, the channel
/// fails or times out, or a privilege switch fails.
pub fn child_setup<R, I>(channel: &R, ops: &I, uid: u32) -> Result<()>
where
    R: Rendezvous + ?Sized,
    I: IdentityOps + ?Sized,
{
    tracing::debug!(uid, "setting up user namespace");
    let available = ops.unshare_user();

    channel
        .send_boolean(available)
        .map_err(|e| handshake_error("cannot report user namespace support", e))?;
    let abort = channel
        .recv_boolean()
        .map_err(|e| handshake_error("no reply from the runtime", e))?;
    if abort {
        return Err(HutchError::namespace(
            "runtime aborted the container setup",
            std::io::Error::from(std::io::ErrorKind::Interrupted),
        ));
    }

    if available {
        tracing::info!("user namespace set up");
    } else {
        tracing::warn!("user namespace not supported, continuing");
    }

    let gid = uid;
    ops.keep_capabilities()?;
    ops.set_groups(gid)?;
    ops.set_gid(gid)?;
    ops.set_uid(uid)?;
    tracing::debug!(uid, gid, "switched identity");
    Ok(())
}

/// Runtime side of the handshake, up to but excluding the reply.
///
/// Returns whether the container entered a user namespace. The caller
/// decides whether to continue and sends the abort flag.
///
/// # Errors
///
/// Returns [`HutchError::Namespace`] if the channel fails or times out, or
/// a map cannot be written.
pub fn parent_map<R, I>(
    channel: &R,
    pid: Pid,
    config: &UserNamespaceConfig,
    ops: &I,
) -> Result<bool>
where
    R: Rendezvous + ?Sized,
    I: IdentityOps + ?Sized,
{
    let available = channel
        .recv_boolean()
        .map_err(|e| handshake_error("no user namespace report from the container", e))?;
    if !available {
        tracing::warn!(%pid, "no user namespace set up by the container process");
        return Ok(false);
    }

    let line = config.map_line();
    for map in ["uid_map", "gid_map"] {
        ops.write_map(pid.as_raw(), map, &line)?;
    }
    tracing::debug!(%pid, map = %line, "uid/gid maps written");
    Ok(true)
}

/// Rewraps a channel failure as a handshake failure, keeping the OS error.
fn handshake_error(step: &str, err: HutchError) -> HutchError {
    match err {
        HutchError::Socket { context, source } => {
            HutchError::namespace(format!("{step}: {context}"), source)
        }
        other => other,
    }
}
