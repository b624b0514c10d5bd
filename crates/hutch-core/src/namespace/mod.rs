//! Linux namespace management for container isolation.
//!
//! The container process is created directly inside its new namespaces by
//! `clone(2)`; the user namespace is the exception, it is entered by the
//! child itself with `unshare(2)` so the runtime can map its ids from
//! outside (see [`user`]).

pub mod user;
pub mod uts;

use hutch_common::types::NamespaceSet;
use nix::sched::CloneFlags;

/// Maps the configured namespace set to the flags passed to `clone(2)`.
#[must_use]
pub fn clone_flags(set: &NamespaceSet) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    flags.set(CloneFlags::CLONE_NEWNS, set.mount);
    flags.set(CloneFlags::CLONE_NEWCGROUP, set.cgroup);
    flags.set(CloneFlags::CLONE_NEWPID, set.pid);
    flags.set(CloneFlags::CLONE_NEWIPC, set.ipc);
    flags.set(CloneFlags::CLONE_NEWNET, set.network);
    flags.set(CloneFlags::CLONE_NEWUTS, set.uts);
    tracing::debug!(?flags, "namespace clone flags");
    flags
}
