//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`, and the old root can
//! then be unmounted entirely.

use std::path::Path;

use hutch_common::error::{HutchError, Result};
use nix::unistd::chdir;

use super::mount::{remove_dir, unmount};

/// Makes `new_root` the root mount and moves the previous root to `put_old`.
///
/// `new_root` must be a mount point and `put_old` a directory beneath it.
///
/// # Errors
///
/// Returns [`HutchError::Mounts`] if `pivot_root(2)` fails.
pub fn pivot_root(new_root: &Path, put_old: &Path) -> Result<()> {
    tracing::info!(new_root = %new_root.display(), "performing pivot_root");
    nix::unistd::pivot_root(new_root, put_old).map_err(|e| {
        HutchError::mounts(
            format!(
                "cannot pivot root to {} (old root in {})",
                new_root.display(),
                put_old.display()
            ),
            e,
        )
    })
}

/// Detaches and deletes the old root left behind by [`pivot_root`].
///
/// `old_root` is the path of the old root as seen from the new root.
///
/// # Errors
///
/// Returns [`HutchError::Mounts`] if changing to `/`, unmounting, or
/// removing the directory fails.
pub fn detach_old_root(old_root: &Path) -> Result<()> {
    tracing::debug!(old_root = %old_root.display(), "unmounting old root");
    // The working directory must not pin the tree being detached.
    chdir("/").map_err(|e| HutchError::mounts("cannot change directory to /", e))?;
    unmount(old_root)?;
    remove_dir(old_root)
}
