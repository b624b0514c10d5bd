//! Filesystem isolation for the container process.
//!
//! A [`MountSession`] names the staging directory a container's root is
//! assembled in. The same value is used twice: the container process calls
//! [`MountSession::setup`] on its copy to build the new root and pivot into
//! it, and the runtime calls [`MountSession::teardown`] on its own copy once
//! the container has exited. Both copies are computed once from the staging
//! directory and hostname, so teardown always removes exactly the directory
//! setup created.

pub mod mount;
pub mod pivot_root;

use std::path::{Path, PathBuf};

use hutch_common::constants::OLD_ROOT_PREFIX;
use hutch_common::error::Result;

/// Staging paths for one container's root filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSession {
    root: PathBuf,
    old_root_name: String,
}

impl MountSession {
    /// Plans a session rooted at `<staging_dir>/<hostname>`.
    #[must_use]
    pub fn new(staging_dir: &Path, hostname: &str) -> Self {
        Self {
            root: staging_dir.join(hostname),
            old_root_name: format!("{OLD_ROOT_PREFIX}{hostname}"),
        }
    }

    /// Directory that becomes the container's `/`.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the previous root is parked during `pivot_root`, before it
    /// becomes the process root.
    #[must_use]
    pub fn put_old(&self) -> PathBuf {
        self.root.join(&self.old_root_name)
    }

    /// Path of the previous root as seen once the pivot is done.
    #[must_use]
    pub fn old_root_after_pivot(&self) -> PathBuf {
        Path::new("/").join(&self.old_root_name)
    }

    /// Where a bind mount for `container_path` is attached under the new root.
    #[must_use]
    pub fn bind_target(&self, container_path: &Path) -> PathBuf {
        let relative = container_path.strip_prefix("/").unwrap_or(container_path);
        self.root.join(relative)
    }

    /// Builds the new root from `mount_dir` plus `binds` and pivots into it.
    ///
    /// Must run inside a fresh mount namespace. `binds` are
    /// `(host_path, container_path)` pairs, attached before the pivot so
    /// the host side is still reachable.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Mounts`](hutch_common::error::HutchError::Mounts)
    /// naming the path of the first failing step. Earlier steps are not
    /// rolled back.
    pub fn setup(&self, mount_dir: &Path, binds: &[(PathBuf, PathBuf)]) -> Result<()> {
        tracing::info!(
            mount_dir = %mount_dir.display(),
            root = %self.root.display(),
            "setting mount points"
        );
        mount::make_root_private()?;

        mount::create_dir(&self.root)?;
        mount::bind_mount(mount_dir, &self.root)?;

        let put_old = self.put_old();
        mount::create_dir(&put_old)?;

        for (host_path, container_path) in binds {
            let target = self.bind_target(container_path);
            mount::create_dir(&target)?;
            mount::bind_mount(host_path, &target)?;
        }

        pivot_root::pivot_root(&self.root, &put_old)?;
        pivot_root::detach_old_root(&self.old_root_after_pivot())?;

        tracing::info!("root pivoted");
        Ok(())
    }

    /// Removes the staging root left on the host.
    ///
    /// Runs in the runtime process after the container has exited. A root
    /// that was never created (the container failed first) is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Mounts`](hutch_common::error::HutchError::Mounts)
    /// if the directory exists but cannot be removed, e.g. because a mount
    /// was left behind inside it.
    pub fn teardown(self) -> Result<()> {
        if !self.root.exists() {
            tracing::debug!(root = %self.root.display(), "no staging root to remove");
            return Ok(());
        }
        mount::remove_dir(&self.root)?;
        tracing::info!(root = %self.root.display(), "staging root removed");
        Ok(())
    }
}
