//! Mount utilities for container filesystem setup.
//!
//! Thin wrappers over `mount(2)`, `umount2(2)`, and directory handling that
//! attach the offending path to every error.

use std::path::Path;

use hutch_common::error::{HutchError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};

/// Remounts `/` recursively with private propagation.
///
/// Nothing mounted or unmounted afterwards in this mount namespace is
/// propagated back to the host.
///
/// # Errors
///
/// Returns [`HutchError::Mounts`] if the remount fails.
pub fn make_root_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| HutchError::mounts("cannot remount / as private", e))?;
    tracing::debug!("remounted / with private propagation");
    Ok(())
}

/// Creates a private bind mount of `source` on `target`.
///
/// # Errors
///
/// Returns [`HutchError::Mounts`] if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| {
        HutchError::mounts(
            format!("cannot mount {} to {}", source.display(), target.display()),
            e,
        )
    })?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "created bind mount"
    );
    Ok(())
}

/// Lazily detaches the filesystem mounted at `target`.
///
/// # Errors
///
/// Returns [`HutchError::Mounts`] if `umount2(2)` fails.
pub fn unmount(target: &Path) -> Result<()> {
    umount2(target, MntFlags::MNT_DETACH)
        .map_err(|e| HutchError::mounts(format!("unable to umount {}", target.display()), e))?;
    tracing::debug!(path = %target.display(), "unmounted");
    Ok(())
}

/// Creates `path` and any missing parents.
///
/// # Errors
///
/// Returns [`HutchError::Mounts`] if the directory cannot be created.
pub fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        HutchError::mounts(format!("cannot create directory {}", path.display()), e)
    })
}

/// Removes the empty directory at `path`.
///
/// # Errors
///
/// Returns [`HutchError::Mounts`] if the directory is missing, not empty,
/// or cannot be removed.
pub fn remove_dir(path: &Path) -> Result<()> {
    std::fs::remove_dir(path).map_err(|e| {
        HutchError::mounts(format!("unable to delete directory {}", path.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_remove_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        create_dir(&nested).unwrap();
        assert!(nested.is_dir());
        remove_dir(&nested).unwrap();
        assert!(!nested.exists());
    }

    #[test]
    fn remove_dir_refuses_non_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file"), b"x").unwrap();
        let err = remove_dir(dir.path()).unwrap_err();
        assert_eq!(err.kind(), hutch_common::error::ErrorKind::Mounts);
        assert!(err.to_string().contains(&dir.path().display().to_string()));
    }
}
