//! Top-level container lifecycle.
//!
//! [`Container::start`] spawns the container process, runs the runtime half
//! of the setup, waits for the process, and always cleans up afterwards.
//! The first error wins: a setup failure is reported before a cleanup
//! failure, which is reported before the container's own exit status.

use hutch_common::error::{ErrorKind, HutchError, Result};
use hutch_common::types::ChildExit;
use hutch_core::cgroup::{CgroupHierarchy, ResourceController};
use hutch_core::filesystem::MountSession;
use hutch_core::ipc::{IpcChannel, Rendezvous};
use hutch_core::namespace::user;
use nix::unistd::Pid;

use crate::options::ContainerOptions;
use crate::process::ChildProcess;

/// A running container and every host resource attached to it.
#[derive(Debug)]
pub struct Container {
    options: ContainerOptions,
    channel: IpcChannel,
    child: Option<ChildProcess>,
    resources: ResourceController,
    mount_session: Option<MountSession>,
}

impl Container {
    /// Runs a container to completion and returns how its process exited.
    ///
    /// # Errors
    ///
    /// Returns the earliest error from spawning, setup, waiting, or cleanup.
    /// Cleanup is attempted whenever the process was spawned.
    pub fn start(options: ContainerOptions, channel: IpcChannel) -> Result<ChildExit> {
        let mut container = Self::new(options, channel)?;
        let created = container.create();
        settle(created, || container.clean_and_exit())
    }

    /// Spawns the container process. It blocks on the handshake until
    /// [`create`](Self::create) runs.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Cgroups`] if the cgroup mounts cannot be read,
    /// or [`HutchError::ChildProcess`] if the process cannot be cloned.
    pub fn new(options: ContainerOptions, channel: IpcChannel) -> Result<Self> {
        let hierarchy = CgroupHierarchy::detect(&options.cgroup_root)?;
        let resources = ResourceController::new(
            hierarchy,
            options.hostname.clone(),
            options.controls.clone(),
            options.nofile_limit,
        );
        let child = ChildProcess::spawn(&options)?;
        let mount_session = options.mount_session.clone();

        Ok(Self {
            options,
            channel,
            child: Some(child),
            resources,
            mount_session: Some(mount_session),
        })
    }

    /// Runs the runtime half of the setup, releases the container, and
    /// waits for it to exit.
    ///
    /// On any setup failure the container is told to abort instead of
    /// continuing; it is waited for in every case.
    ///
    /// # Errors
    ///
    /// Returns the setup error if there was one, else a failure to reply
    /// or to wait.
    pub fn create(&mut self) -> Result<ChildExit> {
        let child = self.child.take().ok_or_else(|| {
            HutchError::container(
                "container process already reaped",
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })?;
        let pid = child.pid();

        let prepared = self.prepare(pid);
        let abort = prepared.is_err();
        if let Err(e) = &prepared {
            tracing::error!(%pid, error = %e, "container setup failed, aborting");
        }
        let replied = self.options.parent_endpoint.send_boolean(abort);
        let exit = child.wait();

        // A container that dies during its own setup shows up here only as
        // a closed channel; its exit status says which step failed.
        if let (Err(e), Ok(exit)) = (&prepared, &exit) {
            let child_error = exit.code.and_then(ErrorKind::from_exit_code);
            tracing::error!(
                %pid,
                %exit,
                child_error = ?child_error,
                error = %e,
                "container process ended during setup"
            );
        }

        prepared?;
        replied?;
        exit
    }

    fn prepare(&mut self, pid: Pid) -> Result<()> {
        self.channel.close_child_end()?;

        let available = user::parent_map(
            &self.options.parent_endpoint,
            pid,
            &self.options.user_namespace,
            &user::Kernel,
        )?;
        if !available && self.options.user_namespace.required {
            return Err(HutchError::namespace(
                "user namespaces are required but unavailable",
                std::io::Error::from(std::io::ErrorKind::Unsupported),
            ));
        }

        self.resources.setup(pid)
    }

    /// Releases everything the container used: both IPC endpoints, the
    /// cgroups, and the staging root.
    ///
    /// # Errors
    ///
    /// Returns the first error; every step is attempted regardless.
    pub fn clean_and_exit(&mut self) -> Result<()> {
        tracing::debug!(hostname = %self.options.hostname, "cleaning container");
        let channel = self.channel.close();
        let cgroups = self.resources.clean();
        let mounts = self
            .mount_session
            .take()
            .map_or(Ok(()), MountSession::teardown);
        channel.and(cgroups).and(mounts)?;
        tracing::info!(hostname = %self.options.hostname, "container cleaned");
        Ok(())
    }
}

/// Runs `clean` after a container run and picks the result.
///
/// Cleanup always runs. A run error wins over a cleanup error, which wins
/// over the container's exit status.
fn settle(created: Result<ChildExit>, clean: impl FnOnce() -> Result<()>) -> Result<ChildExit> {
    let cleaned = clean();
    match (created, cleaned) {
        (Err(e), Err(clean_error)) => {
            tracing::error!(error = %clean_error, "cleanup also failed");
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
        (Ok(exit), Ok(())) => Ok(exit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;

    fn exited(code: i32) -> ChildExit {
        ChildExit {
            code: Some(code),
            signal: None,
        }
    }

    fn namespace_error() -> HutchError {
        HutchError::namespace("peer closed", io::Error::from(io::ErrorKind::UnexpectedEof))
    }

    fn cgroups_error() -> HutchError {
        HutchError::cgroups("pids/box", io::Error::from_raw_os_error(libc::EBUSY))
    }

    #[test]
    fn cleanup_runs_when_the_run_failed() {
        let cleaned = Cell::new(false);
        let result = settle(Err(namespace_error()), || {
            cleaned.set(true);
            Ok(())
        });
        assert!(cleaned.get());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Namespace);
    }

    #[test]
    fn run_error_wins_over_cleanup_error() {
        let err = settle(Err(namespace_error()), || Err(cgroups_error())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Namespace);
    }

    #[test]
    fn cleanup_error_wins_over_the_exit_status() {
        let err = settle(Ok(exited(0)), || Err(cgroups_error())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cgroups);
        assert_eq!(err.raw_os_error(), Some(libc::EBUSY));
    }

    #[test]
    fn clean_run_returns_the_exit_status() {
        let exit = settle(Ok(exited(3)), || Ok(())).unwrap();
        assert_eq!(exit, exited(3));
    }
}
