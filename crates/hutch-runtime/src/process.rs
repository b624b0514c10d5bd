//! Process spawning inside isolated namespaces.
//!
//! The container process is created with `clone(2)` on a private heap
//! stack, directly inside the configured namespaces. It receives a copy of
//! the [`ContainerOptions`], isolates itself, and replaces its image with
//! the target command.

use std::convert::Infallible;

use hutch_common::error::{HutchError, Result};
use hutch_common::types::ChildExit;
use hutch_core::capability;
use hutch_core::ipc::close_raw;
use hutch_core::namespace::{self, user};
use hutch_core::syscall::SyscallFilter;
use nix::sched::clone;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, execve};

use crate::options::ContainerOptions;

/// Stack reserved for the container process until it execs.
const STACK_SIZE: usize = 1024 * 1024;

/// Handle to a spawned container process.
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
}

impl ChildProcess {
    /// Clones the container process under `options.clone_flags`.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::ChildProcess`] if `clone(2)` fails.
    pub fn spawn(options: &ContainerOptions) -> Result<Self> {
        let mut stack = vec![0u8; STACK_SIZE];
        let child_options = options.clone();
        let entry = Box::new(move || child_main(&child_options));

        // SAFETY: without CLONE_VM the child runs on a copy of this address
        // space, so `stack` and the captured options stay valid for it even
        // once the parent frees them.
        let pid = unsafe {
            clone(
                entry,
                &mut stack,
                options.clone_flags,
                Some(Signal::SIGCHLD as i32),
            )
        }
        .map_err(|e| HutchError::child_process("cannot clone the container process", e))?;

        tracing::info!(%pid, hostname = %options.hostname, "container process spawned");
        Ok(Self { pid })
    }

    /// Pid of the container process, as seen from the runtime.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Blocks until the container process terminates.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Container`] if `waitpid(2)` fails.
    pub fn wait(self) -> Result<ChildExit> {
        tracing::debug!(pid = %self.pid, "waiting for the container process");
        loop {
            let status = waitpid(self.pid, Some(WaitPidFlag::__WALL))
                .map_err(|e| HutchError::container(format!("cannot wait for pid {}", self.pid), e))?;
            let exit = match status {
                WaitStatus::Exited(_, code) => ChildExit {
                    code: Some(code),
                    signal: None,
                },
                WaitStatus::Signaled(_, signal, _) => ChildExit {
                    code: None,
                    signal: Some(signal as i32),
                },
                other => {
                    tracing::trace!(?other, "ignoring non-terminal wait status");
                    continue;
                }
            };
            tracing::info!(pid = %self.pid, %exit, "container process finished");
            return Ok(exit);
        }
    }
}

/// Entry point of the container process. Only returns on failure.
fn child_main(options: &ContainerOptions) -> isize {
    match setup_and_exec(options) {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(error = %e, "container setup failed");
            isize::try_from(e.exit_code()).unwrap_or(-1)
        }
    }
}

fn setup_and_exec(options: &ContainerOptions) -> Result<Infallible> {
    // Only the runtime may hold the parent end, or it would never see us hang up.
    close_raw(options.parent_endpoint.raw_fd())
        .map_err(|e| HutchError::socket("cannot close the parent socket in the container", e))?;

    if options.sets_hostname() {
        namespace::uts::set_hostname(&options.hostname)?;
    }
    options
        .mount_session
        .setup(&options.mount_dir, &options.mounts)?;
    user::child_setup(&options.child_endpoint, &user::Kernel, options.uid)?;
    capability::setup()?;
    SyscallFilter::setup()?.clean()?;

    tracing::info!(path = ?options.path, argv = ?options.argv, "starting container command");
    let env: [&std::ffi::CStr; 0] = [];
    let err = match execve(&options.path, &options.argv, &env) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    Err(HutchError::exec(
        options.path.to_string_lossy().into_owned(),
        err,
    ))
}
