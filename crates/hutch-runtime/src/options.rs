//! Resolved, immutable options for one container.
//!
//! [`ContainerOptions`] is built once from a validated [`ContainerConfig`]
//! and never mutated. A copy travels into the container process at clone
//! time, so everything the child needs (C strings for `execve`, canonical
//! host paths, the mount plan, the IPC endpoints) is prepared here, while
//! the runtime can still report errors normally.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hutch_common::config::ContainerConfig;
use hutch_common::error::{HutchError, Result};
use hutch_common::types::{Control, UserNamespaceConfig};
use hutch_core::filesystem::MountSession;
use hutch_core::ipc::{Endpoint, IpcChannel};
use hutch_core::namespace;
use nix::sched::CloneFlags;

/// Everything needed to start and supervise one container.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Debug logging requested.
    pub debug: bool,
    /// Executable, resolved inside the new root.
    pub path: CString,
    /// Full argument vector, `argv[0]` included.
    pub argv: Vec<CString>,
    /// Canonical host directory used as the container root.
    pub mount_dir: PathBuf,
    /// Uid (and gid) the command runs as.
    pub uid: u32,
    /// Container hostname.
    pub hostname: String,
    /// `(host_path, container_path)` bind mounts; host paths are canonical,
    /// container paths relative to the new root.
    pub mounts: Vec<(PathBuf, PathBuf)>,
    /// Namespaces the container is cloned into.
    pub clone_flags: CloneFlags,
    /// Runtime end of the rendezvous channel.
    pub parent_endpoint: Endpoint,
    /// Container end of the rendezvous channel.
    pub child_endpoint: Endpoint,
    /// Cgroup controls applied to the container.
    pub controls: Vec<Control>,
    /// User-namespace mapping and policy.
    pub user_namespace: UserNamespaceConfig,
    /// Staging root plan shared by the container and the runtime.
    pub mount_session: MountSession,
    /// Root of the cgroup v1 hierarchies.
    pub cgroup_root: PathBuf,
    /// `RLIMIT_NOFILE` for the container.
    pub nofile_limit: u64,
}

impl ContainerOptions {
    /// Validates `config` and resolves it against `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Configfile`] if the configuration is invalid, a
    /// path cannot be resolved, or an argument contains a NUL byte.
    pub fn new(config: &ContainerConfig, channel: &IpcChannel) -> Result<Self> {
        config.validate()?;

        let argv = config
            .command
            .argv()
            .into_iter()
            .map(|arg| {
                CString::new(arg).map_err(|e| invalid(format!("invalid argument: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let path = argv
            .first()
            .cloned()
            .ok_or_else(|| invalid("command must not be empty"))?;

        let mount_dir = canonicalize(&config.mount_dir)?;
        let mounts = config
            .mounts
            .iter()
            .map(|bind| {
                Ok((
                    canonicalize(&bind.host_path)?,
                    relative_to_root(&bind.container_path),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let hostname = config.resolve_hostname();
        let timeout = match config.ipc_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let options = Self {
            debug: config.debug,
            path,
            argv,
            mount_dir,
            uid: config.uid,
            mount_session: MountSession::new(&config.staging_dir, &hostname),
            hostname,
            mounts,
            clone_flags: namespace::clone_flags(&config.namespaces),
            parent_endpoint: channel.parent_endpoint(timeout),
            child_endpoint: channel.child_endpoint(timeout),
            controls: config.controls(),
            user_namespace: config.user_namespace,
            cgroup_root: config.cgroup_root.clone(),
            nofile_limit: config.nofile_limit,
        };
        tracing::debug!(
            hostname = %options.hostname,
            path = ?options.path,
            mount_dir = %options.mount_dir.display(),
            uid = options.uid,
            "container options resolved"
        );
        Ok(options)
    }

    /// Whether the container gets its own UTS namespace, and so its hostname.
    #[must_use]
    pub fn sets_hostname(&self) -> bool {
        self.clone_flags.contains(CloneFlags::CLONE_NEWUTS)
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .map_err(|e| invalid(format!("cannot resolve {}: {e}", path.display())))
}

/// Strips leading `/` so the path can be joined under the new root.
fn relative_to_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::RootDir))
        .collect()
}

fn invalid(message: impl Into<String>) -> HutchError {
    HutchError::Configfile {
        path: PathBuf::new(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hutch_common::config::CommandLine;
    use hutch_common::types::BindMount;

    fn config_in(dir: &Path) -> ContainerConfig {
        ContainerConfig {
            command: CommandLine::Line("/bin/sh -c true".into()),
            mount_dir: dir.to_path_buf(),
            hostname: Some("test1".into()),
            ..ContainerConfig::default()
        }
    }

    #[test]
    fn resolves_command_paths_and_mount_plan() {
        let root = tempfile::tempdir().unwrap();
        let host = tempfile::tempdir().unwrap();
        let mut config = config_in(root.path());
        config.mounts.push(BindMount {
            host_path: host.path().to_path_buf(),
            container_path: PathBuf::from("/usr/lib"),
        });
        let mut channel = IpcChannel::new().unwrap();

        let options = ContainerOptions::new(&config, &channel).unwrap();
        assert_eq!(options.path.to_str().unwrap(), "/bin/sh");
        assert_eq!(options.argv.len(), 3);
        assert_eq!(options.mount_dir, root.path().canonicalize().unwrap());
        assert_eq!(
            options.mounts,
            [(host.path().canonicalize().unwrap(), PathBuf::from("usr/lib"))]
        );
        assert_eq!(options.mount_session.root(), Path::new("/tmp/hutch/test1"));
        assert_eq!(options.parent_endpoint.raw_fd(), channel.raw_fds().0);
        assert_eq!(options.child_endpoint.raw_fd(), channel.raw_fds().1);
        assert!(options.clone_flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(options.sets_hostname());
        assert_eq!(options.controls, Control::defaults());
        channel.close().unwrap();
    }

    #[test]
    fn missing_bind_source_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config_in(root.path());
        config.mounts.push(BindMount {
            host_path: root.path().join("nope"),
            container_path: PathBuf::from("/nope"),
        });
        let mut channel = IpcChannel::new().unwrap();
        let err = ContainerOptions::new(&config, &channel).unwrap_err();
        assert_eq!(err.kind(), hutch_common::error::ErrorKind::Configfile);
        channel.close().unwrap();
    }

    #[test]
    fn nul_bytes_in_arguments_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config_in(root.path());
        config.command = CommandLine::Argv(vec!["/bin/echo".into(), "a\0b".into()]);
        let mut channel = IpcChannel::new().unwrap();
        assert!(ContainerOptions::new(&config, &channel).is_err());
        channel.close().unwrap();
    }

    #[test]
    fn container_paths_lose_their_root() {
        assert_eq!(relative_to_root(Path::new("/lib64")), PathBuf::from("lib64"));
        assert_eq!(relative_to_root(Path::new("usr/bin")), PathBuf::from("usr/bin"));
    }
}
