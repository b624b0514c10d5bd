//! Unified error taxonomy for the hutch workspace.
//!
//! Every variant that wraps an operating-system failure carries the context
//! of the failed operation (usually a path or setting name) and the
//! [`std::io::Error`] captured at the failure point, so the raw OS error
//! code survives all the way to the exit message.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Classification of a [`HutchError`], independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// IPC channel I/O failure.
    Socket,
    /// The container process could not be created.
    ChildProcess,
    /// Waiting for the container process failed.
    Container,
    /// The container hostname could not be set.
    Hostname,
    /// Mount, bind, pivot, unmount, or staging directory failure.
    Mounts,
    /// User-namespace detection, UID/GID mapping, or privilege drop failure.
    Namespace,
    /// Seccomp filter build, compile, or load failure.
    Systemcall,
    /// Cgroup directory, setting, tasks, or rlimit failure.
    Cgroups,
    /// Process image replacement failure.
    Exec,
    /// Capability bounding set or inheritable set failure.
    Capabilities,
    /// Generic OS call failure.
    Unix,
    /// The host kernel or architecture is not supported.
    Environment,
    /// Invalid command-line usage.
    Cli,
    /// The configuration file could not be read or is invalid.
    Configfile,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::Socket,
        Self::ChildProcess,
        Self::Container,
        Self::Hostname,
        Self::Mounts,
        Self::Namespace,
        Self::Systemcall,
        Self::Cgroups,
        Self::Exec,
        Self::Capabilities,
        Self::Unix,
        Self::Environment,
        Self::Cli,
        Self::Configfile,
    ];

    /// The kind a container process reported through its exit status.
    #[must_use]
    pub fn from_exit_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.exit_code() == code)
    }

    /// Process exit status reported for an error of this kind.
    ///
    /// Codes are distinct per kind so a failing container child can
    /// report *where* its setup stopped through its exit status alone.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Cli => 2,
            Self::Configfile => 3,
            Self::Socket => 10,
            Self::ChildProcess => 11,
            Self::Container => 12,
            Self::Hostname => 13,
            Self::Mounts => 14,
            Self::Namespace => 15,
            Self::Systemcall => 16,
            Self::Cgroups => 17,
            Self::Exec => 18,
            Self::Capabilities => 19,
            Self::Unix => 20,
            Self::Environment => 21,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Socket => "socket",
            Self::ChildProcess => "child process",
            Self::Container => "container",
            Self::Hostname => "hostname",
            Self::Mounts => "mounts",
            Self::Namespace => "namespace",
            Self::Systemcall => "system call",
            Self::Cgroups => "cgroups",
            Self::Exec => "exec",
            Self::Capabilities => "capabilities",
            Self::Unix => "unix",
            Self::Environment => "environment",
            Self::Cli => "cli",
            Self::Configfile => "config file",
        };
        f.write_str(name)
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HutchError {
    /// IPC channel I/O failed.
    #[error("socket error: {context}: {source}")]
    Socket {
        /// Operation that failed.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// `clone(2)` of the container process failed.
    #[error("child process error: {context}: {source}")]
    ChildProcess {
        /// Operation that failed.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Waiting for the container process failed.
    #[error("container error: {context}: {source}")]
    Container {
        /// Operation that failed.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// `sethostname(2)` failed.
    #[error("hostname error: {context}: {source}")]
    Hostname {
        /// Hostname that could not be set.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A mount, bind mount, `pivot_root`, unmount, or directory operation failed.
    #[error("mounts error: {context}: {source}")]
    Mounts {
        /// Path involved in the failed operation.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// The user-namespace handshake, mapping, or privilege drop failed.
    #[error("namespace error: {context}: {source}")]
    Namespace {
        /// Operation that failed.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Building or loading the seccomp filter failed.
    #[error("system call filter error: {context}: {source}")]
    Systemcall {
        /// Operation that failed.
        context: String,
        /// Underlying error.
        source: io::Error,
    },

    /// A cgroup or resource limit operation failed.
    #[error("cgroups error: {context}: {source}")]
    Cgroups {
        /// Controller, setting, or path involved.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// `execve(2)` failed.
    #[error("exec error: {context}: {source}")]
    Exec {
        /// Executable that could not be started.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Dropping capabilities failed.
    #[error("capabilities error: {context}: {source}")]
    Capabilities {
        /// Capability or set involved.
        context: String,
        /// Underlying error.
        source: io::Error,
    },

    /// A generic OS call failed.
    #[error("unix error: {context}: {source}")]
    Unix {
        /// Operation that failed.
        context: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// The host does not meet the runtime's requirements.
    #[error("environment error: {message}")]
    Environment {
        /// Description of the unmet requirement.
        message: String,
    },

    /// Invalid command-line usage.
    #[error("invalid argument: {message}")]
    Cli {
        /// Description of the invalid argument.
        message: String,
    },

    /// The configuration file could not be read or parsed, or holds invalid values.
    #[error("invalid configuration file {path}: {message}")]
    Configfile {
        /// Path of the configuration file (empty for in-memory configs).
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },
}

macro_rules! os_constructor {
    ($(#[$doc:meta] $name:ident => $variant:ident),* $(,)?) => {
        impl HutchError {
            $(
                #[$doc]
                pub fn $name(context: impl Into<String>, source: impl Into<io::Error>) -> Self {
                    Self::$variant {
                        context: context.into(),
                        source: source.into(),
                    }
                }
            )*
        }
    };
}

os_constructor! {
    /// Builds a [`HutchError::Socket`].
    socket => Socket,
    /// Builds a [`HutchError::ChildProcess`].
    child_process => ChildProcess,
    /// Builds a [`HutchError::Container`].
    container => Container,
    /// Builds a [`HutchError::Hostname`].
    hostname => Hostname,
    /// Builds a [`HutchError::Mounts`].
    mounts => Mounts,
    /// Builds a [`HutchError::Namespace`].
    namespace => Namespace,
    /// Builds a [`HutchError::Systemcall`].
    systemcall => Systemcall,
    /// Builds a [`HutchError::Cgroups`].
    cgroups => Cgroups,
    /// Builds a [`HutchError::Exec`].
    exec => Exec,
    /// Builds a [`HutchError::Capabilities`].
    capabilities => Capabilities,
    /// Builds a [`HutchError::Unix`].
    unix => Unix,
}

impl HutchError {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Socket { .. } => ErrorKind::Socket,
            Self::ChildProcess { .. } => ErrorKind::ChildProcess,
            Self::Container { .. } => ErrorKind::Container,
            Self::Hostname { .. } => ErrorKind::Hostname,
            Self::Mounts { .. } => ErrorKind::Mounts,
            Self::Namespace { .. } => ErrorKind::Namespace,
            Self::Systemcall { .. } => ErrorKind::Systemcall,
            Self::Cgroups { .. } => ErrorKind::Cgroups,
            Self::Exec { .. } => ErrorKind::Exec,
            Self::Capabilities { .. } => ErrorKind::Capabilities,
            Self::Unix { .. } => ErrorKind::Unix,
            Self::Environment { .. } => ErrorKind::Environment,
            Self::Cli { .. } => ErrorKind::Cli,
            Self::Configfile { .. } => ErrorKind::Configfile,
        }
    }

    /// Process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Raw OS error code captured when the error was created, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Socket { source, .. }
            | Self::ChildProcess { source, .. }
            | Self::Container { source, .. }
            | Self::Hostname { source, .. }
            | Self::Mounts { source, .. }
            | Self::Namespace { source, .. }
            | Self::Systemcall { source, .. }
            | Self::Cgroups { source, .. }
            | Self::Exec { source, .. }
            | Self::Capabilities { source, .. }
            | Self::Unix { source, .. } => source.raw_os_error(),
            Self::Environment { .. } | Self::Cli { .. } | Self::Configfile { .. } => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HutchError>;
