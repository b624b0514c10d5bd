//! Domain primitive types used across the hutch workspace.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;

/// A single value written into a cgroup controller file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    /// File name inside the controller directory (e.g. `pids.max`).
    pub name: String,
    /// Value written verbatim into the file.
    pub value: String,
}

impl Setting {
    /// Creates a setting from a file name and value.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A cgroup v1 controller and the ordered settings applied to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Controller name as mounted under the cgroup root (`memory`, `cpu`, `pids`, `blkio`).
    pub control: String,
    /// Settings written, in order, into the container's directory for this controller.
    pub settings: Vec<Setting>,
}

impl Control {
    /// Creates a control from a controller name and its settings.
    #[must_use]
    pub fn new(control: impl Into<String>, settings: Vec<Setting>) -> Self {
        Self {
            control: control.into(),
            settings,
        }
    }

    /// The compiled-in controls used when the configuration names none.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "memory",
                vec![Setting::new("memory.limit_in_bytes", constants::DEFAULT_MEMORY_LIMIT)],
            ),
            Self::new("cpu", vec![Setting::new("cpu.shares", constants::DEFAULT_CPU_SHARES)]),
            Self::new("pids", vec![Setting::new("pids.max", constants::DEFAULT_PIDS_MAX)]),
            Self::new(
                "blkio",
                vec![Setting::new("blkio.weight", constants::DEFAULT_BLKIO_WEIGHT)],
            ),
        ]
    }
}

/// A host directory made visible inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Location inside the container root.
    pub container_path: PathBuf,
}

impl BindMount {
    /// Parses a `host:container` pair as accepted on the command line.
    ///
    /// Returns `None` when either side is missing or empty.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let (host, container) = spec.split_once(':')?;
        if host.is_empty() || container.is_empty() {
            return None;
        }
        Some(Self {
            host_path: PathBuf::from(host),
            container_path: PathBuf::from(container),
        })
    }
}

/// Which namespaces the container process is cloned into.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceSet {
    /// Isolate mount namespace. Required for `pivot_root`.
    pub mount: bool,
    /// Isolate cgroup namespace.
    pub cgroup: bool,
    /// Isolate PID namespace.
    pub pid: bool,
    /// Isolate IPC namespace.
    pub ipc: bool,
    /// Isolate network namespace.
    pub network: bool,
    /// Isolate UTS (hostname) namespace.
    pub uts: bool,
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self {
            mount: true,
            cgroup: true,
            pid: true,
            ipc: true,
            network: true,
            uts: true,
        }
    }
}

/// How container ids are mapped onto host ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserNamespaceConfig {
    /// Host id that container id 0 maps to.
    pub offset: u32,
    /// Number of consecutive ids mapped.
    pub count: u32,
    /// Abort the container when the kernel refuses a new user namespace.
    pub required: bool,
}

impl Default for UserNamespaceConfig {
    fn default() -> Self {
        Self {
            offset: constants::USERNS_OFFSET,
            count: constants::USERNS_COUNT,
            required: true,
        }
    }
}

impl UserNamespaceConfig {
    /// Contents written to `/proc/<pid>/uid_map` and `/proc/<pid>/gid_map`.
    #[must_use]
    pub fn map_line(&self) -> String {
        format!("0 {} {}", self.offset, self.count)
    }
}

/// How a container process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit status when the process exited normally.
    pub code: Option<i32>,
    /// Signal number when the process was killed by a signal.
    pub signal: Option<i32>,
}

impl ChildExit {
    /// Whether the process exited normally with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Exit status to propagate, following the shell convention of
    /// `128 + signal` for signaled processes.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with status {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => write!(f, "ended in an unknown state"),
        }
    }
}
