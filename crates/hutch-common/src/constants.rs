//! System-wide constants and default paths.

/// Application name used in log output and generated hostnames.
pub const APP_NAME: &str = "hutch";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "hutch";

/// Cgroups v1 hierarchy mount point. Each controller lives in its own
/// subdirectory (`/sys/fs/cgroup/memory`, `/sys/fs/cgroup/pids`, ...).
pub const CGROUP_V1_PATH: &str = "/sys/fs/cgroup";

/// Per-controller file listing the tasks attached to a cgroup.
pub const CGROUP_TASKS_FILE: &str = "tasks";

/// Directory under which each container's new root is staged before `pivot_root`.
pub const DEFAULT_STAGING_DIR: &str = "/tmp/hutch";

/// Prefix of the directory the previous root is moved into during `pivot_root`.
pub const OLD_ROOT_PREFIX: &str = "oldroot.";

/// First host UID/GID that container root is mapped to.
pub const USERNS_OFFSET: u32 = 10_000;

/// Number of consecutive ids mapped into the user namespace.
pub const USERNS_COUNT: u32 = 2_000;

/// Soft and hard `RLIMIT_NOFILE` applied to the container process.
pub const NOFILE_RLIMIT: u64 = 64;

/// Seconds either side of the handshake waits for its peer (0 disables the deadline).
pub const DEFAULT_IPC_TIMEOUT_SECS: u64 = 30;

/// Oldest kernel release (major, minor) with the namespace features we rely on.
pub const MINIMAL_KERNEL_VERSION: (u32, u32) = (4, 8);

/// Architectures the syscall filter can be compiled for.
pub const SUPPORTED_ARCHES: &[&str] = &["x86_64", "aarch64"];

/// Default `memory.limit_in_bytes` (1 GiB).
pub const DEFAULT_MEMORY_LIMIT: &str = "1073741824";

/// Default `cpu.shares`.
pub const DEFAULT_CPU_SHARES: &str = "256";

/// Default `pids.max`.
pub const DEFAULT_PIDS_MAX: &str = "64";

/// Default `blkio.weight`.
pub const DEFAULT_BLKIO_WEIGHT: &str = "10";
