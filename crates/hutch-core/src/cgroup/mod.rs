//! Cgroups v1 resource management.
//!
//! Every configured [`Control`] gets a per-container directory
//! `<root>/<controller>/<hostname>/` holding its settings and the container
//! pid in `tasks`. Controllers the host does not mount are skipped with a
//! warning. Cleanup detaches and removes every directory setup created,
//! even when setup stopped halfway.

pub mod rlimit;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hutch_common::constants::CGROUP_TASKS_FILE;
use hutch_common::error::{HutchError, Result};
use hutch_common::types::Control;
use nix::unistd::Pid;

/// Mount options of a cgroup v1 entry that do not name a controller.
const MOUNT_FLAGS: &[&str] = &[
    "rw",
    "ro",
    "nosuid",
    "nodev",
    "noexec",
    "relatime",
    "noatime",
    "nodiratime",
    "strictatime",
    "xattr",
    "noprefix",
    "clone_children",
    "cpuset_v2_mode",
    "all",
    "none",
];

/// The cgroup v1 hierarchies available under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupHierarchy {
    root: PathBuf,
    /// Controller name to the directory its hierarchy is mounted on.
    controllers: BTreeMap<String, PathBuf>,
    kernel: bool,
}

impl CgroupHierarchy {
    /// Scans `/proc/self/mounts` for cgroup v1 hierarchies mounted under `root`.
    ///
    /// A host with only the unified (v2) hierarchy yields an empty set, so
    /// every control is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Cgroups`] if the mount table cannot be read.
    pub fn detect(root: &Path) -> Result<Self> {
        let mounts = std::fs::read_to_string("/proc/self/mounts")
            .map_err(|e| HutchError::cgroups("/proc/self/mounts", e))?;
        let controllers = parse_mounts(&mounts, root);
        tracing::debug!(
            root = %root.display(),
            controllers = ?controllers,
            "detected cgroup v1 controllers"
        );
        Ok(Self {
            root: root.to_path_buf(),
            controllers,
            kernel: true,
        })
    }

    /// A hierarchy laid out on an ordinary directory tree.
    ///
    /// Control files there are regular files that must be unlinked before
    /// the group directory can be removed, which the kernel forbids on a
    /// real cgroupfs.
    #[must_use]
    pub fn staged<I, S>(root: &Path, controllers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root: root.to_path_buf(),
            controllers: controllers
                .into_iter()
                .map(|name| {
                    let name = name.into();
                    let mount_point = root.join(&name);
                    (name, mount_point)
                })
                .collect(),
            kernel: false,
        }
    }

    /// Root the controller directories live under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `controller` is mounted.
    #[must_use]
    pub fn supports(&self, controller: &str) -> bool {
        self.controllers.contains_key(controller)
    }

    /// Top-level directory of `controller`'s hierarchy.
    ///
    /// Comounted controllers such as `cpu,cpuacct` share one mount point.
    #[must_use]
    pub fn mount_point(&self, controller: &str) -> PathBuf {
        self.controllers
            .get(controller)
            .cloned()
            .unwrap_or_else(|| self.root.join(controller))
    }

    /// Directory of `controller`'s group named `group`.
    #[must_use]
    pub fn group_dir(&self, controller: &str, group: &str) -> PathBuf {
        self.mount_point(controller).join(group)
    }
}

/// Maps controller names of the `cgroup` mounts below `root` to their mount point.
fn parse_mounts(mounts: &str, root: &Path) -> BTreeMap<String, PathBuf> {
    let mut controllers = BTreeMap::new();
    for line in mounts.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [_, mount_point, fstype, options, ..] = fields.as_slice() else {
            continue;
        };
        if *fstype != "cgroup" || !Path::new(mount_point).starts_with(root) {
            continue;
        }
        controllers.extend(
            options
                .split(',')
                .filter(|opt| !opt.contains('=') && !MOUNT_FLAGS.contains(opt))
                .map(|name| (name.to_owned(), PathBuf::from(mount_point))),
        );
    }
    controllers
}

/// Applies and later removes one container's cgroups and rlimit.
#[derive(Debug)]
pub struct ResourceController {
    hierarchy: CgroupHierarchy,
    hostname: String,
    controls: Vec<Control>,
    nofile: u64,
    created: Vec<String>,
}

impl ResourceController {
    /// Prepares a controller. Nothing touches the host until [`setup`](Self::setup).
    #[must_use]
    pub fn new(
        hierarchy: CgroupHierarchy,
        hostname: impl Into<String>,
        controls: Vec<Control>,
        nofile: u64,
    ) -> Self {
        Self {
            hierarchy,
            hostname: hostname.into(),
            controls,
            nofile,
            created: Vec::new(),
        }
    }

    /// Controllers whose group directory currently exists.
    #[must_use]
    pub fn created(&self) -> &[String] {
        &self.created
    }

    /// Places `pid` in a new group of every supported controller, then caps
    /// its open files.
    ///
    /// A directory is recorded for cleanup as soon as it exists, so a
    /// failure on a later setting or controller still leaves [`clean`]
    /// able to remove it.
    ///
    /// [`clean`]: Self::clean
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Cgroups`] naming the directory, setting, or
    /// limit that failed.
    pub fn setup(&mut self, pid: Pid) -> Result<()> {
        tracing::info!(hostname = %self.hostname, %pid, "restricting resources");

        for control in &self.controls {
            if !self.hierarchy.supports(&control.control) {
                tracing::warn!(
                    controller = %control.control,
                    "cgroup controller not supported by the host, skipping"
                );
                continue;
            }

            let dir = self.hierarchy.group_dir(&control.control, &self.hostname);
            std::fs::create_dir_all(&dir)
                .map_err(|e| HutchError::cgroups(dir.display().to_string(), e))?;
            self.created.push(control.control.clone());

            for setting in &control.settings {
                write_control(&dir, &setting.name, &setting.value)?;
                tracing::debug!(
                    controller = %control.control,
                    setting = %setting.name,
                    value = %setting.value,
                    "cgroup setting written"
                );
            }
            write_control(&dir, CGROUP_TASKS_FILE, &pid.to_string())?;
        }

        rlimit::set_nofile(pid, self.nofile)
    }

    /// Detaches and removes every group directory created by [`setup`](Self::setup).
    ///
    /// Writes `0` to the controller's top-level `tasks` and removes the
    /// group directory, which only succeeds once it holds no process. All
    /// controllers are attempted; an entry that fails stays recorded so a
    /// later call can retry it.
    ///
    /// # Errors
    ///
    /// Returns the first [`HutchError::Cgroups`] encountered.
    pub fn clean(&mut self) -> Result<()> {
        tracing::info!(hostname = %self.hostname, "cleaning cgroups");
        let mut first_error = None;
        let mut remaining = Vec::new();

        for controller in std::mem::take(&mut self.created) {
            match self.remove_group(&controller) {
                Ok(()) => {
                    tracing::debug!(controller = %controller, "cgroup removed");
                }
                Err(e) => {
                    tracing::error!(controller = %controller, error = %e, "cgroup cleanup failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    remaining.push(controller);
                }
            }
        }

        self.created = remaining;
        first_error.map_or(Ok(()), Err)
    }

    fn remove_group(&self, controller: &str) -> Result<()> {
        write_control(&self.hierarchy.mount_point(controller), CGROUP_TASKS_FILE, "0")?;

        let dir = self.hierarchy.group_dir(controller, &self.hostname);
        if !self.hierarchy.kernel {
            remove_staged_files(&dir)?;
        }
        std::fs::remove_dir(&dir).map_err(|e| {
            HutchError::cgroups(format!("cannot remove {} ({controller})", dir.display()), e)
        })
    }
}

/// Writes `value` into the control file `dir/name`.
fn write_control(dir: &Path, name: &str, value: &str) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, value).map_err(|e| HutchError::cgroups(path.display().to_string(), e))
}

fn remove_staged_files(dir: &Path) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| HutchError::cgroups(dir.display().to_string(), e))?;
    for entry in entries {
        let path = entry
            .map_err(|e| HutchError::cgroups(dir.display().to_string(), e))?
            .path();
        if path.is_file() {
            std::fs::remove_file(&path)
                .map_err(|e| HutchError::cgroups(path.display().to_string(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hutch_common::error::ErrorKind;
    use hutch_common::types::Setting;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /sys/fs/cgroup tmpfs ro,nosuid,nodev,noexec,mode=755 0 0
cgroup /sys/fs/cgroup/systemd cgroup rw,nosuid,nodev,noexec,relatime,xattr,name=systemd 0 0
cgroup /sys/fs/cgroup/cpu,cpuacct cgroup rw,nosuid,nodev,noexec,relatime,cpu,cpuacct 0 0
cgroup /sys/fs/cgroup/memory cgroup rw,nosuid,nodev,noexec,relatime,memory 0 0
cgroup /sys/fs/cgroup/pids cgroup rw,nosuid,nodev,noexec,relatime,pids 0 0
cgroup2 /sys/fs/cgroup/unified cgroup2 rw,nosuid,nodev,noexec,relatime,nsdelegate 0 0
";

    /// A throwaway process to attach, so the rlimit never lands on the test runner.
    struct Sleeper(std::process::Child);

    impl Sleeper {
        fn spawn() -> Self {
            Self(std::process::Command::new("sleep").arg("30").spawn().unwrap())
        }

        fn pid(&self) -> Pid {
            Pid::from_raw(i32::try_from(self.0.id()).unwrap())
        }
    }

    impl Drop for Sleeper {
        fn drop(&mut self) {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }

    fn staged(root: &Path) -> CgroupHierarchy {
        let hierarchy = CgroupHierarchy::staged(root, ["pids", "memory", "cpu"]);
        for controller in ["pids", "memory", "cpu"] {
            std::fs::create_dir_all(root.join(controller)).unwrap();
        }
        hierarchy
    }

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn parse_mounts_lists_v1_controllers_only() {
        let controllers = parse_mounts(MOUNTS, Path::new("/sys/fs/cgroup"));
        let names: Vec<&str> = controllers.keys().map(String::as_str).collect();
        assert_eq!(names, ["cpu", "cpuacct", "memory", "pids"]);
    }

    #[test]
    fn comounted_controllers_share_their_mount_point() {
        let hierarchy = CgroupHierarchy {
            root: PathBuf::from("/sys/fs/cgroup"),
            controllers: parse_mounts(MOUNTS, Path::new("/sys/fs/cgroup")),
            kernel: true,
        };
        assert!(hierarchy.supports("cpu"));
        assert_eq!(
            hierarchy.group_dir("cpu", "box"),
            Path::new("/sys/fs/cgroup/cpu,cpuacct/box")
        );
        assert_eq!(
            hierarchy.mount_point("cpuacct"),
            Path::new("/sys/fs/cgroup/cpu,cpuacct")
        );
        assert_eq!(
            hierarchy.group_dir("memory", "box"),
            Path::new("/sys/fs/cgroup/memory/box")
        );
    }

    #[test]
    fn parse_mounts_ignores_other_roots() {
        assert!(parse_mounts(MOUNTS, Path::new("/mnt/cgroup")).is_empty());
    }

    #[test]
    fn setup_writes_every_setting_and_the_pid() {
        let root = tempfile::tempdir().unwrap();
        let controls = vec![
            Control::new("pids", vec![Setting::new("pids.max", "64")]),
            Control::new(
                "memory",
                vec![
                    Setting::new("memory.limit_in_bytes", "1073741824"),
                    Setting::new("memory.kmem.limit_in_bytes", "1073741824"),
                ],
            ),
        ];
        let mut controller =
            ResourceController::new(staged(root.path()), "test1", controls.clone(), 1024);
        let sleeper = Sleeper::spawn();
        let pid = sleeper.pid();

        let result = controller.setup(pid);
        assert!(result.is_ok(), "{result:?}");

        for control in &controls {
            let dir = root.path().join(&control.control).join("test1");
            assert_eq!(count_files(&dir), control.settings.len() + 1);
            for setting in &control.settings {
                assert_eq!(std::fs::read_to_string(dir.join(&setting.name)).unwrap(), setting.value);
            }
            assert_eq!(
                std::fs::read_to_string(dir.join("tasks")).unwrap(),
                pid.to_string()
            );
        }
        controller.clean().unwrap();
    }

    #[test]
    fn unsupported_controllers_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let controls = vec![
            Control::new("blkio", vec![Setting::new("blkio.weight", "10")]),
            Control::new("pids", vec![Setting::new("pids.max", "64")]),
        ];
        let mut controller =
            ResourceController::new(staged(root.path()), "box", controls, 1024);
        controller.setup(Sleeper::spawn().pid()).unwrap();

        assert_eq!(controller.created(), ["pids"]);
        assert!(!root.path().join("blkio").exists());
        controller.clean().unwrap();
    }

    #[test]
    fn clean_removes_groups_and_detaches_to_the_top_level() {
        let root = tempfile::tempdir().unwrap();
        let controls = vec![Control::new("pids", vec![Setting::new("pids.max", "64")])];
        let mut controller = ResourceController::new(staged(root.path()), "test1", controls, 1024);
        controller.setup(Sleeper::spawn().pid()).unwrap();
        assert_eq!(
            std::fs::read_to_string(root.path().join("pids/test1/pids.max")).unwrap(),
            "64"
        );

        controller.clean().unwrap();
        assert!(!root.path().join("pids/test1").exists());
        assert_eq!(std::fs::read_to_string(root.path().join("pids/tasks")).unwrap(), "0");
        assert!(controller.created().is_empty());
    }

    #[test]
    fn clean_after_partial_setup_removes_what_was_created() {
        let root = tempfile::tempdir().unwrap();
        let controls = vec![
            Control::new("pids", vec![Setting::new("pids.max", "64")]),
            Control::new("memory", vec![Setting::new("missing/memory.limit_in_bytes", "1")]),
            Control::new("cpu", vec![Setting::new("cpu.shares", "256")]),
        ];
        let mut controller = ResourceController::new(staged(root.path()), "half", controls, 1024);

        let err = controller.setup(Sleeper::spawn().pid()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cgroups);
        assert!(err.to_string().contains("memory.limit_in_bytes"));
        assert_eq!(controller.created(), ["pids", "memory"]);

        controller.clean().unwrap();
        assert!(!root.path().join("pids/half").exists());
        assert!(!root.path().join("memory/half").exists());
        assert!(!root.path().join("cpu/half").exists());
    }

    #[test]
    fn failed_cleanup_keeps_going_and_reports_the_first_error() {
        let root = tempfile::tempdir().unwrap();
        let controls = vec![
            Control::new("pids", vec![Setting::new("pids.max", "64")]),
            Control::new("cpu", vec![Setting::new("cpu.shares", "256")]),
        ];
        let mut controller = ResourceController::new(staged(root.path()), "stuck", controls, 1024);
        controller.setup(Sleeper::spawn().pid()).unwrap();

        // A nested directory keeps the pids group from being removed.
        std::fs::create_dir(root.path().join("pids/stuck/child")).unwrap();

        let err = controller.clean().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cgroups);
        assert!(err.to_string().contains("pids"));
        assert!(!root.path().join("cpu/stuck").exists());
        assert_eq!(controller.created(), ["pids"]);

        std::fs::remove_dir(root.path().join("pids/stuck/child")).unwrap();
        controller.clean().unwrap();
        assert!(!root.path().join("pids/stuck").exists());
    }
}
