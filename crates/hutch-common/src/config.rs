//! Configuration model for a single container run.
//!
//! A [`ContainerConfig`] is produced either from a JSON configuration file
//! or from command-line flags, validated once, and then resolved by the
//! runtime into immutable container options.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HutchError, Result};
use crate::types::{BindMount, Control, NamespaceSet, UserNamespaceConfig};

/// Longest hostname accepted by `sethostname(2)`.
const MAX_HOSTNAME_LEN: usize = 64;

/// Command line executed inside the container.
///
/// Accepts either a single whitespace-separated string or an explicit
/// argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    /// `"/bin/sh -c ls"` style command, split on whitespace.
    Line(String),
    /// `["/bin/sh", "-c", "ls"]` style argument vector.
    Argv(Vec<String>),
}

impl Default for CommandLine {
    fn default() -> Self {
        Self::Argv(Vec::new())
    }
}

impl CommandLine {
    /// Returns the argument vector; the first element is the executable path.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Line(line) => line.split_whitespace().map(str::to_owned).collect(),
            Self::Argv(argv) => argv.clone(),
        }
    }
}

/// Configuration for one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Raise log verbosity to `debug`.
    pub debug: bool,
    /// Command executed inside the container.
    pub command: CommandLine,
    /// Directory used as the container's root filesystem.
    pub mount_dir: PathBuf,
    /// User (and group) id the command runs as inside the container.
    pub uid: u32,
    /// Container hostname; also names its cgroups and staging directory.
    /// A random one is generated when absent.
    pub hostname: Option<String>,
    /// Additional host directories bound into the container.
    pub mounts: Vec<BindMount>,
    /// Namespaces the container process is cloned into.
    pub namespaces: NamespaceSet,
    /// Cgroup controls. `None` applies [`Control::defaults`].
    pub cgroups: Option<Vec<Control>>,
    /// User-namespace id mapping.
    pub user_namespace: UserNamespaceConfig,
    /// Directory under which the new root is staged.
    pub staging_dir: PathBuf,
    /// Root of the cgroup v1 hierarchies.
    pub cgroup_root: PathBuf,
    /// Deadline for each handshake receive, in seconds. `0` waits forever.
    pub ipc_timeout_secs: u64,
    /// Soft and hard `RLIMIT_NOFILE` for the container process.
    pub nofile_limit: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            command: CommandLine::default(),
            mount_dir: PathBuf::new(),
            uid: 0,
            hostname: None,
            mounts: Vec::new(),
            namespaces: NamespaceSet::default(),
            cgroups: None,
            user_namespace: UserNamespaceConfig::default(),
            staging_dir: PathBuf::from(constants::DEFAULT_STAGING_DIR),
            cgroup_root: PathBuf::from(constants::CGROUP_V1_PATH),
            ipc_timeout_secs: constants::DEFAULT_IPC_TIMEOUT_SECS,
            nofile_limit: constants::NOFILE_RLIMIT,
        }
    }
}

impl ContainerConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Configfile`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| HutchError::Configfile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&data).map_err(|e| match e {
            HutchError::Configfile { message, .. } => HutchError::Configfile {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Configfile`] if the JSON is malformed.
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| HutchError::Configfile {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Cgroup controls to apply, falling back to the compiled-in defaults.
    #[must_use]
    pub fn controls(&self) -> Vec<Control> {
        self.cgroups.clone().unwrap_or_else(Control::defaults)
    }

    /// Returns the configured hostname or generates a fresh one.
    #[must_use]
    pub fn resolve_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(generate_hostname)
    }

    /// Checks the configuration for values the runtime cannot honor.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Configfile`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.command.argv().is_empty() {
            return Err(invalid("command must not be empty"));
        }
        if !self.mount_dir.is_dir() {
            return Err(invalid(format!(
                "mount_dir {} is not a directory",
                self.mount_dir.display()
            )));
        }
        if !self.namespaces.mount {
            return Err(invalid("a mount namespace is required to pivot the root"));
        }
        if let Some(hostname) = &self.hostname {
            validate_hostname(hostname)?;
        }
        if self.user_namespace.count == 0 {
            return Err(invalid("user_namespace.count must be greater than 0"));
        }
        if !self.staging_dir.is_absolute() {
            return Err(invalid("staging_dir must be an absolute path"));
        }
        for control in self.cgroups.iter().flatten() {
            if control.control.is_empty() || control.control.contains('/') {
                return Err(invalid(format!(
                    "invalid cgroup controller name {:?}",
                    control.control
                )));
            }
            if let Some(setting) = control
                .settings
                .iter()
                .find(|s| s.name.is_empty() || s.name.contains('/') || s.name == constants::CGROUP_TASKS_FILE)
            {
                return Err(invalid(format!(
                    "invalid setting {:?} for controller {}",
                    setting.name, control.control
                )));
            }
        }
        Ok(())
    }
}

fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return Err(invalid(format!(
            "hostname must be between 1 and {MAX_HOSTNAME_LEN} bytes"
        )));
    }
    if hostname.contains('/') || hostname == "." || hostname == ".." {
        return Err(invalid(format!("hostname {hostname:?} cannot name a directory")));
    }
    Ok(())
}

fn generate_hostname() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", constants::APP_NAME, &id[..8])
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
    use crate::types::Setting;

    fn config_in(dir: &Path) -> ContainerConfig {
        ContainerConfig {
            command: CommandLine::Line("/bin/sh -c true".into()),
            mount_dir: dir.to_path_buf(),
            hostname: Some("test1".into()),
            ..ContainerConfig::default()
        }
    }

    #[test]
    fn parses_a_full_config_file() {
        let json = r#"{
            "debug": true,
            "command": "/bin/busybox sh",
            "mount_dir": "/tmp/rootfs",
            "uid": 0,
            "hostname": "test1",
            "mounts": [{"host_path": "/lib", "container_path": "/lib"}],
            "cgroups": [{"control": "pids", "settings": [{"name": "pids.max", "value": "64"}]}]
        }"#;
        let config = ContainerConfig::from_json(json).expect("valid config");
        assert!(config.debug);
        assert_eq!(config.command.argv(), ["/bin/busybox", "sh"]);
        assert_eq!(config.resolve_hostname(), "test1");
        assert_eq!(config.controls().len(), 1);
        assert_eq!(config.staging_dir, PathBuf::from(constants::DEFAULT_STAGING_DIR));
        assert_eq!(config.user_namespace.offset, 10_000);
    }

    #[test]
    fn argv_form_is_kept_verbatim() {
        let config =
            ContainerConfig::from_json(r#"{"command": ["/bin/echo", "two words"]}"#).expect("valid");
        assert_eq!(config.command.argv(), ["/bin/echo", "two words"]);
    }

    #[test]
    fn missing_cgroups_fall_back_to_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.controls(), Control::defaults());
    }

    #[test]
    fn generated_hostnames_are_prefixed_and_unique() {
        let config = ContainerConfig::default();
        let a = config.resolve_hostname();
        let b = config.resolve_hostname();
        assert!(a.starts_with("hutch-"));
        assert_eq!(a.len(), "hutch-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_json_is_a_configfile_error() {
        let err = ContainerConfig::from_json("{").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configfile);
    }

    #[test]
    fn load_reports_the_file_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").expect("write");
        let err = ContainerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn validate_accepts_a_complete_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        config_in(dir.path()).validate().expect("valid");
    }

    #[test]
    fn validate_requires_mount_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_in(dir.path());
        config.namespaces.mount = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_command_and_missing_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_in(dir.path());
        config.command = CommandLine::Line("   ".into());
        assert!(config.validate().is_err());

        let mut config = config_in(dir.path());
        config.mount_dir = dir.path().join("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_hostnames_that_escape_the_staging_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_in(dir.path());
        config.hostname = Some("../etc".into());
        assert!(config.validate().is_err());
        config.hostname = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_tasks_as_a_setting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_in(dir.path());
        config.cgroups = Some(vec![Control::new("pids", vec![Setting::new("tasks", "0")])]);
        assert!(config.validate().is_err());
    }
}
