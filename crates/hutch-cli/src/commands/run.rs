//! `hutch run`: start one container and wait for it.

use std::path::PathBuf;

use clap::Args;
use hutch_common::config::{CommandLine, ContainerConfig};
use hutch_common::error::HutchError;
use hutch_common::types::BindMount;
use hutch_core::ipc::IpcChannel;
use hutch_runtime::container::Container;
use hutch_runtime::environment;
use hutch_runtime::options::ContainerOptions;

/// Arguments for the `run` command.
///
/// Flags override the values read from `--config`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Command line executed inside the container.
    #[arg(long)]
    pub command: Option<String>,

    /// Directory used as the container's root filesystem.
    #[arg(long = "mount-dir")]
    pub mount_dir: Option<PathBuf>,

    /// Uid (and gid) the command runs as.
    #[arg(long)]
    pub uid: Option<u32>,

    /// Container hostname; generated when neither flag nor file sets one.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Extra bind mount, `HOST[:CONTAINER]`; repeatable.
    #[arg(long = "add", value_parser = parse_bind)]
    pub mounts: Vec<BindMount>,
}

/// Executes the `run` command and returns the container's exit status.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the host is not
/// supported, or the container cannot be set up.
pub fn execute(args: RunArgs, debug: bool) -> anyhow::Result<i32> {
    let config = resolve_config(args, debug)?;
    crate::init_logging(config.debug);
    tracing::debug!(?config, "configuration resolved");

    let _host = environment::check()?;

    let channel = IpcChannel::new()?;
    let options = ContainerOptions::new(&config, &channel)?;
    let exit = Container::start(options, channel)?;

    if !exit.success() {
        tracing::warn!(%exit, "container command failed");
    }
    Ok(exit.exit_code())
}

/// Merges the configuration file, if any, with the flags.
fn resolve_config(args: RunArgs, debug: bool) -> Result<ContainerConfig, HutchError> {
    let mut config = match &args.config {
        Some(path) => ContainerConfig::load(path)?,
        None => ContainerConfig::default(),
    };

    config.debug |= debug;
    if let Some(command) = args.command {
        config.command = CommandLine::Line(command);
    }
    if let Some(mount_dir) = args.mount_dir {
        config.mount_dir = mount_dir;
    }
    if let Some(uid) = args.uid {
        config.uid = uid;
    }
    if let Some(hostname) = args.hostname {
        config.hostname = Some(hostname);
    }
    config.mounts.extend(args.mounts);

    if config.command.argv().is_empty() {
        return Err(HutchError::Cli {
            message: "no command given (use --command or a config file)".into(),
        });
    }
    if config.mount_dir.as_os_str().is_empty() {
        return Err(HutchError::Cli {
            message: "no root filesystem given (use --mount-dir or a config file)".into(),
        });
    }
    Ok(config)
}

/// Parses `HOST[:CONTAINER]`; a bare path is mounted at the same place.
fn parse_bind(spec: &str) -> Result<BindMount, String> {
    if spec.contains(':') {
        BindMount::parse(spec).ok_or_else(|| format!("invalid bind mount {spec:?}"))
    } else if spec.is_empty() {
        Err("bind mount must not be empty".into())
    } else {
        Ok(BindMount {
            host_path: PathBuf::from(spec),
            container_path: PathBuf::from(spec),
        })
    }
}
