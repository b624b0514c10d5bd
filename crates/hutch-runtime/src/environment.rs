//! Host requirements check.

use hutch_common::constants::{MINIMAL_KERNEL_VERSION, SUPPORTED_ARCHES};
use hutch_common::error::{HutchError, Result};
use nix::sys::utsname::uname;

/// Where user-namespace creation can be disabled system-wide.
const MAX_USER_NAMESPACES: &str = "/proc/sys/user/max_user_namespaces";

/// Kernel release and machine of a supported host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    /// Full kernel release, e.g. `6.1.0-18-amd64`.
    pub release: String,
    /// Machine hardware name, e.g. `x86_64`.
    pub machine: String,
}

/// Checks that the running kernel and architecture are supported.
///
/// # Errors
///
/// Returns [`HutchError::Unix`] if `uname(2)` fails, or
/// [`HutchError::Environment`] if the host is not supported.
pub fn check() -> Result<HostEnvironment> {
    let uts = uname().map_err(|e| HutchError::unix("uname", e))?;
    let host = HostEnvironment {
        release: uts.release().to_string_lossy().into_owned(),
        machine: uts.machine().to_string_lossy().into_owned(),
    };
    check_host(&host.release, &host.machine)?;
    tracing::info!(release = %host.release, machine = %host.machine, "linux host supported");
    Ok(host)
}

/// Validates a kernel `release` string and `machine` name.
///
/// # Errors
///
/// Returns [`HutchError::Environment`] for an unparsable or too old
/// release, or an unsupported architecture.
pub fn check_host(release: &str, machine: &str) -> Result<()> {
    let version = kernel_version(release).ok_or_else(|| HutchError::Environment {
        message: format!("cannot parse kernel release {release:?}"),
    })?;
    if version < MINIMAL_KERNEL_VERSION {
        let (major, minor) = MINIMAL_KERNEL_VERSION;
        return Err(HutchError::Environment {
            message: format!("kernel {release} is older than {major}.{minor}"),
        });
    }
    if !SUPPORTED_ARCHES.contains(&machine) {
        return Err(HutchError::Environment {
            message: format!("unsupported architecture {machine}"),
        });
    }
    Ok(())
}

/// Extracts `(major, minor)` from a release such as `5.15.0-91-generic`.
fn kernel_version(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split(['.', '-']);
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Whether the kernel lets new user namespaces be created.
///
/// A missing sysctl means the kernel predates the knob; those kernels
/// allow user namespaces when built with them.
#[must_use]
pub fn user_namespaces_enabled() -> bool {
    std::fs::read_to_string(MAX_USER_NAMESPACES)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .is_none_or(|max| max > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hutch_common::error::ErrorKind;

    #[test]
    fn parses_common_release_strings() {
        assert_eq!(kernel_version("5.15.0-91-generic"), Some((5, 15)));
        assert_eq!(kernel_version("6.1.0-18-amd64"), Some((6, 1)));
        assert_eq!(kernel_version("4.8"), Some((4, 8)));
        assert_eq!(kernel_version("4.19rc1"), Some((4, 19)));
        assert_eq!(kernel_version("linux"), None);
    }

    #[test]
    fn accepts_recent_kernels_on_supported_arches() {
        check_host("6.8.0-40-generic", "x86_64").unwrap();
        check_host("4.8.0", "aarch64").unwrap();
    }

    #[test]
    fn rejects_old_kernels_and_other_arches() {
        let old = check_host("4.4.0-210-generic", "x86_64").unwrap_err();
        assert_eq!(old.kind(), ErrorKind::Environment);
        assert!(old.to_string().contains("older than 4.8"));

        // 4.10 is newer than 4.8 even though "4.10" < "4.8" as a float.
        check_host("4.10.0", "x86_64").unwrap();

        let arch = check_host("6.1.0", "riscv64").unwrap_err();
        assert!(arch.to_string().contains("riscv64"));
    }

    #[test]
    fn this_host_reports_a_release() {
        let uts = uname().unwrap();
        assert!(kernel_version(&uts.release().to_string_lossy()).is_some());
    }
}
