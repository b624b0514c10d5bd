//! UTS namespace isolation.
//!
//! Gives the container its own hostname.

use hutch_common::error::{HutchError, Result};

/// Sets the hostname of the calling process's UTS namespace.
///
/// # Errors
///
/// Returns [`HutchError::Hostname`] if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| HutchError::hostname(hostname, e))?;
    tracing::info!(hostname, "container hostname set");
    Ok(())
}
