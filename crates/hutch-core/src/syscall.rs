//! Seccomp syscall filtering for the container process.
//!
//! The profile is default-allow: everything passes except a short
//! denylist, which fails with `EPERM` instead of killing the process so
//! that well-behaved programs can fall back gracefully.
//!
//! `clone3(2)` passes its flags in memory that seccomp cannot inspect, so it
//! is refused outright with `ENOSYS`. The C library then falls back to
//! `clone(2)`, whose flags the denylist does check. One seccomp program has
//! a single match action, so that rule lives in a second program.

use std::collections::BTreeMap;

use hutch_common::error::{HutchError, Result};
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};

/// Syscalls refused whatever their arguments.
///
/// Kernel keyring access is not namespaced, NUMA and page-migration
/// controls let a process disturb memory placement on the whole host,
/// `userfaultfd` and `perf_event_open` widen the kernel attack surface.
pub const REFUSED: [(&str, i64); 9] = [
    ("keyctl", libc::SYS_keyctl),
    ("add_key", libc::SYS_add_key),
    ("request_key", libc::SYS_request_key),
    ("mbind", libc::SYS_mbind),
    ("migrate_pages", libc::SYS_migrate_pages),
    ("move_pages", libc::SYS_move_pages),
    ("set_mempolicy", libc::SYS_set_mempolicy),
    ("userfaultfd", libc::SYS_userfaultfd),
    ("perf_event_open", libc::SYS_perf_event_open),
];

/// Syscalls reported as not implemented, so callers fall back to an older
/// variant the denylist can inspect.
pub const UNSUPPORTED: [(&str, i64); 1] = [("clone3", libc::SYS_clone3)];

/// How an argument is compared in a [`ConditionalRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMatch {
    /// The argument has every bit of the mask set.
    BitsSet(u64),
    /// The argument equals the value.
    Equals(u64),
}

/// A syscall refused only when one of its arguments matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionalRule {
    /// Syscall name, for logs.
    pub name: &'static str,
    /// Syscall number on the running architecture.
    pub nr: i64,
    /// Zero-based index of the inspected argument.
    pub arg: u8,
    /// Comparison applied to the argument.
    pub matcher: ArgMatch,
}

const S_ISUID: u64 = libc::S_ISUID as u64;
const S_ISGID: u64 = libc::S_ISGID as u64;
const CLONE_NEWUSER: u64 = libc::CLONE_NEWUSER as u64;
#[allow(clippy::cast_lossless, clippy::unnecessary_cast)]
const TIOCSTI: u64 = libc::TIOCSTI as u64;

const fn rule(name: &'static str, nr: i64, arg: u8, matcher: ArgMatch) -> ConditionalRule {
    ConditionalRule {
        name,
        nr,
        arg,
        matcher,
    }
}

/// Argument-dependent denials: creating setuid/setgid files, creating a
/// nested user namespace, and pushing bytes into the controlling
/// terminal's input queue.
pub fn conditional_rules() -> Vec<ConditionalRule> {
    let mut rules = Vec::with_capacity(9);
    // chmod(2) does not exist on architectures with only the *at variants.
    #[cfg(target_arch = "x86_64")]
    rules.extend([
        rule("chmod", libc::SYS_chmod, 1, ArgMatch::BitsSet(S_ISUID)),
        rule("chmod", libc::SYS_chmod, 1, ArgMatch::BitsSet(S_ISGID)),
    ]);
    rules.extend([
        rule("fchmod", libc::SYS_fchmod, 1, ArgMatch::BitsSet(S_ISUID)),
        rule("fchmod", libc::SYS_fchmod, 1, ArgMatch::BitsSet(S_ISGID)),
        rule("fchmodat", libc::SYS_fchmodat, 2, ArgMatch::BitsSet(S_ISUID)),
        rule("fchmodat", libc::SYS_fchmodat, 2, ArgMatch::BitsSet(S_ISGID)),
        rule("unshare", libc::SYS_unshare, 0, ArgMatch::BitsSet(CLONE_NEWUSER)),
        rule("clone", libc::SYS_clone, 0, ArgMatch::BitsSet(CLONE_NEWUSER)),
        rule("ioctl", libc::SYS_ioctl, 1, ArgMatch::Equals(TIOCSTI)),
    ]);
    rules
}

/// The compiled seccomp programs.
///
/// Obtained from [`SyscallFilter::setup`], which has already loaded them
/// into the kernel; [`SyscallFilter::clean`] releases the in-memory copies.
/// The kernel keeps enforcing loaded programs for the life of the process.
#[derive(Debug)]
pub struct SyscallFilter {
    programs: Vec<BpfProgram>,
}

impl SyscallFilter {
    /// Compiles the profile for the running architecture without loading it.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Systemcall`] if a rule or a program cannot be built.
    pub fn build() -> Result<Self> {
        let arch = TargetArch::try_from(std::env::consts::ARCH)
            .map_err(|e| sys_error("unsupported seccomp architecture", &e))?;

        let mut rules: BTreeMap<i64, Vec<SeccompRule>> = REFUSED
            .iter()
            .map(|&(_, nr)| (nr, Vec::new()))
            .collect();

        for cond in conditional_rules() {
            let (op, value) = match cond.matcher {
                ArgMatch::BitsSet(mask) => (SeccompCmpOp::MaskedEq(mask), mask),
                ArgMatch::Equals(value) => (SeccompCmpOp::Eq, value),
            };
            let condition = SeccompCondition::new(cond.arg, SeccompCmpArgLen::Dword, op, value)
                .map_err(|e| sys_error(format!("cannot build condition for {}", cond.name), &e))?;
            let rule = SeccompRule::new(vec![condition])
                .map_err(|e| sys_error(format!("cannot add rule for {}", cond.name), &e))?;
            rules.entry(cond.nr).or_default().push(rule);
        }

        let unsupported = UNSUPPORTED
            .iter()
            .map(|&(_, nr)| (nr, Vec::new()))
            .collect();

        let programs = vec![
            compile(rules, libc::EPERM, arch)?,
            compile(unsupported, libc::ENOSYS, arch)?,
        ];
        Ok(Self { programs })
    }

    /// Compiles the profile and loads it for the calling thread.
    ///
    /// Also sets `PR_SET_NO_NEW_PRIVS`, which loading an unprivileged
    /// filter requires.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Systemcall`] if building or loading fails.
    pub fn setup() -> Result<Self> {
        tracing::debug!("refusing / filtering unwanted syscalls");
        let filter = Self::build()?;
        for program in &filter.programs {
            seccompiler::apply_filter(program)
                .map_err(|e| load_error("cannot load seccomp filter", e))?;
        }
        tracing::info!(
            refused = REFUSED.len(),
            conditional = conditional_rules().len(),
            unsupported = UNSUPPORTED.len(),
            "seccomp filter loaded"
        );
        Ok(filter)
    }

    /// Number of BPF instructions across all programs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.iter().map(Vec::len).sum()
    }

    /// Whether every program is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.iter().all(Vec::is_empty)
    }

    /// Releases the programs. Enforcement by the kernel is unaffected.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible so every component shares the
    /// same `setup`/`clean` shape.
    #[allow(clippy::unnecessary_wraps)]
    pub fn clean(self) -> Result<()> {
        tracing::debug!(instructions = self.len(), "releasing seccomp programs");
        drop(self.programs);
        Ok(())
    }
}

/// Builds one default-allow program whose matched calls fail with `errno`.
fn compile(
    rules: BTreeMap<i64, Vec<SeccompRule>>,
    errno: i32,
    arch: TargetArch,
) -> Result<BpfProgram> {
    let filter = SeccompFilter::new(
        rules,
        // Mismatch: anything not listed is allowed.
        SeccompAction::Allow,
        SeccompAction::Errno(errno.unsigned_abs()),
        arch,
    )
    .map_err(|e| sys_error("cannot initialize seccomp filter", &e))?;

    filter
        .try_into()
        .map_err(|e: seccompiler::BackendError| sys_error("cannot compile seccomp filter", &e))
}

/// Compilation failures carry no OS error.
fn sys_error(context: impl Into<String>, err: &dyn std::fmt::Display) -> HutchError {
    HutchError::systemcall(context, std::io::Error::other(err.to_string()))
}

/// Keeps the errno of a failed `prctl` or `seccomp` call.
fn load_error(context: impl Into<String>, err: seccompiler::Error) -> HutchError {
    let source = match err {
        seccompiler::Error::Prctl(io) | seccompiler::Error::Seccomp(io) => io,
        other => std::io::Error::other(other.to_string()),
    };
    HutchError::systemcall(context, source)
}
