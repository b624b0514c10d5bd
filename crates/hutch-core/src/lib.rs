//! # hutch-core
//!
//! Low-level Linux isolation primitives for the hutch runtime.
//!
//! This crate provides safe abstractions over:
//! - **IPC**: the one-byte rendezvous channel between parent and container.
//! - **Namespaces**: clone flags, hostname, and user-namespace id mapping.
//! - **Cgroups v1**: per-container controller settings and the open-file rlimit.
//! - **Filesystem**: private mount propagation, bind mounts, and `pivot_root`.
//! - **Capabilities**: dropping privileged capabilities before exec.
//! - **Seccomp**: a default-allow syscall denylist.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod filesystem;
pub mod ipc;
pub mod namespace;
pub mod syscall;
