//! # hutch-common
//!
//! Shared error taxonomy, configuration model, and constants used across
//! the hutch workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and holds no Linux-specific code, so the configuration
//! model can be loaded and validated on any host.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
