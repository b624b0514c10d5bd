//! Container lifecycle management for the hutch runtime.
//!
//! [`options`] resolves a configuration into the immutable value handed to
//! the container process, [`process`] clones and waits for that process,
//! and [`container`] drives both halves of the setup and the teardown.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod environment;
pub mod options;
pub mod process;
