//! Shared test utilities for the credential plugin workspace.
//!
//! This crate provides:
//! - A recording in-memory database driver
//! - Proptest generators for request inputs
//! - Test fixtures with sample configuration and statement scripts

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
pub use mocks::{MockCall, MockDriver};
