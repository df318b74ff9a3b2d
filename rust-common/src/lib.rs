//! Shared library for cross-cutting concerns in the database credential plugins.
//!
//! This crate provides centralized implementations for:
//! - Tracing subscriber initialisation
//! - Scrubbing known secret values out of free text

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sanitize;
pub mod tracing_config;

pub use sanitize::scrub_secrets;
pub use tracing_config::{LogFormat, TracingConfig, init_tracing, try_init_tracing};
