//! ClickHouse database plugin for a secrets-management host.
//!
//! Issues, rotates and revokes ClickHouse logins. The host drives the
//! [`DatabasePlugin`] operations; this crate turns each one into a
//! transaction of operator-templated SQL statements run against a
//! [`Driver`]-supplied connection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod producer;
pub mod redaction;
pub mod statements;
pub mod username;

pub use config::{ConfigMap, ConnectionConfig};
pub use context::RequestContext;
pub use database::{Connection, Driver, DriverError, Row, SqlValue, Transaction};
pub use error::{AggregateError, ErrorKind, PluginError, PluginResult};
pub use manager::ClickhouseManager;
pub use plugin::{
    ChangeExpiration, ChangePassword, DatabasePlugin, DeleteUserRequest, DeleteUserResponse,
    InitializeRequest, InitializeResponse, NewUserRequest, NewUserResponse, Statements,
    UpdateUserRequest, UpdateUserResponse,
};
pub use redaction::SanitizingPlugin;
pub use username::{UsernameMetadata, UsernameTemplate};

use std::sync::Arc;

/// Build a ClickHouse plugin whose errors never carry its own password.
#[must_use]
pub fn new_plugin(driver: Arc<dyn Driver>) -> SanitizingPlugin<ClickhouseManager> {
    SanitizingPlugin::new(ClickhouseManager::new(driver))
}
