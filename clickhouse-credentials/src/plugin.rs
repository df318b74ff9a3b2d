//! The plugin interface consumed by the secrets-management host.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::config::ConfigMap;
use crate::context::RequestContext;
use crate::error::PluginResult;
use crate::username::UsernameMetadata;

/// Operator-configured statement scripts for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statements {
    /// Scripts in execution order; each may hold several `;`-separated statements
    pub commands: Vec<String>,
}

impl Statements {
    /// Build from any list of scripts.
    #[must_use]
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

fn fmt_config_keys(map: &ConfigMap) -> Vec<&str> {
    map.keys().map(String::as_str).collect()
}

/// Initialize request; the config map may hold the plugin's own password.
#[derive(Clone, Default)]
pub struct InitializeRequest {
    /// Raw configuration supplied by the host
    pub config: ConfigMap,
    /// Open and ping a connection before reporting success
    pub verify_connection: bool,
}

impl fmt::Debug for InitializeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializeRequest")
            .field("config_keys", &fmt_config_keys(&self.config))
            .field("verify_connection", &self.verify_connection)
            .finish()
    }
}

/// Initialize response carrying the configuration the host should persist.
#[derive(Clone, Default)]
pub struct InitializeResponse {
    /// Validated configuration
    pub config: ConfigMap,
}

impl fmt::Debug for InitializeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializeResponse")
            .field("config_keys", &fmt_config_keys(&self.config))
            .finish()
    }
}

/// Create a new database user.
#[derive(Debug, Clone)]
pub struct NewUserRequest {
    /// Inputs to the username template
    pub username_config: UsernameMetadata,
    /// Creation statements; must not be empty
    pub statements: Statements,
    /// Password for the new user
    pub password: SecretString,
    /// When the credential expires
    pub expiration: DateTime<Utc>,
}

/// Result of creating a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserResponse {
    /// Generated username
    pub username: String,
}

/// Password change part of an update.
#[derive(Debug, Clone)]
pub struct ChangePassword {
    /// Password to set
    pub new_password: SecretString,
    /// Custom rotation statements; empty uses the built-in statement
    pub statements: Statements,
}

/// Expiration change part of an update.
#[derive(Debug, Clone)]
pub struct ChangeExpiration {
    /// New expiration
    pub new_expiration: DateTime<Utc>,
    /// Custom renewal statements
    pub statements: Statements,
}

/// Update an existing user.
#[derive(Debug, Clone, Default)]
pub struct UpdateUserRequest {
    /// User to update
    pub username: String,
    /// New password, if rotating
    pub password: Option<ChangePassword>,
    /// New expiration, if renewing
    pub expiration: Option<ChangeExpiration>,
}

/// Result of updating a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateUserResponse {}

/// Remove a user.
#[derive(Debug, Clone, Default)]
pub struct DeleteUserRequest {
    /// User to remove
    pub username: String,
    /// Custom revocation statements; empty uses the built-in drop
    pub statements: Statements,
}

/// Result of removing a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteUserResponse {}

/// Operations the host drives on a database plugin.
#[async_trait]
pub trait DatabasePlugin: Send + Sync {
    /// Short identifier of the database type.
    fn type_name(&self) -> &'static str;

    /// Validate and install configuration.
    async fn initialize(
        &self,
        ctx: &RequestContext,
        req: InitializeRequest,
    ) -> PluginResult<InitializeResponse>;

    /// Create a user with a freshly generated name.
    async fn new_user(&self, ctx: &RequestContext, req: NewUserRequest)
    -> PluginResult<NewUserResponse>;

    /// Change an existing user's password or expiration.
    async fn update_user(
        &self,
        ctx: &RequestContext,
        req: UpdateUserRequest,
    ) -> PluginResult<UpdateUserResponse>;

    /// Remove a user. Removing a user that does not exist succeeds.
    async fn delete_user(
        &self,
        ctx: &RequestContext,
        req: DeleteUserRequest,
    ) -> PluginResult<DeleteUserResponse>;

    /// Release the database connection.
    async fn close(&self, ctx: &RequestContext) -> PluginResult<()>;

    /// Raw secret text mapped to the placeholder that replaces it in
    /// outgoing messages.
    fn secret_values(&self) -> HashMap<String, String>;
}
