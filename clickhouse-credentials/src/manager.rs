//! ClickHouse credential lifecycle manager.
//!
//! Each operation takes the producer's exclusive guard first and holds it
//! until the operation returns, resolves the cluster afresh when it needs
//! one, and runs its statements inside a single transaction.
//!
//! ClickHouse does not roll back DDL. A failed script is still rolled
//! back, but `CREATE USER`/`ALTER USER` statements that already ran before
//! the failure may remain in effect.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cluster::{resolve_cluster, user_exists};
use crate::config::{ConfigMap, ConnectionConfig};
use crate::context::RequestContext;
use crate::database::{Connection, Driver, Transaction};
use crate::error::{AggregateError, PluginError, PluginResult};
use crate::plugin::{
    ChangePassword, DatabasePlugin, DeleteUserRequest, DeleteUserResponse, InitializeRequest,
    InitializeResponse, NewUserRequest, NewUserResponse, UpdateUserRequest, UpdateUserResponse,
};
use crate::producer::{ConnectionGuard, ConnectionProducer};
use crate::redaction::password_secret_values;
use crate::statements::{self, CLUSTER, EXPIRATION, NAME, PASSWORD, QueryParams, USERNAME};
use crate::username::{DEFAULT_USERNAME_TEMPLATE, UsernameMetadata, UsernameTemplate};

/// Type name reported to the host.
pub const CLICKHOUSE_TYPE_NAME: &str = "clickhouse";

/// Rotation statement used when the role configures none.
pub const DEFAULT_CHANGE_PASSWORD_STATEMENT: &str = "ALTER USER '{{username}}' IDENTIFIED WITH plaintext_password '{{password}}' ON CLUSTER '{{cluster}}';";

/// Revocation statement used when the role configures none; binds the
/// username as `$1` and the cluster as `$2`.
pub const DEFAULT_DROP_USER_STATEMENT: &str = "DROP USER IF EXISTS $1 ON CLUSTER $2;";

/// Layout of `{{expiration}}`.
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Configuration key holding the username template.
pub const USERNAME_TEMPLATE_KEY: &str = "username_template";

/// Placeholder that replaces the plugin's own password in outgoing text.
pub const PASSWORD_PLACEHOLDER: &str = "[password]";

/// Format an expiration for splicing into statement text.
#[must_use]
pub fn format_expiration(expiration: DateTime<Utc>) -> String {
    expiration.format(EXPIRATION_FORMAT).to_string()
}

fn username_template_source(config: &ConfigMap) -> PluginResult<String> {
    match config.get(USERNAME_TEMPLATE_KEY) {
        None | Some(Value::Null) => Ok(DEFAULT_USERNAME_TEMPLATE.to_string()),
        Some(Value::String(s)) if s.is_empty() => Ok(DEFAULT_USERNAME_TEMPLATE.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(PluginError::UsernameTemplateLookup(format!(
            "expected a string, got {}",
            match other {
                Value::Bool(_) => "a boolean",
                Value::Number(_) => "a number",
                Value::Array(_) => "an array",
                _ => "an object",
            }
        ))),
    }
}

async fn rollback(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

/// Expand `scripts` and run every statement, in order, in one transaction.
///
/// On any failure, including cancellation, the transaction is rolled back
/// before the error is returned. Returns the number of statements run.
async fn execute_script<S: AsRef<str> + Sync>(
    ctx: &RequestContext,
    conn: &dyn Connection,
    scripts: &[S],
    params: &QueryParams,
) -> PluginResult<usize> {
    let statements = statements::expand(scripts, params);
    debug!(statements = statements.len(), "Executing statement script");

    let mut tx = ctx
        .run(conn.begin())
        .await?
        .map_err(PluginError::BeginTransaction)?;

    for (index, statement) in statements.iter().enumerate() {
        let failure = match ctx.run(tx.exec(statement)).await {
            Ok(Ok(())) => continue,
            Ok(Err(source)) => PluginError::Execution { index, source },
            Err(interrupted) => interrupted,
        };
        debug!(index, "Statement failed, rolling back");
        rollback(tx).await;
        return Err(failure);
    }

    // A commit that has started is allowed to finish.
    if let Err(interrupted) = ctx.check() {
        rollback(tx).await;
        return Err(interrupted);
    }
    tx.commit().await.map_err(PluginError::Commit)?;
    Ok(statements.len())
}

/// Issues, rotates and revokes ClickHouse users.
pub struct ClickhouseManager {
    producer: ConnectionProducer,
    username_template: RwLock<Option<Arc<UsernameTemplate>>>,
}

impl ClickhouseManager {
    /// Create an uninitialized manager.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            producer: ConnectionProducer::new(driver),
            username_template: RwLock::new(None),
        }
    }

    fn template(&self) -> PluginResult<Arc<UsernameTemplate>> {
        self.username_template
            .read()
            .clone()
            .ok_or(PluginError::NotInitialized)
    }

    /// Validate configuration and become ready.
    ///
    /// Nothing is installed unless every step succeeds.
    #[instrument(skip(self, ctx, req), fields(verify = req.verify_connection))]
    pub async fn initialize(
        &self,
        ctx: &RequestContext,
        req: InitializeRequest,
    ) -> PluginResult<InitializeResponse> {
        let config = ConnectionConfig::from_map(&req.config)?;

        let source = username_template_source(&req.config)?;
        let template =
            UsernameTemplate::compile(&source).map_err(PluginError::UsernameTemplateCompile)?;
        template
            .generate(&UsernameMetadata::default())
            .map_err(PluginError::UsernameTemplateInvalid)?;

        let connection = if req.verify_connection {
            Some(self.producer.verify(ctx, &config).await?)
        } else {
            None
        };

        let sanitized = config.sanitized(&req.config);
        let mut guard = self.producer.lock().await;
        guard.install(config, connection).await;
        *self.username_template.write() = Some(Arc::new(template));
        drop(guard);

        info!("Plugin initialized");
        Ok(InitializeResponse { config: sanitized })
    }

    /// Create a user from the role's creation statements.
    #[instrument(
        skip(self, ctx, req),
        fields(role = %req.username_config.role_name, statements = req.statements.commands.len())
    )]
    pub async fn new_user(
        &self,
        ctx: &RequestContext,
        req: NewUserRequest,
    ) -> PluginResult<NewUserResponse> {
        if req.statements.commands.is_empty() {
            return Err(PluginError::EmptyCreationStatements);
        }

        let mut guard = self.producer.lock().await;
        let template = self.template()?;
        let conn = guard.connection(ctx).await?;
        let cluster = resolve_cluster(ctx, conn.as_ref()).await?;

        let username = template
            .generate(&req.username_config)
            .map_err(PluginError::UsernameGeneration)?;
        let expiration = format_expiration(req.expiration);

        let params = QueryParams::new()
            .with(NAME, &username)
            .with(USERNAME, &username)
            .with(PASSWORD, req.password.expose_secret())
            .with(EXPIRATION, &expiration)
            .with(CLUSTER, &cluster);
        // Drivers echo failed statements back, and these carry the new password.
        let executed = execute_script(ctx, conn.as_ref(), &req.statements.commands, &params)
            .await
            .map_err(|err| err.redact(&password_secret_values(req.password.expose_secret())))?;

        info!(username = %username, cluster = %cluster, executed, "Created user");
        Ok(NewUserResponse { username })
    }

    /// Rotate a user's password.
    ///
    /// Expiration changes are not performed: an expiration-only request
    /// fails before touching the database, and an expiration alongside a
    /// password is reported next to the outcome of the password change.
    #[instrument(skip(self, ctx, req), fields(username = %req.username))]
    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        req: UpdateUserRequest,
    ) -> PluginResult<UpdateUserResponse> {
        if req.username.is_empty() {
            return Err(PluginError::MissingUsername);
        }
        if req.password.is_none() && req.expiration.is_none() {
            return Err(PluginError::NoChangesRequested);
        }
        let Some(password) = req.password else {
            return Err(PluginError::Unsupported("changing user expiration"));
        };
        if password.new_password.expose_secret().is_empty() {
            return Err(PluginError::MissingPassword);
        }

        let mut errors = AggregateError::new();
        errors.push_result(self.change_user_password(ctx, &req.username, &password).await);
        if req.expiration.is_some() {
            errors.push(PluginError::Unsupported("changing user expiration"));
        }
        errors.into_result()?;
        Ok(UpdateUserResponse {})
    }

    async fn change_user_password(
        &self,
        ctx: &RequestContext,
        username: &str,
        change: &ChangePassword,
    ) -> PluginResult<()> {
        let default_script = [DEFAULT_CHANGE_PASSWORD_STATEMENT.to_string()];
        let scripts: &[String] = if change.statements.commands.is_empty() {
            &default_script
        } else {
            &change.statements.commands
        };

        let mut guard = self.producer.lock().await;
        let conn = guard.connection(ctx).await?;
        let cluster = resolve_cluster(ctx, conn.as_ref()).await?;

        if !user_exists(ctx, conn.as_ref(), username).await? {
            debug!("User not listed in system.users, changing password anyway");
        }

        let params = QueryParams::new()
            .with(NAME, username)
            .with(USERNAME, username)
            .with(PASSWORD, change.new_password.expose_secret())
            .with(CLUSTER, &cluster);
        let executed = execute_script(ctx, conn.as_ref(), scripts, &params)
            .await
            .map_err(|err| {
                err.redact(&password_secret_values(change.new_password.expose_secret()))
            })?;

        info!(cluster = %cluster, executed, "Rotated password");
        Ok(())
    }

    /// Remove a user, with the role's revocation statements or the
    /// built-in drop.
    #[instrument(
        skip(self, ctx, req),
        fields(username = %req.username, custom = !req.statements.commands.is_empty())
    )]
    pub async fn delete_user(
        &self,
        ctx: &RequestContext,
        req: DeleteUserRequest,
    ) -> PluginResult<DeleteUserResponse> {
        if req.username.is_empty() {
            return Err(PluginError::MissingUsername);
        }

        let mut guard = self.producer.lock().await;
        if req.statements.commands.is_empty() {
            Self::default_delete_user(ctx, &mut guard, &req.username).await?;
        } else {
            Self::custom_delete_user(ctx, &mut guard, &req.username, &req.statements.commands)
                .await?;
        }
        Ok(DeleteUserResponse {})
    }

    async fn custom_delete_user(
        ctx: &RequestContext,
        guard: &mut ConnectionGuard<'_>,
        username: &str,
        scripts: &[String],
    ) -> PluginResult<()> {
        let conn = guard.connection(ctx).await?;
        let params = QueryParams::new()
            .with(NAME, username)
            .with(USERNAME, username);
        let executed = execute_script(ctx, conn.as_ref(), scripts, &params).await?;
        info!(executed, "Revoked user with custom statements");
        Ok(())
    }

    async fn default_delete_user(
        ctx: &RequestContext,
        guard: &mut ConnectionGuard<'_>,
        username: &str,
    ) -> PluginResult<()> {
        let conn = guard.connection(ctx).await?;

        if !user_exists(ctx, conn.as_ref(), username).await? {
            debug!("User does not exist, nothing to revoke");
            return Ok(());
        }

        let cluster = resolve_cluster(ctx, conn.as_ref()).await?;
        ctx.run(conn.exec(DEFAULT_DROP_USER_STATEMENT, &[username, cluster.as_str()]))
            .await?
            .map_err(|source| PluginError::Execution { index: 0, source })?;
        info!(cluster = %cluster, "Dropped user");

        // Only a successful drop releases the connection; on failure it stays pooled.
        drop(conn);
        if let Err(e) = guard.close().await {
            warn!(error = %e, "Failed to close connection after drop");
        }
        Ok(())
    }

    /// Close the database connection. The configuration stays installed.
    pub async fn close(&self) -> PluginResult<()> {
        self.producer.lock().await.close().await
    }

    /// The plugin's own password, in every form it can take in outgoing
    /// text, mapped to [`PASSWORD_PLACEHOLDER`].
    #[must_use]
    pub fn secret_values(&self) -> HashMap<String, String> {
        self.producer
            .password()
            .map(|p| password_secret_values(&p))
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatabasePlugin for ClickhouseManager {
    fn type_name(&self) -> &'static str {
        CLICKHOUSE_TYPE_NAME
    }

    async fn initialize(
        &self,
        ctx: &RequestContext,
        req: InitializeRequest,
    ) -> PluginResult<InitializeResponse> {
        Self::initialize(self, ctx, req).await
    }

    async fn new_user(
        &self,
        ctx: &RequestContext,
        req: NewUserRequest,
    ) -> PluginResult<NewUserResponse> {
        Self::new_user(self, ctx, req).await
    }

    async fn update_user(
        &self,
        ctx: &RequestContext,
        req: UpdateUserRequest,
    ) -> PluginResult<UpdateUserResponse> {
        Self::update_user(self, ctx, req).await
    }

    async fn delete_user(
        &self,
        ctx: &RequestContext,
        req: DeleteUserRequest,
    ) -> PluginResult<DeleteUserResponse> {
        Self::delete_user(self, ctx, req).await
    }

    async fn close(&self, _ctx: &RequestContext) -> PluginResult<()> {
        Self::close(self).await
    }

    fn secret_values(&self) -> HashMap<String, String> {
        Self::secret_values(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_expiration_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_expiration(at), "2026-03-09 07:05:01");
    }

    #[test]
    fn test_username_template_defaults() {
        let empty = ConfigMap::new();
        assert_eq!(username_template_source(&empty).unwrap(), DEFAULT_USERNAME_TEMPLATE);

        let mut blank = ConfigMap::new();
        blank.insert(USERNAME_TEMPLATE_KEY.to_string(), json!(""));
        assert_eq!(username_template_source(&blank).unwrap(), DEFAULT_USERNAME_TEMPLATE);
    }

    #[test]
    fn test_username_template_wrong_type() {
        let mut config = ConfigMap::new();
        config.insert(USERNAME_TEMPLATE_KEY.to_string(), json!(12));
        let err = username_template_source(&config).unwrap_err();
        assert!(matches!(err, PluginError::UsernameTemplateLookup(_)));
        assert!(err.to_string().starts_with("failed to retrieve username_template"));
    }
}
