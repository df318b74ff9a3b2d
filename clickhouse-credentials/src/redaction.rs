//! Secret redaction for errors that leave the plugin.
//!
//! Driver errors can echo statement text or connection URLs back, and both
//! may hold live passwords. [`SanitizingPlugin`] wraps any plugin and runs
//! every error it returns through the plugin's own
//! [`DatabasePlugin::secret_values`] before handing it to the host.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_common::sanitize::{contains_secret, scrub_secrets};
use tracing::debug;

use crate::config::{ConnectionConfig, escape_url_component};
use crate::context::RequestContext;
use crate::error::{PluginError, PluginResult};
use crate::manager::PASSWORD_PLACEHOLDER;
use crate::plugin::{
    DatabasePlugin, DeleteUserRequest, DeleteUserResponse, InitializeRequest, InitializeResponse,
    NewUserRequest, NewUserResponse, UpdateUserRequest, UpdateUserResponse,
};
use crate::statements::escape_literal;

/// Redaction map for one password.
///
/// Covers the password as given, percent-encoded as it appears in a
/// connection URL, and escaped as it appears inside a statement literal.
/// Empty for an empty password.
#[must_use]
pub fn password_secret_values(password: &str) -> HashMap<String, String> {
    if password.is_empty() {
        return HashMap::new();
    }
    [
        password.to_string(),
        escape_url_component(password),
        escape_literal(password),
    ]
    .into_iter()
    .map(|form| (form, PASSWORD_PLACEHOLDER.to_string()))
    .collect()
}

impl PluginError {
    /// Scrub `secrets` out of this error's message.
    ///
    /// Errors that mention none of the secrets are returned unchanged;
    /// otherwise the result is a [`PluginError::Sanitized`] with the same
    /// kind.
    #[must_use]
    pub fn redact(self, secrets: &HashMap<String, String>) -> Self {
        let message = self.to_string();
        if !contains_secret(&message, secrets) {
            return self;
        }
        debug!(kind = %self.kind(), "Redacted secret from error");
        Self::Sanitized {
            kind: self.kind(),
            message: scrub_secrets(&message, secrets),
        }
    }
}

/// Wraps a plugin so that no error it returns contains a known secret.
pub struct SanitizingPlugin<P> {
    inner: P,
}

impl<P: DatabasePlugin> SanitizingPlugin<P> {
    /// Wrap `inner`.
    pub const fn new(inner: P) -> Self {
        Self { inner }
    }

    /// The wrapped plugin.
    pub const fn inner(&self) -> &P {
        &self.inner
    }

    fn sanitize<T>(&self, result: PluginResult<T>) -> PluginResult<T> {
        result.map_err(|err| err.redact(&self.inner.secret_values()))
    }
}

#[async_trait]
impl<P: DatabasePlugin> DatabasePlugin for SanitizingPlugin<P> {
    fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    async fn initialize(
        &self,
        ctx: &RequestContext,
        req: InitializeRequest,
    ) -> PluginResult<InitializeResponse> {
        // The candidate password is not installed until initialize succeeds,
        // so errors are scrubbed against it as well as the current one.
        let candidate = ConnectionConfig::secret_values(&req.config);
        self.inner.initialize(ctx, req).await.map_err(|err| {
            let mut secrets = self.inner.secret_values();
            secrets.extend(candidate);
            err.redact(&secrets)
        })
    }

    async fn new_user(
        &self,
        ctx: &RequestContext,
        req: NewUserRequest,
    ) -> PluginResult<NewUserResponse> {
        let result = self.inner.new_user(ctx, req).await;
        self.sanitize(result)
    }

    async fn update_user(
        &self,
        ctx: &RequestContext,
        req: UpdateUserRequest,
    ) -> PluginResult<UpdateUserResponse> {
        let result = self.inner.update_user(ctx, req).await;
        self.sanitize(result)
    }

    async fn delete_user(
        &self,
        ctx: &RequestContext,
        req: DeleteUserRequest,
    ) -> PluginResult<DeleteUserResponse> {
        let result = self.inner.delete_user(ctx, req).await;
        self.sanitize(result)
    }

    async fn close(&self, ctx: &RequestContext) -> PluginResult<()> {
        let result = self.inner.close(ctx).await;
        self.sanitize(result)
    }

    fn secret_values(&self) -> HashMap<String, String> {
        self.inner.secret_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DriverError;
    use crate::error::ErrorKind;

    fn secrets() -> HashMap<String, String> {
        HashMap::from([("hunter2".to_string(), "[password]".to_string())])
    }

    #[test]
    fn test_redact_scrubs_and_keeps_kind() {
        let err = PluginError::Connection(DriverError::connection(
            "dial clickhouse://vault:hunter2@db:9000 failed",
        ));
        let redacted = err.redact(&secrets());
        assert_eq!(redacted.kind(), ErrorKind::Connectivity);
        assert!(redacted.is_retryable());
        let text = redacted.to_string();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("vault:[password]@db"));
    }

    #[test]
    fn test_redact_leaves_clean_errors_typed() {
        let redacted = PluginError::MissingUsername.redact(&secrets());
        assert!(matches!(redacted, PluginError::MissingUsername));
    }

    #[test]
    fn test_password_secret_values_forms() {
        let secrets = password_secret_values("it's a@b");
        assert_eq!(secrets.len(), 3);
        assert!(secrets.contains_key("it's a@b"));
        assert!(secrets.contains_key("it%27s%20a%40b"));
        assert!(secrets.contains_key(r"it\'s a@b"));
        assert!(secrets.values().all(|p| p == PASSWORD_PLACEHOLDER));

        assert_eq!(password_secret_values("plain").len(), 1);
        assert!(password_secret_values("").is_empty());
    }

    #[test]
    fn test_redact_escaped_password_in_statement() {
        let err = PluginError::Execution {
            index: 0,
            source: DriverError::query(r"Syntax error: IDENTIFIED BY 'o\'brien'"),
        };
        let text = err.redact(&password_secret_values("o'brien")).to_string();
        assert!(!text.contains("brien"), "{text}");
        assert!(text.contains("IDENTIFIED BY '[password]'"));
    }

    #[test]
    fn test_redact_with_no_secrets() {
        let err = PluginError::Execution {
            index: 2,
            source: DriverError::query("hunter2"),
        };
        let redacted = err.redact(&HashMap::new());
        assert!(matches!(redacted, PluginError::Execution { index: 2, .. }));
    }
}
