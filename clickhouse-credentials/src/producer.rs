//! Connection producer.
//!
//! Owns the validated connection configuration and the lazily opened
//! connection. All access goes through [`ConnectionProducer::lock`], whose
//! guard is held for the whole of a lifecycle operation so that two
//! operations never interleave statements or transactions on the shared
//! connection.

use std::sync::Arc;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::context::RequestContext;
use crate::database::{Connection, Driver};
use crate::error::{PluginError, PluginResult};

#[derive(Default)]
struct ProducerState {
    config: Option<ConnectionConfig>,
    connection: Option<Arc<dyn Connection>>,
}

/// Produces connections for the lifecycle manager.
pub struct ConnectionProducer {
    driver: Arc<dyn Driver>,
    state: Mutex<ProducerState>,
    // Readable without the guard so redaction never waits on a running
    // operation.
    password: RwLock<Option<SecretString>>,
}

impl ConnectionProducer {
    /// Create an uninitialized producer backed by `driver`.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            state: Mutex::new(ProducerState::default()),
            password: RwLock::new(None),
        }
    }

    /// Acquire the exclusive guard.
    pub async fn lock(&self) -> ConnectionGuard<'_> {
        ConnectionGuard {
            driver: self.driver.as_ref(),
            state: self.state.lock().await,
            password: &self.password,
        }
    }

    /// Open and ping a connection for a candidate configuration without
    /// touching the installed one.
    pub async fn verify(
        &self,
        ctx: &RequestContext,
        config: &ConnectionConfig,
    ) -> PluginResult<Arc<dyn Connection>> {
        let options = config.connect_options();
        let conn = ctx
            .run(self.driver.open(&options))
            .await?
            .map_err(PluginError::Connection)?;

        let failure = match ctx.run(conn.ping()).await {
            Ok(Ok(())) => {
                debug!("Verified connection");
                return Ok(conn);
            }
            Ok(Err(source)) => PluginError::Connection(source),
            Err(interrupted) => interrupted,
        };
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close unverified connection");
        }
        Err(failure)
    }

    /// The password the plugin itself logs in with, if configured.
    #[must_use]
    pub fn password(&self) -> Option<String> {
        self.password
            .read()
            .as_ref()
            .map(|p| p.expose_secret().to_string())
    }
}

/// Exclusive access to the producer's state.
///
/// Dropping the guard releases it, on every exit path.
pub struct ConnectionGuard<'a> {
    driver: &'a dyn Driver,
    state: MutexGuard<'a, ProducerState>,
    password: &'a RwLock<Option<SecretString>>,
}

impl ConnectionGuard<'_> {
    /// Replace the configuration and connection, closing the previous
    /// connection.
    pub async fn install(
        &mut self,
        config: ConnectionConfig,
        connection: Option<Arc<dyn Connection>>,
    ) {
        if let Some(old) = self.state.connection.take() {
            if let Err(e) = old.close().await {
                warn!(error = %e, "Failed to close previous connection");
            }
        }
        *self.password.write() = Some(config.password.clone());
        self.state.config = Some(config);
        self.state.connection = connection;
        info!("Installed connection configuration");
    }

    /// Return the live connection, opening one if needed.
    ///
    /// A pooled connection is pinged first; if the ping fails it is closed
    /// and replaced.
    pub async fn connection(&mut self, ctx: &RequestContext) -> PluginResult<Arc<dyn Connection>> {
        let options = self
            .state
            .config
            .as_ref()
            .ok_or(PluginError::NotInitialized)?
            .connect_options();

        if let Some(conn) = self.state.connection.take() {
            match ctx.run(conn.ping()).await {
                Ok(Ok(())) => {
                    self.state.connection = Some(Arc::clone(&conn));
                    return Ok(conn);
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Pooled connection failed liveness check, reconnecting");
                    if let Err(e) = conn.close().await {
                        debug!(error = %e, "Failed to close dead connection");
                    }
                }
                Err(interrupted) => {
                    self.state.connection = Some(conn);
                    return Err(interrupted);
                }
            }
        }

        let conn = ctx
            .run(self.driver.open(&options))
            .await?
            .map_err(PluginError::Connection)?;
        debug!("Opened connection");
        self.state.connection = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Close and forget the live connection, if any. The configuration
    /// stays installed, so the next operation reconnects.
    pub async fn close(&mut self) -> PluginResult<()> {
        match self.state.connection.take() {
            Some(conn) => conn.close().await.map_err(PluginError::Connection),
            None => Ok(()),
        }
    }
}
