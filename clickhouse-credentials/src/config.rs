//! Connection configuration.
//!
//! The host hands the plugin a JSON object. The connection half of it is
//! parsed here into a [`ConnectionConfig`]; the manager reads
//! `username_template` from the same map.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::database::ConnectOptions;
use crate::error::{PluginError, PluginResult};
use crate::redaction::password_secret_values;
use crate::statements::substitute;

/// Raw configuration map as supplied by the host.
pub type ConfigMap = Map<String, Value>;

/// Pool size used when `max_open_connections` is absent or zero.
pub const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 4;

/// Validated connection settings.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL, possibly containing `{{username}}`/`{{password}}`
    pub connection_url: String,
    /// Login used by the plugin itself
    pub username: String,
    /// Password used by the plugin itself
    pub password: SecretString,
    /// Pool ceiling on open connections
    pub max_open_connections: u32,
    /// Pool ceiling on idle connections (never above `max_open_connections`)
    pub max_idle_connections: u32,
    /// Maximum connection lifetime; zero means unlimited
    pub max_connection_lifetime: Duration,
    /// Substitute credentials into the URL without percent-encoding
    pub disable_escaping: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connection_url", &self.connection_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("max_open_connections", &self.max_open_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("max_connection_lifetime", &self.max_connection_lifetime)
            .field("disable_escaping", &self.disable_escaping)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flexible {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawConnectionConfig {
    connection_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    max_open_connections: Option<Flexible>,
    max_idle_connections: Option<Flexible>,
    max_connection_lifetime: Option<Flexible>,
    disable_escaping: Option<Flexible>,
}

fn parse_u32(key: &str, value: Option<Flexible>) -> PluginResult<u32> {
    let parsed = match value {
        None => return Ok(0),
        Some(Flexible::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Flexible::Text(s)) if s.trim().is_empty() => Some(0),
        Some(Flexible::Text(s)) => s.trim().parse::<u32>().ok(),
        Some(Flexible::Bool(_)) => None,
    };
    parsed.ok_or_else(|| PluginError::invalid_config(format!("{key} must be a non-negative integer")))
}

fn parse_bool(key: &str, value: Option<Flexible>) -> PluginResult<bool> {
    match value {
        None => Ok(false),
        Some(Flexible::Bool(b)) => Ok(b),
        Some(Flexible::Text(s)) => s
            .trim()
            .parse::<bool>()
            .map_err(|_| PluginError::invalid_config(format!("{key} must be a boolean"))),
        Some(Flexible::Number(_)) => Err(PluginError::invalid_config(format!(
            "{key} must be a boolean"
        ))),
    }
}

/// Parse a duration given as integer seconds or a humantime string
/// such as `"90s"` or `"1h 30m"`.
pub fn parse_duration_seconds(value: &str) -> PluginResult<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(Duration::ZERO);
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(trimmed)
        .map_err(|e| PluginError::invalid_config(format!("invalid duration {trimmed:?}: {e}")))
}

fn parse_lifetime(value: Option<Flexible>) -> PluginResult<Duration> {
    match value {
        None => Ok(Duration::ZERO),
        Some(Flexible::Number(n)) => n.as_u64().map(Duration::from_secs).ok_or_else(|| {
            PluginError::invalid_config("max_connection_lifetime must be non-negative")
        }),
        Some(Flexible::Text(s)) => parse_duration_seconds(&s),
        Some(Flexible::Bool(_)) => Err(PluginError::invalid_config(
            "max_connection_lifetime must be a duration",
        )),
    }
}

/// Percent-encode a credential for splicing into a connection URL.
pub(crate) fn escape_url_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

impl ConnectionConfig {
    /// Parse and validate the connection half of the host configuration.
    pub fn from_map(map: &ConfigMap) -> PluginResult<Self> {
        let raw: RawConnectionConfig = serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| PluginError::invalid_config(e.to_string()))?;

        let connection_url = raw.connection_url.unwrap_or_default();
        if connection_url.trim().is_empty() {
            return Err(PluginError::invalid_config("connection_url cannot be empty"));
        }

        let mut max_open_connections = parse_u32("max_open_connections", raw.max_open_connections)?;
        if max_open_connections == 0 {
            max_open_connections = DEFAULT_MAX_OPEN_CONNECTIONS;
        }
        let mut max_idle_connections = parse_u32("max_idle_connections", raw.max_idle_connections)?;
        if max_idle_connections == 0 || max_idle_connections > max_open_connections {
            max_idle_connections = max_open_connections;
        }

        Ok(Self {
            connection_url,
            username: raw.username.unwrap_or_default(),
            password: SecretString::from(raw.password.unwrap_or_default()),
            max_open_connections,
            max_idle_connections,
            max_connection_lifetime: parse_lifetime(raw.max_connection_lifetime)?,
            disable_escaping: parse_bool("disable_escaping", raw.disable_escaping)?,
        })
    }

    /// Redaction map for the password in a configuration that has not been
    /// validated yet. Empty when the map carries no string password.
    #[must_use]
    pub fn secret_values(map: &ConfigMap) -> HashMap<String, String> {
        map.get("password")
            .and_then(Value::as_str)
            .map(password_secret_values)
            .unwrap_or_default()
    }

    /// The configuration to hand back to the host: the input map with the
    /// pool settings normalised to what will actually be used.
    #[must_use]
    pub fn sanitized(&self, input: &ConfigMap) -> ConfigMap {
        let mut out = input.clone();
        out.insert(
            "max_open_connections".to_string(),
            Value::from(self.max_open_connections),
        );
        out.insert(
            "max_idle_connections".to_string(),
            Value::from(self.max_idle_connections),
        );
        out
    }

    /// Render the URL and pool settings a driver needs.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let (username, password) = if self.disable_escaping {
            (
                self.username.clone(),
                self.password.expose_secret().to_string(),
            )
        } else {
            (
                escape_url_component(&self.username),
                escape_url_component(self.password.expose_secret()),
            )
        };
        let url = substitute(
            &self.connection_url,
            &[("username", username.as_str()), ("password", password.as_str())],
        );
        ConnectOptions {
            url,
            max_open_connections: self.max_open_connections,
            max_idle_connections: self.max_idle_connections,
            max_connection_lifetime: (!self.max_connection_lifetime.is_zero())
                .then_some(self.max_connection_lifetime),
        }
    }
}
