//! Topology and user introspection.
//!
//! Both lookups read ClickHouse `system.*` tables, which are not guaranteed
//! to be populated on every deployment. An empty result is therefore never
//! an error: a single-node server has no cluster, and a user missing from
//! `system.users` is treated as absent.

use tracing::debug;

use crate::context::RequestContext;
use crate::database::Connection;
use crate::error::{PluginError, PluginResult};

/// Lists the cluster the server belongs to.
pub const CLUSTER_QUERY: &str = "SELECT DISTINCT cluster FROM system.clusters;";

/// Checks whether a user exists; takes the username as `$1`.
pub const USER_EXISTS_QUERY: &str =
    "SELECT c > 0 AS exists FROM ( SELECT count() AS c FROM system.users WHERE name=$1 );";

/// Resolve the cluster name used in `ON CLUSTER` clauses.
///
/// Always queries the server; cluster membership can change between calls.
/// Returns an empty string when the server reports no cluster.
pub async fn resolve_cluster(ctx: &RequestContext, conn: &dyn Connection) -> PluginResult<String> {
    let row = ctx
        .run(conn.query_row(CLUSTER_QUERY, &[]))
        .await?
        .map_err(|source| PluginError::Query {
            context: "unable to resolve cluster",
            source,
        })?;

    let cluster = match row {
        Some(row) => row.get_string(0).map_err(|source| PluginError::Query {
            context: "unable to resolve cluster",
            source,
        })?,
        None => String::new(),
    };
    debug!(cluster = %cluster, "Resolved cluster");
    Ok(cluster)
}

/// Check whether `username` appears in `system.users`.
///
/// No rows counts as "does not exist".
pub async fn user_exists(
    ctx: &RequestContext,
    conn: &dyn Connection,
    username: &str,
) -> PluginResult<bool> {
    let row = ctx
        .run(conn.query_row(USER_EXISTS_QUERY, &[username]))
        .await?
        .map_err(|source| PluginError::Query {
            context: "user does not appear to exist",
            source,
        })?;

    match row {
        Some(row) => row.get_bool(0).map_err(|source| PluginError::Query {
            context: "user does not appear to exist",
            source,
        }),
        None => Ok(false),
    }
}
