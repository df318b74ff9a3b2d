//! Mock implementations for testing.
//!
//! [`MockDriver`] is an in-memory stand-in for a ClickHouse server. It
//! records every call the plugin makes, keeps a set of users that
//! committed `CREATE USER`/`DROP USER` statements update, and can be told
//! to fail or stall specific statements.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use clickhouse_credentials::cluster::{CLUSTER_QUERY, USER_EXISTS_QUERY};
use clickhouse_credentials::database::{ConnectOptions, DriverResult};
use clickhouse_credentials::{Connection, Driver, DriverError, Row, SqlValue, Transaction};
use parking_lot::Mutex;

/// A call observed by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// A connection was opened with this URL
    Open(String),
    /// Liveness check
    Ping,
    /// Single-row query
    QueryRow {
        /// Query text
        query: String,
        /// Bound arguments
        args: Vec<String>,
    },
    /// Statement outside a transaction
    Exec {
        /// Statement text
        query: String,
        /// Bound arguments
        args: Vec<String>,
    },
    /// Transaction started
    Begin,
    /// Statement inside a transaction
    TxExec(String),
    /// Transaction committed
    Commit,
    /// Transaction rolled back
    Rollback,
    /// Connection closed
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    cluster: Option<String>,
    users: BTreeSet<String>,
    hide_users_view: bool,
    committed: Vec<String>,
    fail_statement: Option<String>,
    stall_statement: Option<String>,
    fail_open: Option<DriverError>,
    fail_ping: bool,
    fail_queries: Option<DriverError>,
}

impl MockState {
    fn apply(&mut self, statement: &str) {
        let quoted_name = |prefix: &str| {
            statement
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('\''))
                .and_then(|rest| rest.split('\'').next())
                .map(str::to_string)
        };
        if let Some(name) = quoted_name("CREATE USER ") {
            self.users.insert(name);
        } else if let Some(name) = quoted_name("DROP USER ") {
            self.users.remove(&name);
        }
        self.committed.push(statement.to_string());
    }
}

/// In-memory ClickHouse stand-in.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// A single-node server with no users.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `name` from `system.clusters`.
    #[must_use]
    pub fn with_cluster(self, name: &str) -> Self {
        self.state.lock().cluster = Some(name.to_string());
        self
    }

    /// Seed an existing user.
    #[must_use]
    pub fn with_user(self, name: &str) -> Self {
        self.state.lock().users.insert(name.to_string());
        self
    }

    /// Make `system.users` return no rows at all.
    #[must_use]
    pub fn without_users_view(self) -> Self {
        self.state.lock().hide_users_view = true;
        self
    }

    /// Fail any transactional statement containing `needle`.
    #[must_use]
    pub fn fail_statement(self, needle: &str) -> Self {
        self.state.lock().fail_statement = Some(needle.to_string());
        self
    }

    /// Never finish any transactional statement containing `needle`.
    #[must_use]
    pub fn stall_statement(self, needle: &str) -> Self {
        self.state.lock().stall_statement = Some(needle.to_string());
        self
    }

    /// Fail every attempt to open a connection.
    #[must_use]
    pub fn fail_open(self, err: DriverError) -> Self {
        self.state.lock().fail_open = Some(err);
        self
    }

    /// Fail every introspection query.
    #[must_use]
    pub fn fail_queries(self, err: DriverError) -> Self {
        self.state.lock().fail_queries = Some(err);
        self
    }

    /// Toggle ping failures on existing connections.
    pub fn set_ping_failure(&self, fail: bool) {
        self.state.lock().fail_ping = fail;
    }

    /// Every call observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls; server state is kept.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Statements that were committed, in order.
    #[must_use]
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    /// Statements executed inside transactions, committed or not.
    #[must_use]
    pub fn tx_statements(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::TxExec(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current users.
    #[must_use]
    pub fn users(&self) -> BTreeSet<String> {
        self.state.lock().users.clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn open(&self, options: &ConnectOptions) -> DriverResult<Arc<dyn Connection>> {
        self.record(MockCall::Open(options.url.clone()));
        if let Some(err) = self.state.lock().fail_open.clone() {
            return Err(err);
        }
        Ok(Arc::new(MockConnection {
            driver: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Connection handed out by [`MockDriver`].
#[derive(Debug)]
pub struct MockConnection {
    driver: MockDriver,
    closed: AtomicBool,
}

impl MockConnection {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn ping(&self) -> DriverResult<()> {
        self.driver.record(MockCall::Ping);
        self.ensure_open()?;
        if self.driver.state.lock().fail_ping {
            return Err(DriverError::connection("ping failed"));
        }
        Ok(())
    }

    async fn query_row(&self, query: &str, args: &[&str]) -> DriverResult<Option<Row>> {
        self.driver.record(MockCall::QueryRow {
            query: query.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        });
        self.ensure_open()?;
        let state = self.driver.state.lock();
        if let Some(err) = state.fail_queries.clone() {
            return Err(err);
        }
        if query == CLUSTER_QUERY {
            return Ok(state
                .cluster
                .as_ref()
                .map(|c| Row::new(vec![SqlValue::String(c.clone())])));
        }
        if query == USER_EXISTS_QUERY {
            if state.hide_users_view {
                return Ok(None);
            }
            let name = args.first().copied().unwrap_or_default();
            let exists = i64::from(state.users.contains(name));
            return Ok(Some(Row::new(vec![SqlValue::Int(exists)])));
        }
        Err(DriverError::query(format!("unknown query: {query}")))
    }

    async fn exec(&self, query: &str, args: &[&str]) -> DriverResult<u64> {
        self.driver.record(MockCall::Exec {
            query: query.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        });
        self.ensure_open()?;
        let mut state = self.driver.state.lock();
        if query.starts_with("DROP USER") {
            let name = args.first().copied().unwrap_or_default();
            return Ok(u64::from(state.users.remove(name)));
        }
        state.committed.push(query.to_string());
        Ok(0)
    }

    async fn begin(&self) -> DriverResult<Box<dyn Transaction>> {
        self.driver.record(MockCall::Begin);
        self.ensure_open()?;
        Ok(Box::new(MockTransaction {
            driver: self.driver.clone(),
            pending: Vec::new(),
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        self.driver.record(MockCall::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transaction handed out by [`MockConnection`]; statements only take
/// effect on commit.
#[derive(Debug)]
pub struct MockTransaction {
    driver: MockDriver,
    pending: Vec<String>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn exec(&mut self, statement: &str) -> DriverResult<()> {
        self.driver.record(MockCall::TxExec(statement.to_string()));
        let (fail, stall) = {
            let state = self.driver.state.lock();
            (
                state
                    .fail_statement
                    .as_ref()
                    .is_some_and(|n| statement.contains(n.as_str())),
                state
                    .stall_statement
                    .as_ref()
                    .is_some_and(|n| statement.contains(n.as_str())),
            )
        };
        if stall {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(DriverError::query(format!(
                "Syntax error: failed at position 1: {statement}"
            )));
        }
        self.pending.push(statement.to_string());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DriverResult<()> {
        self.driver.record(MockCall::Commit);
        let mut state = self.driver.state.lock();
        for statement in &self.pending {
            state.apply(statement);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        self.driver.record(MockCall::Rollback);
        Ok(())
    }
}
