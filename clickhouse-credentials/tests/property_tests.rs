//! Property-based tests for the ClickHouse credentials plugin.
//!
//! Tests validate:
//! - Scripts expand to their non-empty statements, in order, fully substituted
//! - Generated usernames never exceed the ClickHouse length limit
//! - Substituted values cannot terminate the string literal they sit in
//! - A failing statement at any position leaves nothing committed

use std::sync::Arc;

use clickhouse_credentials::statements::{
    CLUSTER, EXPIRATION, NAME, PASSWORD, QueryParams, USERNAME, escape_literal, expand, render,
    split_statements,
};
use clickhouse_credentials::username::{DEFAULT_USERNAME_TEMPLATE, MAX_USERNAME_LENGTH};
use clickhouse_credentials::{
    ClickhouseManager, InitializeRequest, NewUserRequest, PluginError, RequestContext, Statements,
    UsernameMetadata, UsernameTemplate,
};
use proptest::prelude::*;
use secrecy::SecretString;
use test_utils::fixtures::{connection_config, expiration};
use test_utils::generators::{
    cluster_strategy, metadata_name_strategy, password_strategy, quoting_password_strategy,
    script_strategy,
};
use test_utils::{MockCall, MockDriver};

/// Index just past the closing quote of the literal opened at `start`.
fn literal_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\'' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Statements come out in order, trimmed, with empty pieces dropped and
    /// every known placeholder replaced.
    #[test]
    fn prop_script_expands_in_order(
        (script, statements) in script_strategy(),
        username in "v-[a-z0-9-]{1,40}",
        password in password_strategy(),
        cluster in cluster_strategy(),
    ) {
        let cluster = cluster.unwrap_or_default();
        let params = QueryParams::new()
            .with(NAME, &username)
            .with(USERNAME, &username)
            .with(PASSWORD, &password)
            .with(EXPIRATION, "2030-01-02 03:04:05")
            .with(CLUSTER, &cluster);

        let expected: Vec<String> = statements
            .iter()
            .map(|s| {
                s.replace("{{name}}", &username)
                    .replace("{{username}}", &username)
                    .replace("{{password}}", &password)
                    .replace("{{expiration}}", "2030-01-02 03:04:05")
                    .replace("{{cluster}}", &cluster)
            })
            .collect();
        let expanded: Vec<String> = expand(&[script], &params)
            .iter()
            .map(|s| s.to_string())
            .collect();

        prop_assert_eq!(expanded, expected);
    }

    /// Splitting never yields an empty or padded statement.
    #[test]
    fn prop_split_has_no_blank_statements((script, statements) in script_strategy()) {
        let pieces: Vec<&str> = split_statements(&script).collect();
        prop_assert_eq!(pieces.len(), statements.len());
        for piece in pieces {
            prop_assert!(!piece.is_empty());
            prop_assert_eq!(piece, piece.trim());
        }
    }

    /// The default template always fits ClickHouse's identifier limit.
    #[test]
    fn prop_default_username_is_bounded(
        display in metadata_name_strategy(),
        role in metadata_name_strategy(),
    ) {
        let template = UsernameTemplate::compile(DEFAULT_USERNAME_TEMPLATE).unwrap();
        let username = template
            .generate(&UsernameMetadata::new(display, role))
            .unwrap();

        prop_assert!(username.len() <= MAX_USERNAME_LENGTH, "{} bytes", username.len());
        prop_assert!(username.starts_with("v-"));
    }

    /// A password spliced into a quoted literal ends exactly where the
    /// template's closing quote does.
    #[test]
    fn prop_escaped_value_stays_inside_literal(password in quoting_password_strategy()) {
        let params = QueryParams::new().with(PASSWORD, &password);
        let rendered = render("IDENTIFIED BY '{{password}}' SETTINGS x", &params);

        let start = rendered.find('\'').unwrap();
        let end = literal_end(&rendered, start).unwrap();
        prop_assert_eq!(&rendered[end..], " SETTINGS x");
        prop_assert_eq!(&rendered[start + 1..end - 1], escape_literal(&password));
    }

    /// Whichever statement fails, the transaction is rolled back and the
    /// statements after it never run.
    #[test]
    fn prop_failure_at_any_position_commits_nothing(
        count in 1usize..6,
        failing in 0usize..6,
    ) {
        let failing = failing % count;
        let script = (0..count)
            .map(|i| format!("INSERT INTO audit VALUES ({i}, '{{{{username}}}}')"))
            .collect::<Vec<_>>()
            .join("; ");
        let driver = MockDriver::new().fail_statement(&format!("({failing},"));
        let manager = ClickhouseManager::new(Arc::new(driver.clone()));
        let ctx = RequestContext::background();

        let err = tokio_test::block_on(async {
            manager
                .initialize(
                    &ctx,
                    InitializeRequest {
                        config: connection_config(),
                        verify_connection: false,
                    },
                )
                .await
                .unwrap();
            manager
                .new_user(
                    &ctx,
                    NewUserRequest {
                        username_config: UsernameMetadata::new("svc", "ops"),
                        statements: Statements::new([script]),
                        password: SecretString::from("audit-pw!"),
                        expiration: expiration(),
                    },
                )
                .await
                .unwrap_err()
        });

        let is_failing_index = matches!(err, PluginError::Execution { index, .. } if index == failing);
        prop_assert!(is_failing_index);
        prop_assert_eq!(driver.tx_statements().len(), failing + 1);
        prop_assert_eq!(driver.count(|c| *c == MockCall::Rollback), 1);
        prop_assert_eq!(driver.count(|c| *c == MockCall::Commit), 0);
        prop_assert!(driver.committed().is_empty());
    }
}
