//! Shared proptest generators.
//!
//! Inputs are deliberately hostile where the plugin must cope: display
//! and role names include empty strings, multi-byte characters and values
//! far longer than any truncation length.

use proptest::prelude::*;

/// Display or role names, including pathological ones.
pub fn metadata_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-z][a-z0-9-]{0,7}",
        "[A-Za-z0-9_.@-]{9,80}",
        "\\PC{0,40}",
        Just("é".repeat(64)),
    ]
}

/// Passwords as a secrets manager would generate them.
pub fn password_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9!@#$%^&*-]{8,64}"
}

/// Passwords that need escaping inside a SQL string literal.
pub fn quoting_password_strategy() -> impl Strategy<Value = String> {
    ("[A-Za-z0-9]{4,16}", prop_oneof![Just("'"), Just("\\"), Just("\\'")], "[A-Za-z0-9]{4,16}")
        .prop_map(|(head, quote, tail)| format!("{head}{quote}{tail}"))
}

/// A single statement body without `;`.
pub fn statement_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("CREATE USER '{{username}}' IDENTIFIED WITH plaintext_password '{{password}}'".to_string()),
        Just("GRANT SELECT ON default.* TO '{{name}}'".to_string()),
        Just("ALTER USER '{{username}}' VALID UNTIL '{{expiration}}'".to_string()),
        Just("GRANT ON CLUSTER '{{cluster}}' readonly TO '{{username}}'".to_string()),
        "[A-Z]{3,8} [a-z_]{1,12}",
    ]
}

/// Scripts of statements separated by `;`, with random padding and empty
/// pieces. Returns the script and the statements it should expand to,
/// before substitution.
pub fn script_strategy() -> impl Strategy<Value = (String, Vec<String>)> {
    prop::collection::vec((statement_strategy(), "[ \t\n]{0,3}", 0usize..3), 1..6).prop_map(
        |parts| {
            let mut script = String::new();
            let mut expected = Vec::new();
            for (statement, padding, empties) in parts {
                script.push_str(&padding);
                script.push_str(&statement);
                script.push_str(&padding);
                script.push(';');
                script.push_str(&";".repeat(empties));
                expected.push(statement);
            }
            (script, expected)
        },
    )
}

/// ClickHouse cluster names, or none for a single-node server.
pub fn cluster_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), "[a-z][a-z0-9_]{2,15}".prop_map(Some)]
}
