//! Property-based tests for secret scrubbing.
//!
//! Tests validate:
//! - Scrubbed text never contains a known secret
//! - Text without secrets passes through unchanged

use proptest::prelude::*;
use rust_common::sanitize::{contains_secret, scrub_secrets};
use std::collections::HashMap;

// Secrets are long enough that the placeholder text cannot reintroduce them.
fn secret_strategy() -> impl Strategy<Value = String> {
    "[A-Z0-9!@#$%^&*]{6,32}"
}

fn text_strategy() -> impl Strategy<Value = String> {
    "[a-z ]{0,40}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: a secret embedded anywhere in a message is always removed.
    #[test]
    fn prop_scrubbed_text_has_no_secret(
        prefix in text_strategy(),
        suffix in text_strategy(),
        secret in secret_strategy(),
    ) {
        let map = HashMap::from([(secret.clone(), "[password]".to_string())]);
        let message = format!("{prefix}{secret}{suffix}");

        let scrubbed = scrub_secrets(&message, &map);

        prop_assert!(!contains_secret(&scrubbed, &map));
        prop_assert!(scrubbed.contains("[password]"));
    }

    /// Property: text that never mentions a secret is returned untouched.
    #[test]
    fn prop_clean_text_unchanged(text in "[a-z ]{0,40}") {
        let map = HashMap::from([("ZZ-not-present-ZZ".to_string(), "[password]".to_string())]);
        prop_assert_eq!(scrub_secrets(&text, &map), text);
    }
}
