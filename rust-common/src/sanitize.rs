//! Secret scrubbing for text that leaves the process.
//!
//! Callers hand over a mapping of raw secret text to the placeholder that
//! should replace it. Every occurrence is replaced; longer secrets are
//! applied first so a secret that contains another one is never left
//! half-replaced.

use std::collections::HashMap;

/// Replace every occurrence of each secret in `text` with its placeholder.
///
/// Empty secrets are ignored, otherwise they would match between every
/// character.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use rust_common::scrub_secrets;
///
/// let secrets = HashMap::from([("hunter2".to_string(), "[password]".to_string())]);
/// let scrubbed = scrub_secrets("auth failed for hunter2", &secrets);
/// assert_eq!(scrubbed, "auth failed for [password]");
/// ```
#[must_use]
pub fn scrub_secrets(text: &str, secrets: &HashMap<String, String>) -> String {
    let mut ordered: Vec<(&String, &String)> =
        secrets.iter().filter(|(secret, _)| !secret.is_empty()).collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut out = text.to_string();
    for (secret, placeholder) in ordered {
        if out.contains(secret.as_str()) {
            out = out.replace(secret.as_str(), placeholder);
        }
    }
    out
}

/// Returns `true` when `text` still contains any of the given secrets.
#[must_use]
pub fn contains_secret(text: &str, secrets: &HashMap<String, String>) -> bool {
    secrets
        .keys()
        .any(|secret| !secret.is_empty() && text.contains(secret.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_replaces_all_occurrences() {
        let map = secrets(&[("s3cret", "[password]")]);
        assert_eq!(
            scrub_secrets("s3cret and s3cret again", &map),
            "[password] and [password] again"
        );
    }

    #[test]
    fn test_empty_secret_ignored() {
        let map = secrets(&[("", "[password]")]);
        assert_eq!(scrub_secrets("nothing to hide", &map), "nothing to hide");
        assert!(!contains_secret("nothing to hide", &map));
    }

    #[test]
    fn test_longest_secret_wins() {
        let map = secrets(&[("abc", "[short]"), ("abcdef", "[long]")]);
        assert_eq!(scrub_secrets("xx abcdef yy", &map), "xx [long] yy");
    }

    #[test]
    fn test_contains_secret() {
        let map = secrets(&[("pw", "[password]")]);
        assert!(contains_secret("the pw leaked", &map));
        assert!(!contains_secret("clean", &map));
    }
}
