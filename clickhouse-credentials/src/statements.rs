//! Statement templating.
//!
//! Operators configure statement scripts per role, e.g.
//!
//! ```text
//! CREATE USER '{{username}}' IDENTIFIED WITH plaintext_password '{{password}}';
//! GRANT SELECT ON db.* TO '{{username}}';
//! ```
//!
//! Each script is split on `;`, trimmed, stripped of empty pieces and has
//! its `{{name}}` placeholders replaced. Placeholders this module does not
//! know about are left in place; the database then rejects the statement.
//!
//! The driver cannot bind parameters in user-administration DDL, so values
//! are spliced into the text. Templates are trusted operator input; values
//! are not, and are escaped for a single-quoted string literal before they
//! are substituted.

use std::fmt;

use zeroize::Zeroizing;

/// Placeholder for the generated or existing username (legacy alias).
pub const NAME: &str = "name";
/// Placeholder for the generated or existing username.
pub const USERNAME: &str = "username";
/// Placeholder for the password being set.
pub const PASSWORD: &str = "password";
/// Placeholder for the credential expiration timestamp.
pub const EXPIRATION: &str = "expiration";
/// Placeholder for the resolved cluster name.
pub const CLUSTER: &str = "cluster";

/// Named values available to a statement script.
///
/// Values are wiped from memory when the parameters are dropped.
#[derive(Default)]
pub struct QueryParams {
    values: Vec<(&'static str, Zeroizing<String>)>,
}

impl QueryParams {
    /// Empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value.
    #[must_use]
    pub fn with(mut self, key: &'static str, value: &str) -> Self {
        self.values.retain(|(k, _)| *k != key);
        self.values.push((key, Zeroizing::new(value.to_string())));
        self
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parameter names, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|(k, _)| *k)
    }
}

impl fmt::Debug for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

/// Split a script into trimmed, non-empty statements in written order.
pub fn split_statements(script: &str) -> impl Iterator<Item = &str> {
    script.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Escape a value for use inside a single-quoted ClickHouse string literal.
#[must_use]
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace `{{key}}` placeholders in a single pass.
///
/// Substituted text is never rescanned, so a value that itself looks like
/// a placeholder stays literal.
pub(crate) fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        match values.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push_str("{{");
                out.push_str(key);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Render one statement with escaped parameter values.
#[must_use]
pub fn render(statement: &str, params: &QueryParams) -> Zeroizing<String> {
    let escaped: Vec<(&str, Zeroizing<String>)> = params
        .values
        .iter()
        .map(|(k, v)| (*k, Zeroizing::new(escape_literal(v))))
        .collect();
    let pairs: Vec<(&str, &str)> = escaped.iter().map(|(k, v)| (*k, v.as_str())).collect();
    Zeroizing::new(substitute(statement, &pairs))
}

/// Expand every script into executable statements, preserving order.
#[must_use]
pub fn expand<S: AsRef<str>>(scripts: &[S], params: &QueryParams) -> Vec<Zeroizing<String>> {
    scripts
        .iter()
        .flat_map(|script| split_statements(script.as_ref()))
        .map(|statement| render(statement, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> QueryParams {
        QueryParams::new()
            .with(NAME, "v-app")
            .with(USERNAME, "v-app")
            .with(PASSWORD, "pw")
            .with(CLUSTER, "main")
    }

    #[test]
    fn test_split_drops_empty_and_trims() {
        let parts: Vec<&str> = split_statements("  A ;; B;\n C ;  ").collect();
        assert_eq!(parts, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_expand_preserves_order_across_scripts() {
        let scripts = vec![
            "CREATE USER '{{username}}' IDENTIFIED BY '{{password}}'; GRANT SELECT ON *.* TO '{{name}}'"
                .to_string(),
            "SET ROLE r ON CLUSTER '{{cluster}}';".to_string(),
        ];
        let out: Vec<String> = expand(&scripts, &params())
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            out,
            vec![
                "CREATE USER 'v-app' IDENTIFIED BY 'pw'",
                "GRANT SELECT ON *.* TO 'v-app'",
                "SET ROLE r ON CLUSTER 'main'",
            ]
        );
    }

    #[test]
    fn test_unknown_placeholder_left_in_place() {
        let out = render("ALTER USER '{{username}}' VALID UNTIL '{{expiration}}'", &params());
        assert_eq!(out.as_str(), "ALTER USER 'v-app' VALID UNTIL '{{expiration}}'");
    }

    #[test]
    fn test_values_escaped() {
        let p = QueryParams::new().with(PASSWORD, r"it's\bad");
        let out = render("'{{password}}'", &p);
        assert_eq!(out.as_str(), r"'it\'s\\bad'");
    }

    #[test]
    fn test_value_not_rescanned() {
        let p = QueryParams::new()
            .with(USERNAME, "{{password}}")
            .with(PASSWORD, "secret");
        let out = render("{{username}}", &p);
        assert_eq!(out.as_str(), "{{password}}");
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        assert_eq!(substitute("a {{username", &[("username", "x")]), "a {{username");
    }

    #[test]
    fn test_with_replaces_existing() {
        let p = QueryParams::new().with(USERNAME, "a").with(USERNAME, "b");
        assert_eq!(p.get(USERNAME), Some("b"));
        assert_eq!(p.keys().count(), 1);
    }

    #[test]
    fn test_debug_shows_only_keys() {
        let debug = format!("{:?}", params());
        assert!(debug.contains("password"));
        assert!(!debug.contains("pw\""));
    }
}
