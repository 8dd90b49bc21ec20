//! IRC-style glob matching for hostmasks.
//!
//! Permitted wildcards are `*` (zero or more characters) and `?` (exactly one
//! character). Matching ignores ASCII case.

use std::fmt;

use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

/// A hostmask pattern such as `*!*@*.example.net`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern(String);

impl Pattern {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, s: &str) -> bool {
        WildMatch::new(&self.0.to_ascii_lowercase()).matches(&s.to_ascii_lowercase())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Whether any of `patterns` matches `s`.
pub fn matches_any(patterns: &[Pattern], s: &str) -> bool {
    patterns.iter().any(|p| p.matches(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matching() {
        let p = Pattern::new("*!*@*.Example.NET");
        assert!(p.matches("bob!~b@host.example.net"));
        assert!(!p.matches("bob!~b@example.org"));

        let p = Pattern::new("vpn?!*@*");
        assert!(p.matches("vpn2!x@y"));
        assert!(!p.matches("vpn!x@y"));
    }

    #[test]
    fn test_brackets_are_literal() {
        let p = Pattern::new("[away]nick!*@*");
        assert!(p.matches("[away]nick!u@h"));
        assert!(!p.matches("anick!u@h"));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec![Pattern::new("a!*@*"), Pattern::new("*@admin.host")];
        assert!(matches_any(&patterns, "x!y@admin.host"));
        assert!(!matches_any(&patterns, "x!y@other"));
        assert!(!matches_any(&[], "x!y@other"));
    }
}
