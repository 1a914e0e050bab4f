//! Release version tokens
//!
//! A version is an opaque string. The only normalisation is dropping one
//! leading non-digit character when it directly precedes a digit, so a
//! release tagged `v2.0.0` matches firmware built as `2.0.0`. Two versions
//! are "the same release" when their stripped forms are byte-equal; there is
//! no ordering, so `10.0.0` against `9.0.0` is only ever "different".
use std::fmt;

/// Drop a single leading non-digit prefix character (`v2.0.0` -> `2.0.0`).
///
/// The prefix is only removed when a digit follows it. That keeps the
/// operation idempotent: whatever it returns either starts with a digit or
/// was left untouched.
pub fn strip_prefix(raw: &str) -> &str {
    let mut chars = raw.chars();
    match (chars.next(), chars.clone().next()) {
        (Some(first), Some(second)) if !first.is_ascii_digit() && second.is_ascii_digit() => {
            chars.as_str()
        }
        _ => raw,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Version(String);

impl Version {
    pub fn new(raw: &str) -> Self {
        Self(strip_prefix(raw.trim()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Exact match after prefix stripping.
    pub fn same_release(&self, other: &Version) -> bool {
        self.0 == other.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_v_prefix() {
        assert_eq!(strip_prefix("v2.0.0"), "2.0.0");
        assert_eq!(strip_prefix("V1.4"), "1.4");
        assert_eq!(strip_prefix("2.0.0"), "2.0.0");
    }

    #[test]
    fn test_strip_leaves_non_version_tags_alone() {
        assert_eq!(strip_prefix(""), "");
        assert_eq!(strip_prefix("v"), "v");
        assert_eq!(strip_prefix("vv1.0"), "vv1.0");
        assert_eq!(strip_prefix("release-3"), "release-3");
    }

    #[test]
    fn test_same_release_ignores_prefix() {
        assert!(Version::new("v1.0.0").same_release(&Version::new("1.0.0")));
        assert!(!Version::new("1.0.1").same_release(&Version::new("1.0.0")));
    }

    #[test]
    fn test_no_semantic_ordering() {
        // "9.0.0" and "10.0.0" are just different strings
        let nine = Version::new("9.0.0");
        let ten = Version::new("v10.0.0");
        assert!(!nine.same_release(&ten));
        assert_eq!(ten.as_str(), "10.0.0");
    }

    proptest! {
        #[test]
        fn prop_strip_is_idempotent(raw in "\\PC{0,12}") {
            let once = strip_prefix(&raw);
            prop_assert_eq!(strip_prefix(once), once);
        }

        #[test]
        fn prop_strip_removes_at_most_one_char(raw in "[a-zA-Z]?[0-9][0-9.]{0,8}") {
            let stripped = strip_prefix(&raw);
            prop_assert!(raw.len() - stripped.len() <= 1);
            prop_assert!(stripped.starts_with(|c: char| c.is_ascii_digit()));
        }
    }
}
