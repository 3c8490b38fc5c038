use glob::{MatchOptions, Pattern};
use regex::Regex;

const REGEX_META: &[char] = &['^', '$', '+', '(', ')', '{', '}', '|', '\\'];
const GLOB_META: &[char] = &['*', '?', '['];

/// Matches a node name against an exact string, a glob or a regex.
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Exact(String),
    Glob(Pattern),
    Regex(Regex),
}

impl NameMatcher {
    /// Picks the matching mode from the text itself: regex metacharacters
    /// select a regex, `*`/`?`/`[` a glob, anything else an exact match.
    pub fn auto(text: &str) -> Result<Self, String> {
        if text.contains(REGEX_META) {
            Self::regex(text)
        } else if text.contains(GLOB_META) {
            Self::glob(text)
        } else {
            Ok(NameMatcher::Exact(text.to_string()))
        }
    }

    /// Shell-style glob (`*`, `?`, `[...]`, `[!...]`), case-insensitive.
    pub fn glob(pattern: &str) -> Result<Self, String> {
        Pattern::new(pattern)
            .map(NameMatcher::Glob)
            .map_err(|e| format!("invalid glob '{pattern}': {e}"))
    }

    pub fn regex(pattern: &str) -> Result<Self, String> {
        Regex::new(pattern)
            .map(NameMatcher::Regex)
            .map_err(|e| format!("invalid regex '{pattern}': {e}"))
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            NameMatcher::Exact(expected) => expected == name,
            NameMatcher::Glob(pattern) => pattern.matches_with(
                name,
                MatchOptions {
                    case_sensitive: false,
                    ..Default::default()
                },
            ),
            NameMatcher::Regex(re) => re.is_match(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_detects_mode_from_text() {
        assert!(matches!(NameMatcher::auto("Player").unwrap(), NameMatcher::Exact(_)));
        assert!(matches!(NameMatcher::auto("Enemy_*").unwrap(), NameMatcher::Glob(_)));
        assert!(matches!(NameMatcher::auto("^Enemy_\\d+$").unwrap(), NameMatcher::Regex(_)));
        // dots are common in names and stay exact
        assert!(matches!(NameMatcher::auto("v1.2").unwrap(), NameMatcher::Exact(_)));
    }

    #[test]
    fn glob_matching() {
        let m = NameMatcher::glob("Enemy_?").unwrap();
        assert!(m.is_match("Enemy_1"));
        assert!(m.is_match("enemy_2"));
        assert!(!m.is_match("Enemy_10"));

        let class = NameMatcher::glob("Crate[0-2]").unwrap();
        assert!(class.is_match("Crate1"));
        assert!(!class.is_match("Crate5"));

        let negated = NameMatcher::glob("Crate[!0]").unwrap();
        assert!(negated.is_match("Crate7"));
        assert!(!negated.is_match("Crate0"));

        let literal = NameMatcher::glob("a.b*").unwrap();
        assert!(literal.is_match("a.bc"));
        assert!(!literal.is_match("axbc"));
    }

    #[test]
    fn exact_is_case_sensitive_and_bad_regex_errors() {
        let m = NameMatcher::auto("Player").unwrap();
        assert!(!m.is_match("player"));
        assert!(NameMatcher::regex("(unclosed").is_err());
        assert!(NameMatcher::glob("Crate[").is_err());
    }
}
