//! Text matchers for message handlers.
//!
//! A matcher tests the plain-text body of a message event. Each built-in
//! takes one pattern or a pattern list folded under a [`LogicMode`], and
//! matchers compose with `and`/`or`/`xor`/`negate` like checkers do.

use regex::Regex;

use crate::logic::LogicMode;

/// The text match trait.
pub trait Matcher: Send + Sync {
    /// Returns true when the text matches.
    fn is_match(&self, text: &str) -> bool;
}

/// Combinators for composing matchers.
pub trait MatcherExt: Matcher + Sized + 'static {
    /// Both must match.
    fn and(self, other: impl Matcher + 'static) -> WrappedMatcher {
        WrappedMatcher::binary(LogicMode::And, self, other)
    }

    /// Either must match.
    fn or(self, other: impl Matcher + 'static) -> WrappedMatcher {
        WrappedMatcher::binary(LogicMode::Or, self, other)
    }

    /// Exactly one must match.
    fn xor(self, other: impl Matcher + 'static) -> WrappedMatcher {
        WrappedMatcher::binary(LogicMode::Xor, self, other)
    }

    /// Inverts the result.
    fn negate(self) -> WrappedMatcher {
        WrappedMatcher::unary(LogicMode::Not, self)
    }
}

impl<M: Matcher + Sized + 'static> MatcherExt for M {}

/// A matcher combining one or two children under a [`LogicMode`].
pub struct WrappedMatcher {
    mode: LogicMode,
    m1: Box<dyn Matcher>,
    m2: Option<Box<dyn Matcher>>,
}

impl WrappedMatcher {
    fn binary(mode: LogicMode, m1: impl Matcher + 'static, m2: impl Matcher + 'static) -> Self {
        Self {
            mode,
            m1: Box::new(m1),
            m2: Some(Box::new(m2)),
        }
    }

    fn unary(mode: LogicMode, m1: impl Matcher + 'static) -> Self {
        Self {
            mode,
            m1: Box::new(m1),
            m2: None,
        }
    }
}

impl Matcher for WrappedMatcher {
    fn is_match(&self, text: &str) -> bool {
        let v1 = self.m1.is_match(text);
        match (self.mode, &self.m2) {
            (LogicMode::And, Some(m2)) => v1 && m2.is_match(text),
            (LogicMode::Or, Some(m2)) => v1 || m2.is_match(text),
            (mode, Some(m2)) => mode.calc(v1, Some(m2.is_match(text))),
            (mode, None) => mode.calc(v1, None),
        }
    }
}

// ============================================================================
// Pattern matchers
// ============================================================================

macro_rules! pattern_matcher {
    ($(#[$doc:meta])* $name:ident, $test:expr) => {
        $(#[$doc])*
        pub struct $name {
            targets: Vec<String>,
            mode: LogicMode,
        }

        impl $name {
            /// A matcher over one pattern.
            pub fn single(target: impl Into<String>) -> Self {
                Self {
                    targets: vec![target.into()],
                    mode: LogicMode::Or,
                }
            }

            /// A matcher folding the results over a pattern list.
            pub fn new<I, S>(targets: I, mode: LogicMode) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                Self {
                    targets: targets.into_iter().map(Into::into).collect(),
                    mode,
                }
            }
        }

        impl Matcher for $name {
            fn is_match(&self, text: &str) -> bool {
                let test: fn(&str, &str) -> bool = $test;
                let results: Vec<bool> =
                    self.targets.iter().map(|t| test(text, t)).collect();
                self.mode.seq_calc(&results)
            }
        }
    };
}

pattern_matcher!(
    /// Matches when the text starts with a pattern.
    StartMatcher,
    |text, target| text.starts_with(target)
);

pattern_matcher!(
    /// Matches when the text contains a pattern.
    ContainMatcher,
    |text, target| text.contains(target)
);

pattern_matcher!(
    /// Matches when the text ends with a pattern.
    EndMatcher,
    |text, target| text.ends_with(target)
);

pattern_matcher!(
    /// Matches when the text equals a pattern.
    FullMatcher,
    |text, target| text == target
);

/// Matches the text against a regular expression.
pub struct RegexMatcher {
    pattern: Regex,
}

impl RegexMatcher {
    /// Compiles the pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Matcher for RegexMatcher {
    fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matchers() {
        assert!(StartMatcher::single("!").is_match("!help"));
        assert!(!StartMatcher::single("!").is_match("help!"));
        assert!(ContainMatcher::single("roll").is_match("please roll a die"));
        assert!(EndMatcher::single("?").is_match("really?"));
        assert!(FullMatcher::single("ping").is_match("ping"));
        assert!(!FullMatcher::single("ping").is_match("ping "));
    }

    #[test]
    fn test_pattern_list_modes() {
        let any = StartMatcher::new(["!", "/"], LogicMode::Or);
        assert!(any.is_match("/cmd"));
        assert!(any.is_match("!cmd"));
        assert!(!any.is_match("cmd"));

        let all = ContainMatcher::new(["a", "b"], LogicMode::And);
        assert!(all.is_match("ab"));
        assert!(!all.is_match("ac"));

        let exactly_one = ContainMatcher::new(["a", "b"], LogicMode::Xor);
        assert!(exactly_one.is_match("ac"));
        assert!(!exactly_one.is_match("ab"));
    }

    #[test]
    fn test_regex() {
        let matcher = RegexMatcher::new(r"^\d{3,}$").unwrap();
        assert!(matcher.is_match("12345"));
        assert!(!matcher.is_match("12"));
        assert!(RegexMatcher::new("[").is_err());
    }

    #[test]
    fn test_composition() {
        let m = StartMatcher::single("!").and(EndMatcher::single("?").negate());
        assert!(m.is_match("!roll"));
        assert!(!m.is_match("!roll?"));
    }
}
