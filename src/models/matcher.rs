use std::fmt;

use regex::Regex;
use thiserror::Error;

use super::tags::Tags;

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Invalid matcher regex: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// How a matcher compares a tag value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regexp,
    NotRegexp,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regexp => "=~",
            MatchType::NotRegexp => "!~",
        };
        f.write_str(symbol)
    }
}

/// Selects series by comparing one tag value
#[derive(Debug, Clone)]
pub struct Matcher {
    match_type: MatchType,
    name: String,
    value: String,
    re: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher; regex matchers are anchored at both ends
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, MatcherError> {
        let value = value.into();
        let re = match match_type {
            MatchType::Regexp | MatchType::NotRegexp => {
                Some(Regex::new(&format!("^(?:{})$", value))?)
            }
            MatchType::Equal | MatchType::NotEqual => None,
        };

        Ok(Self {
            match_type,
            name: name.into(),
            value,
            re,
        })
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns whether the given tag value satisfies this matcher
    pub fn matches(&self, s: &str) -> bool {
        match (&self.match_type, &self.re) {
            (MatchType::Equal, _) => s == self.value,
            (MatchType::NotEqual, _) => s != self.value,
            (MatchType::Regexp, Some(re)) => re.is_match(s),
            (MatchType::NotRegexp, Some(re)) => !re.is_match(s),
            (MatchType::Regexp | MatchType::NotRegexp, None) => false,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type, self.value)
    }
}

/// A conjunction of matchers
#[derive(Debug, Clone, Default)]
pub struct Matchers(Vec<Matcher>);

impl Matchers {
    pub fn new(matchers: Vec<Matcher>) -> Self {
        Self(matchers)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Matcher> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if every matcher accepts the tags.
    ///
    /// A missing tag is compared as the empty string.
    pub fn matches(&self, tags: &Tags) -> bool {
        self.0
            .iter()
            .all(|m| m.matches(tags.get(m.name()).unwrap_or("")))
    }
}

impl fmt::Display for Matchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|m| m.to_string()).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
