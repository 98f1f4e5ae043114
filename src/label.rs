use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A placement tag used to match work to capable agents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label(String);

impl Label {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tokenize a whitespace-separated label string into a label set.
    ///
    /// The label set is always derived from the string; it is a cache,
    /// never the source of truth.
    pub fn parse_set(label_string: &str) -> BTreeSet<Label> {
        label_string
            .split_whitespace()
            .map(|token| Label(token.to_string()))
            .collect()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job allocation mode for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Accepts any job.
    Normal,
    /// Accepts only jobs explicitly pinned to this agent.
    Exclusive,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_set_tokenizes_on_whitespace() {
        let set = Label::parse_set("linux  docker\tx86_64\nbig-memory");
        assert_eq!(set.len(), 4);
        assert!(set.contains(&Label::new("docker")));
        assert!(set.contains(&Label::new("big-memory")));
    }

    #[test]
    fn parse_set_deduplicates() {
        let set = Label::parse_set("linux linux linux");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn empty_string_yields_empty_set() {
        assert!(Label::parse_set("").is_empty());
        assert!(Label::parse_set("   ").is_empty());
    }
}
