//! Structured search query.
//!
//! A [`Query`] is an ordered list of `key:value` clauses. The reserved key
//! `q` holds free text that is emitted verbatim; every other clause renders
//! as `key:value`. See <https://support.google.com/mail/answer/7190> for the
//! operators a Gmail-style mailbox understands.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ExtractError, Result};

/// The clause key whose value is inserted verbatim.
pub const FREE_TEXT_KEY: &str = "q";

/// Ordered mapping from clause name to clause value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    clauses: Vec<(String, String)>,
}

impl Query {
    /// An empty query (renders as `""`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Query::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a clause. An existing key keeps its position and gets the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.clauses.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.clauses.push((key, value)),
        }
    }

    /// Look up a clause value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.clauses
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate clauses in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.clauses.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Parse whitespace-separated clauses such as `has:attachment from:alice`.
    ///
    /// Tokens without a `key:` prefix are collected into the `q` clause.
    /// Double quotes group a value containing spaces (`subject:"a b"`).
    pub fn parse_clauses(input: &str) -> Result<Self> {
        let mut query = Self::new();
        let mut free_text: Vec<String> = Vec::new();

        for token in tokenize(input) {
            match token.split_once(':') {
                Some((key, value)) if !key.is_empty() && !key.starts_with('"') => {
                    if value.is_empty() {
                        return Err(ExtractError::InvalidQuery {
                            clause: token.clone(),
                            reason: "missing value".into(),
                        });
                    }
                    query.insert(key, value);
                }
                _ => free_text.push(token),
            }
        }

        if !free_text.is_empty() {
            query.insert(FREE_TEXT_KEY, free_text.join(" "));
        }
        Ok(query)
    }

    /// Reject clauses that would not survive rendering as a single token.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in self.iter() {
            let invalid = |reason: &str| ExtractError::InvalidQuery {
                clause: format!("{key}:{value}"),
                reason: reason.to_string(),
            };
            if key.is_empty() {
                return Err(invalid("empty key"));
            }
            if key.chars().any(|c| c.is_whitespace() || c == ':') {
                return Err(invalid("key contains whitespace or ':'"));
            }
            if key != FREE_TEXT_KEY && has_unquoted_whitespace(value) {
                return Err(invalid("value contains unquoted whitespace"));
            }
        }
        Ok(())
    }

    /// Render the query string. Equivalent to [`crate::text::build_query`].
    pub fn render(&self) -> String {
        crate::text::build_query(self)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Self::new();
        for (k, v) in iter {
            query.insert(k, v);
        }
        query
    }
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.clauses.len()))?;
        for (k, v) in &self.clauses {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct QueryVisitor;

        impl<'de> Visitor<'de> for QueryVisitor {
            type Value = Query;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of query clauses")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Query, A::Error> {
                let mut query = Query::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    query.insert(k, v);
                }
                Ok(query)
            }
        }

        deserializer.deserialize_map(QueryVisitor)
    }
}

fn has_unquoted_whitespace(value: &str) -> bool {
    let mut in_quotes = false;
    for ch in value.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch.is_whitespace() && !in_quotes {
            return true;
        }
    }
    false
}

/// Split on whitespace, keeping quoted runs together.
pub(crate) fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            current.push(ch);
        } else if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_position() {
        let mut q = Query::new().with("after", "2024-01-01").with("has", "attachment");
        q.insert("after", "2024-02-01");
        let keys: Vec<&str> = q.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["after", "has"]);
        assert_eq!(q.get("after"), Some("2024-02-01"));
    }

    #[test]
    fn test_tokenize_keeps_quoted_runs() {
        assert_eq!(
            tokenize("  from:a  subject:\"two words\" -b "),
            vec!["from:a", "subject:\"two words\"", "-b"]
        );
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_parse_clauses() {
        let q = Query::parse_clauses("invoice has:attachment subject:\"monthly report\" urgent")
            .expect("parse");
        assert_eq!(q.get("has"), Some("attachment"));
        assert_eq!(q.get("subject"), Some("\"monthly report\""));
        assert_eq!(q.get("q"), Some("invoice urgent"));
    }

    #[test]
    fn test_parse_clauses_missing_value() {
        assert!(Query::parse_clauses("from:").is_err());
    }

    #[test]
    fn test_validate_rejects_whitespace_value() {
        let q = Query::new().with("subject", "two words");
        let err = q.validate().unwrap_err();
        assert!(err.is_configuration());

        let quoted = Query::new().with("subject", "\"two words\"");
        assert!(quoted.validate().is_ok());

        let free = Query::new().with("q", "two words");
        assert!(free.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_keys() {
        assert!(Query::new().with("", "x").validate().is_err());
        assert!(Query::new().with("a b", "x").validate().is_err());
        assert!(Query::new().with("a:b", "x").validate().is_err());
    }

    #[test]
    fn test_toml_preserves_order() {
        #[derive(Deserialize)]
        struct Wrapper {
            query: Query,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
[query]
q = "invoice"
has = "attachment"
after = "2024-01-01"
"#,
        )
        .expect("deserialize");
        assert_eq!(parsed.query.render(), "invoice has:attachment after:2024-01-01");
    }
}
