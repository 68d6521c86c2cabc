//! Immutable snapshot of the process environment.
//!
//! The environment is captured once at startup and passed explicitly to the
//! settings resolver and the CI detector. Nothing downstream reads
//! `std::env` directly.

use std::collections::BTreeMap;

use crate::error::{ConfigResult, ConfigurationError};

/// Captured environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Snapshot the current process environment.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build an environment from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Return a copy with one variable set.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Raw lookup. Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether the variable is present at all (even if empty).
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Owned string lookup.
    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    /// Boolean lookup accepting only `"1"` and `"0"`.
    pub fn bool(&self, key: &str) -> ConfigResult<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some("1") => Ok(Some(true)),
            Some("0") => Ok(Some(false)),
            Some(other) => Err(ConfigurationError::InvalidBool {
                var: key.to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Unsigned integer lookup.
    pub fn number(&self, key: &str) -> ConfigResult<Option<u32>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| ConfigurationError::InvalidNumber {
                    var: key.to_string(),
                    value: raw.to_string(),
                }),
        }
    }

    /// Comma separated list lookup; pieces are trimmed and empty pieces dropped.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(split_list)
    }

    /// Iterate over all variables whose name starts with `prefix`.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.vars
            .iter()
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Split a comma separated value into trimmed, non-empty pieces.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
