//! Package reference: `name/version[@user/channel]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;

/// Identity of the recipe being built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageReference {
    pub name: String,
    pub version: String,
    pub user: Option<String>,
    pub channel: Option<String>,
}

impl PackageReference {
    /// Create a reference without user/channel.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            user: None,
            channel: None,
        }
    }

    /// Return a copy carrying the given publication coordinates.
    pub fn with_coordinates(&self, user: Option<&str>, channel: Option<&str>) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version.clone(),
            user: user.map(str::to_string),
            channel: channel.map(str::to_string),
        }
    }

    /// `name/version` without coordinates.
    pub fn name_version(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    /// Glob pattern matching every revision of this recipe on a remote.
    pub fn search_pattern(&self) -> String {
        format!("{}*", self.name_version())
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user, &self.channel) {
            (Some(user), Some(channel)) => {
                write!(f, "{}/{}@{}/{}", self.name, self.version, user, channel)
            }
            (Some(user), None) => write!(f, "{}/{}@{}", self.name, self.version, user),
            _ => write!(f, "{}/{}@", self.name, self.version),
        }
    }
}

impl FromStr for PackageReference {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigurationError::InvalidReference(s.to_string());
        let trimmed = s.trim();

        let (base, coords) = match trimmed.split_once('@') {
            Some((base, coords)) => (base, Some(coords)),
            None => (trimmed, None),
        };

        let (name, version) = base.split_once('/').ok_or_else(invalid)?;
        if !valid_token(name) || !valid_token(version) {
            return Err(invalid());
        }

        let (user, channel) = match coords {
            None | Some("") => (None, None),
            Some(coords) => match coords.split_once('/') {
                Some((user, channel)) if valid_token(user) && valid_token(channel) => {
                    (Some(user.to_string()), Some(channel.to_string()))
                }
                None if valid_token(coords) => (Some(coords.to_string()), None),
                _ => return Err(invalid()),
            },
        };

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            user,
            channel,
        })
    }
}

fn valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
}
