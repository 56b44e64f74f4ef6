//! Container id generation and name validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CaskError, CaskResult};

/// A container id: a fixed-length string of decimal digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Length of a generated id.
    pub const LENGTH: usize = 10;

    /// Generate a new random container id.
    ///
    /// Each digit is drawn from one byte of a UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let id = uuid.as_bytes()[..Self::LENGTH]
            .iter()
            .map(|b| char::from(b'0' + b % 10))
            .collect();
        Self(id)
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = CaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == Self::LENGTH && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(CaskError::Config {
                message: format!("invalid container id: {s}"),
            })
        }
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maximum length of a container name.
pub const MAX_NAME_LENGTH: usize = 64;

/// Check that a container name is usable as a directory and cgroup component.
///
/// Names must be 1-64 characters of ASCII alphanumerics, hyphens and
/// underscores and start with an alphanumeric character.
///
/// # Errors
///
/// Returns [`CaskError::InvalidContainerName`] otherwise.
pub fn validate_name(name: &str) -> CaskResult<()> {
    let invalid = || CaskError::InvalidContainerName {
        name: name.to_string(),
    };

    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(invalid());
    }

    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }

    if name
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
    {
        return Err(invalid());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_numeric() {
        let id = ContainerId::generate();
        assert_eq!(id.as_str().len(), ContainerId::LENGTH);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn generated_ids_differ() {
        let ids: std::collections::HashSet<_> =
            (0..32).map(|_| ContainerId::generate()).collect();
        assert!(ids.len() > 1);
    }

    #[test]
    fn parse_id() {
        assert!("0123456789".parse::<ContainerId>().is_ok());
        assert!("012345678".parse::<ContainerId>().is_err());
        assert!("01234abcde".parse::<ContainerId>().is_err());
    }

    #[test]
    fn valid_names() {
        assert!(validate_name("web").is_ok());
        assert!(validate_name("my-container").is_ok());
        assert!(validate_name("my_container_2").is_ok());
        assert!(validate_name("0123456789").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("-web").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
    }
}
