//! Profile username parsing and validation
//!
//! Accepts what users typically paste: `@name`, `name/`, surrounding whitespace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest username the platform allows
pub const MAX_USERNAME_LEN: usize = 30;

/// A validated profile username
///
/// # Examples
///
/// ```
/// use igscraper::identifier::Username;
///
/// let user = Username::parse(" @nasa/ ").unwrap();
/// assert_eq!(user.as_str(), "nasa");
/// assert!(Username::parse("no spaces").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Parse and sanitize a username.
    ///
    /// Strips whitespace, one leading `@` and trailing `/`, then requires
    /// 1 to 30 characters from `[A-Za-z0-9._]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is empty, too long, or contains other characters.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
        let name = trimmed.trim_end_matches('/').trim();

        if name.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if name.chars().count() > MAX_USERNAME_LEN {
            return Err(IdentifierError::TooLong(name.chars().count()));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '_'))
        {
            return Err(IdentifierError::InvalidCharacter(bad));
        }

        Ok(Self(name.to_string()))
    }

    /// The username as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Username {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Username {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

/// Errors that can occur during username parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Nothing left after trimming
    #[error("username cannot be empty")]
    Empty,

    /// Longer than the platform allows
    #[error("username is {0} characters; the maximum is {MAX_USERNAME_LEN}")]
    TooLong(usize),

    /// Character outside `[A-Za-z0-9._]`
    #[error("username contains invalid character '{0}'")]
    InvalidCharacter(char),
}
