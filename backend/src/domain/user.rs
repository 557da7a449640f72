//! Caller identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Validation errors returned by [`UserId::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdValidationError {
    EmptyId,
    SurroundingWhitespace,
    ContainsKeyDelimiter,
}

impl fmt::Display for UserIdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "user id must not be empty"),
            Self::SurroundingWhitespace => {
                write!(f, "user id must not have surrounding whitespace")
            }
            Self::ContainsKeyDelimiter => write!(f, "user id must not contain '#'"),
        }
    }
}

impl std::error::Error for UserIdValidationError {}

/// Identifier issued by the identity provider for the calling user.
///
/// The value becomes the owner half of every partition key, so the storage
/// key delimiter is rejected.
///
/// # Examples
/// ```
/// use gateway::domain::UserId;
///
/// let id = UserId::new("user-1").expect("valid id");
/// assert_eq!(id.as_ref(), "user-1");
/// assert!(UserId::new("a#b").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and construct a [`UserId`] from borrowed input.
    pub fn new(id: impl AsRef<str>) -> Result<Self, UserIdValidationError> {
        Self::from_owned(id.as_ref().to_owned())
    }

    fn from_owned(id: String) -> Result<Self, UserIdValidationError> {
        if id.is_empty() {
            return Err(UserIdValidationError::EmptyId);
        }
        if id.trim() != id {
            return Err(UserIdValidationError::SurroundingWhitespace);
        }
        if id.contains('#') {
            return Err(UserIdValidationError::ContainsKeyDelimiter);
        }
        Ok(Self(id))
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl TryFrom<String> for UserId {
    type Error = UserIdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_owned(value)
    }
}
