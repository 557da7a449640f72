//! Domain-level error types.
//!
//! These errors are transport agnostic. Inbound adapters map them to the
//! status codes and JSON bodies of whichever wire shape carried the request.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Stable machine-readable error code describing the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The envelope matched neither request shape or carried no path.
    MalformedRequest,
    /// Required input fields are missing.
    IncorrectSignature,
    /// Caller identity is missing or unreadable.
    Unauthorized,
    /// The route or entity does not exist.
    NotFound,
    /// A conditional write found the record in the wrong state.
    Conflict,
    /// A stored record does not carry the expected key layout.
    CorruptRecord,
    /// An identifier string could not be decoded.
    MalformedIdentifier,
    /// An unexpected error occurred inside the domain or a collaborator.
    InternalError,
}

impl ErrorCode {
    /// Whether the failure is part of normal request handling.
    ///
    /// Expected failures are answered without being logged as errors.
    pub fn is_expected(self) -> bool {
        matches!(
            self,
            Self::MalformedRequest
                | Self::IncorrectSignature
                | Self::Unauthorized
                | Self::NotFound
                | Self::Conflict
        )
    }
}

/// Domain error payload.
///
/// # Examples
/// ```
/// use gateway::domain::{Error, ErrorCode};
///
/// let err = Error::not_found("connector 42");
/// assert_eq!(err.code(), ErrorCode::NotFound);
/// assert_eq!(err.message(), "not found: connector 42");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    code: ErrorCode,
    message: String,
    details: Option<Value>,
}

impl Error {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message returned to adapters.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Supplementary error details for adapters.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Attach structured details to the error.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convenience constructor for [`ErrorCode::MalformedRequest`].
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedRequest, message)
    }

    /// Missing required inputs; the full required set travels in the details.
    ///
    /// # Examples
    /// ```
    /// use gateway::domain::Error;
    /// use serde_json::json;
    ///
    /// let err = Error::incorrect_signature(&["query", "prompt"]);
    /// assert_eq!(err.details(), Some(&json!({"required": ["query", "prompt"]})));
    /// ```
    pub fn incorrect_signature(required: &[&str]) -> Self {
        Self::new(
            ErrorCode::IncorrectSignature,
            format!("missing required fields: {}", required.join(", ")),
        )
        .with_details(json!({ "required": required }))
    }

    /// Convenience constructor for [`ErrorCode::Unauthorized`].
    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "Unauthorized")
    }

    /// Convenience constructor for [`ErrorCode::NotFound`].
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("not found: {what}"))
    }

    /// Convenience constructor for [`ErrorCode::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Convenience constructor for [`ErrorCode::CorruptRecord`].
    pub fn corrupt_record(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CorruptRecord, message)
    }

    /// Convenience constructor for [`ErrorCode::MalformedIdentifier`].
    pub fn malformed_identifier(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedIdentifier, message)
    }

    /// Convenience constructor for [`ErrorCode::InternalError`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}
