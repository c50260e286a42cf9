use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlErrorKind {
    InvalidParams,
    Denied,
    NotFound,
    Conflict,
    Timeout,
    Retryable,
    Internal,
}

impl ControlErrorKind {
    /// Inverse of the stable code strings, for detail persisted as
    /// `CODE: message`.
    pub fn parse(code: &str) -> Option<Self> {
        Some(match code {
            "INVALID_PARAMS" => Self::InvalidParams,
            "DENIED" => Self::Denied,
            "NOT_FOUND" => Self::NotFound,
            "CONFLICT" => Self::Conflict,
            "TIMEOUT" => Self::Timeout,
            "RETRYABLE" => Self::Retryable,
            "INTERNAL" => Self::Internal,
            _ => return None,
        })
    }

    /// Plain-language category for UI surfaces.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::InvalidParams => "That request isn't valid.",
            Self::Denied => "Your session has expired. Sign in again.",
            Self::NotFound => "That toolbox could not be found.",
            Self::Conflict => "Another change is already in progress.",
            Self::Timeout | Self::Retryable => "Temporary service issue. Try again in a moment.",
            Self::Internal => "Something went wrong on our side.",
        }
    }
}

/// Crate-wide error. The `message` carries operator-grade detail (provider
/// error bodies, exit codes); `user_message()` is what an end user sees.
#[derive(Debug, Clone, Serialize)]
pub struct ControlError {
    pub kind: ControlErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ControlError {
    pub fn new(
        kind: ControlErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ControlErrorKind::Timeout | ControlErrorKind::Retryable),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ControlErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ControlErrorKind::Denied, "DENIED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ControlErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ControlErrorKind::Conflict, "CONFLICT", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ControlErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ControlErrorKind::Retryable, "RETRYABLE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ControlErrorKind::Internal, "INTERNAL", message)
    }

    /// Plain-language category for UI surfaces. Raw detail stays in
    /// `message` / `provisioning_error_message` for operators.
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ControlError {}

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        ControlError::internal(err.to_string())
    }
}

impl From<rusqlite::Error> for ControlError {
    fn from(err: rusqlite::Error) -> Self {
        ControlError::internal(format!("record store: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_retryable_are_retryable() {
        assert!(ControlError::timeout("x").retryable);
        assert!(ControlError::retryable("x").retryable);
        assert!(!ControlError::conflict("x").retryable);
    }

    #[test]
    fn user_message_never_leaks_detail() {
        let err = ControlError::internal("provider said: quota exceeded for droplet create");
        assert!(!err.user_message().contains("quota"));
    }

    #[test]
    fn codes_round_trip_through_parse() {
        for err in [
            ControlError::invalid_params("x"),
            ControlError::denied("x"),
            ControlError::not_found("x"),
            ControlError::conflict("x"),
            ControlError::timeout("x"),
            ControlError::retryable("x"),
            ControlError::internal("x"),
        ] {
            assert_eq!(ControlErrorKind::parse(&err.code), Some(err.kind));
        }
        assert_eq!(ControlErrorKind::parse("NO_SUCH_CODE"), None);
    }
}
