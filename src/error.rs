//! Structured error types for action responses.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors
    Unauthenticated,
    InvalidCredentials,

    // Validation errors
    MissingRequiredField,
    InvalidFieldValue,

    // Not found (also covers rows owned by someone else)
    NotFound,

    // Conflict errors
    AlreadyExists,
    DuplicateEdge,
    CircularDependency,
    DependencyNotSatisfied,

    // Internal errors
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    /// HTTP status code used when the error crosses the web boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::Unauthenticated | ErrorCode::InvalidCredentials => 401,
            ErrorCode::MissingRequiredField | ErrorCode::InvalidFieldValue => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::AlreadyExists
            | ErrorCode::DuplicateEdge
            | ErrorCode::CircularDependency
            | ErrorCode::DependencyNotSatisfied => 409,
            ErrorCode::DatabaseError | ErrorCode::InternalError => 500,
        }
    }
}

/// Structured error surfaced at the action boundary.
#[derive(Debug, Serialize)]
pub struct ActionError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ActionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    // Convenience constructors

    pub fn unauthenticated() -> Self {
        Self::new(ErrorCode::Unauthenticated, "Not logged in")
    }

    pub fn invalid_credentials() -> Self {
        Self::new(ErrorCode::InvalidCredentials, "Invalid username or password")
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found: {}", kind, id))
    }

    pub fn already_exists(kind: &str, name: &str) -> Self {
        Self::new(
            ErrorCode::AlreadyExists,
            format!("{} already exists: {}", kind, name),
        )
    }

    pub fn duplicate_edge(task_id: &str, depends_on: &str) -> Self {
        Self::new(
            ErrorCode::DuplicateEdge,
            format!("Task {} already depends on {}", task_id, depends_on),
        )
    }

    pub fn circular_dependency(task_id: &str, depends_on: &str) -> Self {
        Self::new(
            ErrorCode::CircularDependency,
            format!(
                "Making {} depend on {} would create a circular dependency",
                task_id, depends_on
            ),
        )
    }

    pub fn deps_not_satisfied(blockers: &[String]) -> Self {
        Self::new(
            ErrorCode::DependencyNotSatisfied,
            format!("Task blocked by: {}", blockers.join(", ")),
        )
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActionError {}

// Store functions return anyhow errors; recover the structured error if one was raised
impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ActionError>() {
            Ok(action_err) => action_err,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(db_err) => ActionError::database(db_err),
                Err(err) => ActionError::internal(err),
            },
        }
    }
}

/// Result type for action operations.
pub type ActionResult<T> = std::result::Result<T, ActionError>;

/// Extract the error code from an anyhow error, if it carries an `ActionError`.
pub fn error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.downcast_ref::<ActionError>().map(|e| e.code)
}
