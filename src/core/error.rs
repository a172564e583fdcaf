use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Field-keyed validation messages collected while compiling a request.
///
/// Keys follow the query surface (`limit_error`, `orderBy_parameter_0_error`,
/// `<field>_field_error`, ...) so callers can point at the offending input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.0.insert(key.into(), message.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// `Ok(())` when nothing was collected, the wrapped error otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(RepositoryError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Field '{field}' not found on '{entity}'")]
    FieldNotFound { entity: String, field: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conditional write conflict on '{0}'")]
    Conflict(String),

    #[error("Optimistic lock conflict for '{key}': gave up after {attempts} attempts")]
    RetryExhausted { key: String, attempts: u32 },

    #[error("Backend unavailable: {message} (status {status}, code {code}, request {request_id})")]
    BackendUnavailable {
        status: u16,
        code: String,
        request_id: String,
        message: String,
    },

    #[error("Cache failure: {0}")]
    CacheFailure(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Batch failed: {failed} of {total} operations failed, first: {first}")]
    BatchFailed {
        failed: usize,
        total: usize,
        first: Box<RepositoryError>,
    },
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

impl RepositoryError {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.put(key, message);
        Self::Validation(errors)
    }

    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            status: 503,
            code: code.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Short taxonomy name used in error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::IllegalArgument(_) | Self::FieldNotFound { .. } => {
                "ValidationError"
            }
            Self::TypeMismatch(_) => "ValidationError",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::RetryExhausted { .. } => "InternalError",
            Self::BackendUnavailable { .. } => "BackendUnavailable",
            Self::CacheFailure(_) => "CacheFailure",
            Self::Serialization(_) | Self::LockError(_) => "InternalError",
            Self::BatchFailed { first, .. } => first.kind(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::IllegalArgument(_)
            | Self::FieldNotFound { .. }
            | Self::TypeMismatch(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::BackendUnavailable { status, .. } => *status,
            Self::BatchFailed { first, .. } => first.status_code(),
            Self::RetryExhausted { .. }
            | Self::CacheFailure(_)
            | Self::Serialization(_)
            | Self::LockError(_) => 500,
        }
    }

    /// Structured error body distinguishing the failure taxonomy.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "error": self.kind(),
            "status": self.status_code(),
            "message": self.to_string(),
        });

        match self {
            Self::Validation(errors) => {
                payload["details"] = serde_json::to_value(errors).unwrap_or_default();
            }
            Self::BackendUnavailable {
                code, request_id, ..
            } => {
                payload["details"] = serde_json::json!({
                    "code": code,
                    "requestId": request_id,
                });
            }
            _ => {}
        }

        payload
    }
}

impl<T> From<std::sync::PoisonError<T>> for RepositoryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_into_result() {
        assert!(ValidationErrors::new().into_result().is_ok());

        let mut errors = ValidationErrors::new();
        errors.put("limit_error", "Limit must be a whole positive Integer!");
        let err = errors.into_result().unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_payload_carries_backend_diagnostics() {
        let err = RepositoryError::BackendUnavailable {
            status: 503,
            code: "ThrottlingException".into(),
            request_id: "req-1".into(),
            message: "slow down".into(),
        };
        let payload = err.to_payload();
        assert_eq!(payload["error"], "BackendUnavailable");
        assert_eq!(payload["details"]["requestId"], "req-1");
    }

    #[test]
    fn test_batch_failure_reports_first_kind() {
        let err = RepositoryError::BatchFailed {
            failed: 1,
            total: 3,
            first: Box::new(RepositoryError::Conflict("User_a".into())),
        };
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.kind(), "Conflict");
    }
}
