//! API error types and handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rr_core::{ApprovalError, StoreError, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

/// API error type.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The resource is in a state that forbids the request.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Field-level validation failures.
    #[error("Validation failed")]
    ValidationError(ValidationErrorDetails),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Details for field-level validation errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetails {
    pub message: String,
    pub fields: BTreeMap<String, Vec<FieldError>>,
}

/// A single field validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// Machine-readable code such as `"length"` or `"unknown_indicator"`.
    pub code: String,
    pub message: String,
}

impl ValidationErrorDetails {
    pub fn new() -> Self {
        Self {
            message: String::new(),
            fields: BTreeMap::new(),
        }
    }

    /// A validation error for one field.
    pub fn field(field: &str, code: &str, message: &str) -> Self {
        let mut details = Self::new();
        details.add_error(field, code, message);
        details
    }

    /// Adds a field error and updates the summary message.
    pub fn add_error(&mut self, field: &str, code: &str, message: &str) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(FieldError {
                code: code.to_string(),
                message: message.to_string(),
            });
        self.refresh_message();
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn refresh_message(&mut self) {
        self.message = match self.fields.keys().next() {
            Some(field) if self.fields.len() == 1 => {
                format!("Validation failed for field '{field}'")
            }
            _ => format!("Validation failed for {} fields", self.fields.len()),
        };
    }
}

impl Default for ValidationErrorDetails {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ValidationErrorDetails> for ApiError {
    fn from(details: ValidationErrorDetails) -> Self {
        ApiError::ValidationError(details)
    }
}

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn validation_field(field: &str, code: &str, message: &str) -> Self {
        ApiError::ValidationError(ValidationErrorDetails::field(field, code, message))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let (message, details) = match &self {
            ApiError::ValidationError(details) => (
                details.message.clone(),
                serde_json::to_value(&details.fields).ok(),
            ),
            _ => (self.to_string(), None),
        };

        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::IncidentNotFound(id) => {
                ApiError::NotFound(format!("Incident {id} not found"))
            }
            WorkflowError::AlreadyClosed(_)
            | WorkflowError::UnexpectedEvent { .. }
            | WorkflowError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            WorkflowError::Approval(e) => e.into(),
            WorkflowError::Store(e) => e.into(),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        match err {
            // An expired request can no longer be acted on; it reads as gone.
            ApprovalError::NotFound(_) | ApprovalError::Expired(_) => {
                ApiError::NotFound(err.to_string())
            }
            ApprovalError::AlreadyDecided { .. } => ApiError::Conflict(err.to_string()),
            ApprovalError::Invalid(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(format!("Incident {id} not found")),
            err if err.is_transient() => ApiError::ServiceUnavailable(err.to_string()),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut details = ValidationErrorDetails::new();
        for (field, errors) in err.field_errors() {
            for e in errors {
                let code = e.code.to_string();
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Field '{field}' failed validation: {code}"));
                details.add_error(field, &code, &message);
            }
        }
        ApiError::ValidationError(details)
    }
}
