//! Error handling for the produce ledger
//!
//! Every failure is mapped to a category an operator can act on. Responses
//! carry enough context (entity, quantities, remaining amounts) to be shown
//! without a second lookup.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::builder::DraftError;
use shared::money::MoneyError;
use shared::types::Role;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Role '{role}' may not {action}")]
    PermissionDenied { role: Role, action: &'static str },

    // Validation errors
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{entity} '{name}' already exists")]
    Duplicate { entity: &'static str, name: String },

    // Shipment draft errors, rendered with entity names when known
    #[error("{message}")]
    Draft { error: DraftError, message: String },

    // Stock errors
    #[error("Cannot release {requested} units of {product}: only {available} in stock")]
    InsufficientStock {
        product: String,
        requested: i64,
        available: i64,
    },

    #[error("{farmer} holds only {held} units of {product}, cannot move {requested}")]
    InsufficientHolding {
        farmer: String,
        product: String,
        requested: i64,
        held: i64,
    },

    #[error("Referenced record does not exist: {0}")]
    Referential(String),

    #[error("{0} not found")]
    NotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Persistence(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// User-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    Duplicate,
    OverAllocation,
    IncompleteAllocation,
    EmptyShipment,
    InsufficientStock,
    Referential,
    NotFound,
    Persistence,
    Permission,
    Authentication,
    Internal,
}

impl ErrorCategory {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "VALIDATION_ERROR",
            ErrorCategory::Duplicate => "DUPLICATE_ERROR",
            ErrorCategory::OverAllocation => "OVER_ALLOCATION",
            ErrorCategory::IncompleteAllocation => "INCOMPLETE_ALLOCATION",
            ErrorCategory::EmptyShipment => "EMPTY_SHIPMENT",
            ErrorCategory::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorCategory::Referential => "REFERENTIAL_ERROR",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::Persistence => "PERSISTENCE_ERROR",
            ErrorCategory::Permission => "PERMISSION_DENIED",
            ErrorCategory::Authentication => "UNAUTHORIZED",
            ErrorCategory::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Duplicate => StatusCode::CONFLICT,
            ErrorCategory::OverAllocation
            | ErrorCategory::IncompleteAllocation
            | ErrorCategory::EmptyShipment
            | ErrorCategory::InsufficientStock
            | ErrorCategory::Referential => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Permission => StatusCode::FORBIDDEN,
            ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
            ErrorCategory::Persistence | ErrorCategory::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::InvalidCredentials | AppError::InvalidToken(_) | AppError::Unauthorized(_) => {
                ErrorCategory::Authentication
            }
            AppError::PermissionDenied { .. } => ErrorCategory::Permission,
            AppError::Validation { .. } => ErrorCategory::Validation,
            AppError::Duplicate { .. } => ErrorCategory::Duplicate,
            AppError::Draft { error, .. } => match error {
                DraftError::DuplicateLineItem { .. } | DraftError::DuplicateAllocation { .. } => {
                    ErrorCategory::Duplicate
                }
                DraftError::OverAllocation { .. } => ErrorCategory::OverAllocation,
                DraftError::IncompleteAllocation { .. } => ErrorCategory::IncompleteAllocation,
                DraftError::EmptyShipment => ErrorCategory::EmptyShipment,
                DraftError::Invalid { .. }
                | DraftError::UnknownLineItem { .. }
                | DraftError::UnknownAllocation { .. }
                | DraftError::Closed { .. }
                | DraftError::Money(_) => ErrorCategory::Validation,
            },
            AppError::InsufficientStock { .. } | AppError::InsufficientHolding { .. } => {
                ErrorCategory::InsufficientStock
            }
            AppError::Referential(_) => ErrorCategory::Referential,
            AppError::NotFound(_) => ErrorCategory::NotFound,
            AppError::Persistence(_) | AppError::Migration(_) => ErrorCategory::Persistence,
            AppError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether retrying after correcting the input (or simply retrying) can succeed.
    ///
    /// A persistence failure never leaves partial rows behind, so a retry is safe.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::Permission | ErrorCategory::Internal
        )
    }

    fn field(&self) -> Option<String> {
        match self {
            AppError::Validation { field, .. } => Some(field.clone()),
            AppError::Draft {
                error: DraftError::Invalid { field, .. },
                ..
            } => Some(field.to_string()),
            AppError::Duplicate { .. } => Some("name".to_string()),
            _ => None,
        }
    }

    /// Message safe to return to a client
    fn public_message(&self) -> String {
        match self {
            AppError::Persistence(_) | AppError::Migration(_) => {
                "A database error occurred".to_string()
            }
            AppError::Internal(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_foreign_key_violation() {
                return AppError::Referential(db_err.message().to_string());
            }
            if db_err.is_unique_violation() {
                return AppError::Duplicate {
                    entity: "Record",
                    name: db_err.message().to_string(),
                };
            }
            if db_err.is_check_violation() {
                return AppError::validation("record", db_err.message());
            }
        }
        AppError::Persistence(err)
    }
}

impl From<DraftError> for AppError {
    fn from(error: DraftError) -> Self {
        AppError::Draft {
            message: error.to_string(),
            error,
        }
    }
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        AppError::validation("amount", err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let first = errors
            .field_errors()
            .into_iter()
            .min_by_key(|(field, _)| *field)
            .map(|(field, field_errors)| {
                let message = field_errors
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field));
                (field.to_string(), message)
            });

        match first {
            Some((field, message)) => AppError::Validation { field, message },
            None => AppError::validation("request", errors.to_string()),
        }
    }
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: category.code().to_string(),
                message: message.into(),
                field: None,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let category = self.category();

        match category {
            ErrorCategory::Persistence | ErrorCategory::Internal => {
                tracing::error!("Error: {:?}", self)
            }
            ErrorCategory::Permission | ErrorCategory::Authentication => {
                tracing::warn!("Rejected: {}", self)
            }
            _ => tracing::debug!("Rejected: {}", self),
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: category.code().to_string(),
                message: self.public_message(),
                field: self.field(),
            },
        };

        (category.status(), Json(body)).into_response()
    }
}

/// Result type alias for handlers and services
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::ProductId;

    #[test]
    fn test_over_allocation_is_recoverable() {
        let err = AppError::from(DraftError::OverAllocation {
            product: ProductId(1),
            requested: 50,
            remaining: 40,
        });
        assert_eq!(err.category(), ErrorCategory::OverAllocation);
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("only 40 units remaining"));
    }

    #[test]
    fn test_permission_is_never_recoverable() {
        let err = AppError::PermissionDenied {
            role: Role::Viewer,
            action: "record a direct sale",
        };
        assert_eq!(err.category(), ErrorCategory::Permission);
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Role 'viewer' may not record a direct sale");
    }

    #[test]
    fn test_duplicate_draft_entries_map_to_duplicate() {
        let err = AppError::from(DraftError::DuplicateLineItem {
            product: ProductId(3),
        });
        assert_eq!(err.category(), ErrorCategory::Duplicate);
        assert_eq!(err.category().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_persistence_details_are_hidden() {
        let err = AppError::Persistence(sqlx::Error::RowNotFound);
        assert_eq!(err.category(), ErrorCategory::Persistence);
        assert!(err.is_recoverable());
        assert_eq!(err.public_message(), "A database error occurred");
    }

    #[test]
    fn test_unknown_allocation_is_validation() {
        let err = AppError::from(DraftError::UnknownAllocation {
            product: ProductId(1),
            farmer: shared::types::FarmerId(2),
        });
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.to_string(), "farmer #2 has no allocation for product #1");
    }

    #[test]
    fn test_money_errors_are_validation() {
        let err = AppError::from(MoneyError::Overflow);
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.field().as_deref(), Some("amount"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorCategory::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCategory::InsufficientStock.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ErrorCategory::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCategory::Permission.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCategory::Authentication.status(), StatusCode::UNAUTHORIZED);
    }
}
