use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable code, only for errors callers must branch on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Structured payload for display/audit (batch number, expiry date)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub meta: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// Expiry gate violation. Carries the batch identity so callers can write
    /// a compliance audit entry before translating to a 409.
    #[error("Batch {batch_number} expired on {expires_at}")]
    BatchExpired {
        batch_id: Uuid,
        batch_number: String,
        expires_at: NaiveDate,
    },

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub trait IntoDbErr {
    fn into_db_err(self) -> sea_orm::error::DbErr;
}

impl IntoDbErr for sea_orm::error::DbErr {
    fn into_db_err(self) -> sea_orm::error::DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> sea_orm::error::DbErr {
        sea_orm::error::DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> sea_orm::error::DbErr {
        sea_orm::error::DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::VersionConflict(_)
            | Self::StateConflict(_)
            | Self::InsufficientStock(_)
            | Self::BatchExpired { .. } => StatusCode::CONFLICT,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable code for errors with a structured contract.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::BatchExpired { .. } => Some("BATCH_EXPIRED"),
            _ => None,
        }
    }

    /// Structured payload exposed alongside the message.
    pub fn meta(&self) -> Option<serde_json::Value> {
        match self {
            Self::BatchExpired {
                batch_id,
                batch_number,
                expires_at,
            } => Some(serde_json::json!({
                "batchId": batch_id,
                "batchNumber": batch_number,
                "expiresAt": expires_at,
            })),
            _ => None,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.code().map(str::to_string),
            meta: self.meta(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::VersionConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::StateConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn batch_expired_carries_code_and_meta() {
        let batch_id = Uuid::new_v4();
        let err = ServiceError::BatchExpired {
            batch_id,
            batch_number: "L-2024-091".into(),
            expires_at: NaiveDate::from_ymd_opt(2024, 11, 30).unwrap(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), Some("BATCH_EXPIRED"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code.as_deref(), Some("BATCH_EXPIRED"));
        let meta = payload.meta.unwrap();
        assert_eq!(meta["batchNumber"], "L-2024-091");
        assert_eq!(meta["batchId"], serde_json::json!(batch_id));
    }

    #[test]
    fn internal_errors_hide_details() {
        assert_eq!(
            ServiceError::InternalError("secret".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::db_error("connection refused").response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::NotFound("Product not found".into()).response_message(),
            "Not found: Product not found"
        );
    }
}
