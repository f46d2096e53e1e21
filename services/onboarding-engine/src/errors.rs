use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OnboardingError>;

#[derive(Error, Debug)]
pub enum OnboardingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] message_bus::Error),

    #[error("Webhook error: {0}")]
    Webhook(#[from] webhooks::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request with this idempotency key is still in progress")]
    IdempotencyInFlight,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl OnboardingError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        OnboardingError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn error_type(&self) -> &str {
        match self {
            OnboardingError::Database(_) => "database_error",
            OnboardingError::Migration(_) => "database_error",
            OnboardingError::Redis(_) => "cache_error",
            OnboardingError::Messaging(_) => "messaging_error",
            OnboardingError::Webhook(_) => "webhook_error",
            OnboardingError::Serialization(_) => "serialization_error",
            OnboardingError::Validation(_) => "validation_error",
            OnboardingError::NotFound { .. } => "not_found",
            OnboardingError::InvalidTransition { .. } => "invalid_transition",
            OnboardingError::PreconditionFailed(_) => "precondition_failed",
            OnboardingError::Conflict(_) => "conflict",
            OnboardingError::IdempotencyInFlight => "idempotency_in_flight",
            OnboardingError::Unauthorized(_) => "unauthorized",
            OnboardingError::Forbidden(_) => "forbidden",
            OnboardingError::ServiceUnavailable => "service_unavailable",
            OnboardingError::Internal(_) => "internal_error",
        }
    }
}

impl From<risk_engine::Error> for OnboardingError {
    fn from(err: risk_engine::Error) -> Self {
        match err {
            risk_engine::Error::FactorNotFound(id) => OnboardingError::not_found("Risk factor", id),
            other => OnboardingError::Validation(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for OnboardingError {
    fn from(err: validator::ValidationErrors) -> Self {
        OnboardingError::Validation(err.to_string())
    }
}

impl ResponseError for OnboardingError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = match self {
            // Keep driver details out of responses
            OnboardingError::Database(_)
            | OnboardingError::Migration(_)
            | OnboardingError::Redis(_) => "Internal storage error".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            OnboardingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OnboardingError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OnboardingError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OnboardingError::Messaging(_) => StatusCode::BAD_GATEWAY,
            OnboardingError::Webhook(_) => StatusCode::BAD_GATEWAY,
            OnboardingError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OnboardingError::Validation(_) => StatusCode::BAD_REQUEST,
            OnboardingError::NotFound { .. } => StatusCode::NOT_FOUND,
            OnboardingError::InvalidTransition { .. } => StatusCode::CONFLICT,
            OnboardingError::PreconditionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OnboardingError::Conflict(_) => StatusCode::CONFLICT,
            OnboardingError::IdempotencyInFlight => StatusCode::CONFLICT,
            OnboardingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            OnboardingError::Forbidden(_) => StatusCode::FORBIDDEN,
            OnboardingError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            OnboardingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn test_error_envelope() {
        let err = OnboardingError::InvalidTransition {
            from: "approved".into(),
            to: "submitted".into(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], 409);
        assert_eq!(json["error"]["type"], "invalid_transition");
    }

    #[test]
    fn test_risk_error_mapping() {
        let id = uuid::Uuid::new_v4();
        let err: OnboardingError = risk_engine::Error::FactorNotFound(id).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: OnboardingError = risk_engine::Error::InvalidScore(120.0).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
