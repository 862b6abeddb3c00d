// ============================================================================
// Portico Error - Gateway error taxonomy and response envelopes
// ============================================================================
//
// Every failure the gateway can produce is one of the kinds below. Each kind
// maps to a fixed HTTP status and a stable machine-readable error code that
// clients may pattern-match. The terminal exception mapper in the gateway
// turns a GatewayError into an ErrorEnvelope stamped with the request path,
// correlation id and timestamp.
//
// ============================================================================

mod envelope;

pub use envelope::{ErrorEnvelope, FieldError, SuccessEnvelope};

use axum::http::StatusCode;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error type covering every failure path.
///
/// Components return these; the pipeline never catches them between stages
/// except at the terminal exception mapper. Transport-level errors are
/// translated at the dispatcher boundary, so the mapper only ever sees
/// gateway kinds.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("The {resource} with identifier {id} could not be found.")]
    NotFound { resource: String, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("Request validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Upstream request timed out: {0}")]
    GatewayTimeout(String),

    #[error("Upstream service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),

    /// Upstream error body passed through verbatim with its status.
    /// The body is already a well-formed error envelope.
    #[error("upstream returned status {status}")]
    UpstreamPassthrough {
        status: u16,
        body: serde_json::Value,
    },
}

impl GatewayError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamPassthrough { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// The envelope `error` tag
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "BadRequest",
            GatewayError::Unauthorized(_) => "Unauthorized",
            GatewayError::Forbidden(_) => "Forbidden",
            GatewayError::NotFound { .. } => "NotFound",
            GatewayError::Conflict(_) => "Conflict",
            GatewayError::Validation(_) => "ValidationError",
            GatewayError::TooManyRequests(_) => "TooManyRequests",
            GatewayError::PayloadTooLarge(_) => "PayloadTooLarge",
            GatewayError::GatewayTimeout(_) => "GatewayTimeout",
            GatewayError::ServiceUnavailable(_) => "ServiceUnavailable",
            GatewayError::Internal(_) => "InternalServerError",
            GatewayError::UpstreamPassthrough { .. } => "UpstreamError",
        }
    }

    /// Stable error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "ERR_BAD_REQUEST",
            GatewayError::Unauthorized(_) => "ERR_AUTHENTICATION_FAILED",
            GatewayError::Forbidden(_) => "ERR_INSUFFICIENT_PERMISSIONS",
            GatewayError::NotFound { .. } => "ERR_RESOURCE_NOT_FOUND",
            GatewayError::Conflict(_) => "ERR_CONFLICT",
            GatewayError::Validation(_) => "ERR_VALIDATION_FAILED",
            GatewayError::TooManyRequests(_) => "ERR_RATE_LIMIT_EXCEEDED",
            GatewayError::PayloadTooLarge(_) => "ERR_FILE_TOO_LARGE",
            GatewayError::GatewayTimeout(_) => "ERR_GATEWAY_TIMEOUT",
            GatewayError::ServiceUnavailable(_) => "ERR_SERVICE_UNAVAILABLE",
            GatewayError::Internal(_) => "ERR_INTERNAL_SERVER_ERROR",
            GatewayError::UpstreamPassthrough { .. } => "ERR_UPSTREAM",
        }
    }

    /// User-facing message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Log this error with a severity matching its status class
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "gateway error"
            );
        } else {
            tracing::warn!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "client error"
            );
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        GatewayError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        GatewayError::Forbidden(msg.into())
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        GatewayError::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        GatewayError::ServiceUnavailable(msg.into())
    }
}
