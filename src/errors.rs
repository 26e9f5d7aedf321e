//! Application error taxonomy and the JSON error envelope.

use crate::scan_orchestrator::ScanError;
use crate::zero_trust::{AccessDenied, DenyReason};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("request validation failed")]
    Validation { errors: Vec<String> },

    #[error("access denied: {}", reason.code())]
    PolicyDenied {
        request_id: String,
        reason: DenyReason,
    },

    #[error("authentication required")]
    Unauthorized,

    #[error("premium subscription required")]
    PremiumRequired,

    #[error("unsupported compliance framework: {framework}")]
    UnsupportedFramework { framework: String },

    #[error("scan not found: {scan_id}")]
    ScanNotFound { scan_id: String },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("internal server error: {context}")]
    Internal { context: String },
}

impl AppError {
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::UnsupportedFramework { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::PolicyDenied { .. } | AppError::PremiumRequired => StatusCode::FORBIDDEN,
            AppError::ScanNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Scan(_) | AppError::Config(_) | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::PolicyDenied { .. } => "policy_denied",
            AppError::Unauthorized => "unauthorized",
            AppError::PremiumRequired => "premium_required",
            AppError::UnsupportedFramework { .. } => "unsupported_framework",
            AppError::ScanNotFound { .. } => "scan_not_found",
            AppError::Scan(_) => "scan_error",
            AppError::Config(_) => "configuration_error",
            AppError::Internal { .. } => "internal_error",
        }
    }
}

impl From<AccessDenied> for AppError {
    fn from(denied: AccessDenied) -> Self {
        AppError::PolicyDenied {
            request_id: denied.request_id,
            reason: denied.reason,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            // Denials carry a machine-readable reason code and the request
            // id for correlation.
            AppError::PolicyDenied { request_id, reason } => Json(json!({
                "error": "access_denied",
                "reason": reason.code(),
                "requestId": request_id,
            })),
            AppError::Validation { errors } => Json(json!({
                "error": {
                    "type": "validation_error",
                    "message": self.to_string(),
                    "details": errors,
                    "status": status.as_u16(),
                }
            })),
            // Internal failure details stay in the logs, not the response.
            other if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %other, "request failed");
                Json(json!({
                    "error": {
                        "type": "internal_error",
                        "message": "internal server error",
                        "status": 500,
                    }
                }))
            }
            other => Json(json!({
                "error": {
                    "type": other.error_type(),
                    "message": other.to_string(),
                    "status": status.as_u16(),
                }
            })),
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            AppError::validation(vec!["bad".into()]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::PolicyDenied {
                request_id: "r".into(),
                reason: DenyReason::IpQuarantined,
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
