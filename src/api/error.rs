use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{Exhaustion, ServiceError};

/// HTTP-facing error type
///
/// Wraps [`ServiceError`] for domain failures and adds request-level errors
/// (malformed query strings, multipart bodies, path parameters). Renders as
/// JSON `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The request itself is malformed
    #[error("{message}")]
    Request { status: StatusCode, message: String },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::Request {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Status code, error code and client-facing message
    #[must_use]
    pub fn classify(&self) -> (StatusCode, &'static str, String) {
        let service = match self {
            Self::Request { status, message } => {
                let code = if *status == StatusCode::PAYLOAD_TOO_LARGE {
                    "PAYLOAD_TOO_LARGE"
                } else {
                    "BAD_REQUEST"
                };
                return (*status, code, message.clone());
            },
            Self::Service(err) => err,
        };

        match service {
            ServiceError::Input(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_IMAGE",
                msg.clone(),
            ),
            ServiceError::UnsupportedFormat(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_FORMAT",
                msg.clone(),
            ),
            ServiceError::ResourceExhausted(reason) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "RESOURCE_EXHAUSTED",
                format!("Server is busy: {}", reason),
            ),
            ServiceError::EngineTimeout(limit) => (
                StatusCode::GATEWAY_TIMEOUT,
                "ENGINE_TIMEOUT",
                format!("Background removal did not finish within {:?}", limit),
            ),
            ServiceError::Engine(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ENGINE_ERROR",
                format!("Background removal failed: {}", msg),
            ),
            ServiceError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", what),
            ),
            ServiceError::Storage(msg) => {
                tracing::error!(error = %msg, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            },
            other => {
                tracing::error!(error = %other, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            },
        }
    }
}

/// Seconds a client should wait before retrying a rejected request
fn retry_after(reason: Exhaustion) -> &'static str {
    match reason {
        Exhaustion::QueueFull | Exhaustion::WaitTimeout => "1",
        Exhaustion::Closed => "5",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.classify();
        let body = json!({
            "error": message,
            "code": code,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Self::Service(ServiceError::ResourceExhausted(reason)) = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(retry_after(reason)),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let status = |err: ServiceError| ApiError::from(err).classify().0;

        assert_eq!(
            status(ServiceError::input("corrupt")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(ServiceError::unsupported_format("gif")),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status(ServiceError::ResourceExhausted(Exhaustion::QueueFull)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(ServiceError::engine("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ServiceError::EngineTimeout(Duration::from_secs(3))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(ServiceError::not_found("image")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::bad_request("missing vendor_id").classify().0,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_storage_details_are_not_leaked() {
        let (_, code, message) =
            ApiError::from(ServiceError::storage("mongodb://user:pw@host down")).classify();
        assert_eq!(code, "STORAGE_ERROR");
        assert!(!message.contains("pw"));
    }

    #[test]
    fn test_exhaustion_sets_retry_after() {
        let response =
            ApiError::from(ServiceError::ResourceExhausted(Exhaustion::WaitTimeout)).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
