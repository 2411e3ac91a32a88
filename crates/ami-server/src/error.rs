//! HTTP error mapping.

use ami_client::AmiError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors returned by façade handlers.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The request body was missing a required field.
    #[error("{0}")]
    BadRequest(String),
    /// The request body was not JSON of the expected shape.
    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),
    /// The AMI client failed.
    #[error(transparent)]
    Ami(#[from] AmiError),
}

impl BridgeError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidBody(rejection) => rejection.status(),
            Self::Ami(e) => match e {
                AmiError::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
                AmiError::ConnectFailed { .. } | AmiError::ActionFailed { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                AmiError::ActionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                AmiError::NotConnected | AmiError::ConnectionLost => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                AmiError::Framing(_) | AmiError::Io(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InvalidBody(_) => "INVALID_BODY",
            Self::Ami(e) => e.code(),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}
