use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::{config::Environment, registration::error::RegistrationError};

/// JSON error body: `{"message": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn from_registration(err: RegistrationError, environment: Environment) -> Self {
        let status = err.status();
        if status.is_server_error() {
            error!(error = %err, %status, "request failed");
        } else {
            warn!(error = %err, %status, "request rejected");
        }
        Self {
            status,
            message: err.public_message(environment),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}
