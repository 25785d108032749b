use axum::http::StatusCode;

use crate::{
    config::Environment, provisioning::ResourceKind, registration::repo_types::IdentifierField,
};

/// Failures surfaced by the registration workflows.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("a verification link was already sent; check your inbox")]
    AlreadyPending,

    #[error("registration not found")]
    RegistrationNotFound,

    #[error("token is invalid")]
    TokenInvalid,

    #[error("token has expired")]
    TokenExpired,

    #[error("{field} is already taken")]
    ResourceConflict { field: IdentifierField },

    #[error("{step} provisioning failed: {detail}")]
    ExternalProvisioningFailed { step: ResourceKind, detail: String },

    #[error("failed to persist registration")]
    PersistenceFailed,

    #[error("failed to send verification email")]
    NotificationFailed,

    #[error("system error: {0}")]
    SystemError(String),
}

const GENERIC_SYSTEM_MESSAGE: &str = "an internal error occurred, please try again later";

impl RegistrationError {
    pub fn status(&self) -> StatusCode {
        match self {
            RegistrationError::ValidationFailed(_)
            | RegistrationError::TokenInvalid
            | RegistrationError::TokenExpired => StatusCode::BAD_REQUEST,
            RegistrationError::RegistrationNotFound => StatusCode::NOT_FOUND,
            RegistrationError::AlreadyPending | RegistrationError::ResourceConflict { .. } => {
                StatusCode::CONFLICT
            }
            RegistrationError::ExternalProvisioningFailed { .. }
            | RegistrationError::PersistenceFailed
            | RegistrationError::NotificationFailed
            | RegistrationError::SystemError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the caller. Routine output and system
    /// detail are only exposed in development.
    pub fn public_message(&self, environment: Environment) -> String {
        match self {
            RegistrationError::ExternalProvisioningFailed { detail, .. } => {
                if environment.is_development() {
                    detail.clone()
                } else {
                    GENERIC_SYSTEM_MESSAGE.to_string()
                }
            }
            RegistrationError::SystemError(_) if !environment.is_development() => {
                GENERIC_SYSTEM_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }
}
