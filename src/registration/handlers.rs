use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    error::ApiError,
    registration::{
        dto::{
            LocaleQuery, ProvisionRequest, RegisterEmailRequest, RegisterEmailResponse,
            RegistrationSnapshot, VerifyTokenQuery,
        },
        error::RegistrationError,
        services,
        validation::sanitize_locale,
    },
    state::AppState,
};

pub fn registration_routes() -> Router<AppState> {
    Router::new()
        .route("/registers", post(request_registration))
        .route("/users", get(verify_token).post(provision_resources))
}

/// Unparseable bodies and queries answer like any other validation failure.
fn malformed(state: &AppState, detail: String) -> ApiError {
    ApiError::from_registration(
        RegistrationError::ValidationFailed(detail),
        state.config.environment,
    )
}

/// POST /registers?locale=xx { email }
#[instrument(skip_all)]
pub async fn request_registration(
    State(state): State<AppState>,
    query: Result<Query<LocaleQuery>, QueryRejection>,
    payload: Result<Json<RegisterEmailRequest>, JsonRejection>,
) -> Result<Json<RegisterEmailResponse>, ApiError> {
    // A garbled locale only loses the translation, never the request.
    let locale = sanitize_locale(query.ok().and_then(|Query(q)| q.locale).as_deref());
    let Json(payload) = payload.map_err(|e| malformed(&state, e.body_text()))?;

    let registration = services::request_registration(&state, &payload.email, &locale)
        .await
        .map_err(|e| ApiError::from_registration(e, state.config.environment))?;

    info!(email = %registration.email, "verification link sent");
    Ok(Json(RegisterEmailResponse {
        email: registration.email,
        expiry_date: registration.expiry_date,
    }))
}

/// GET /users?email=..&token=..&expiryDate=..
#[instrument(skip_all)]
pub async fn verify_token(
    State(state): State<AppState>,
    query: Result<Query<VerifyTokenQuery>, QueryRejection>,
) -> Result<Json<RegistrationSnapshot>, ApiError> {
    let Query(query) = query.map_err(|e| malformed(&state, e.body_text()))?;
    let registration =
        services::verify_token(&state, &query.email, &query.token, query.expiry_date)
            .await
            .map_err(|e| ApiError::from_registration(e, state.config.environment))?;
    Ok(Json(RegistrationSnapshot::from(&registration)))
}

/// POST /users { email, token, expiryDate, username?, passwordSsh?, ... }
/// 201 when something was created, 200 when every requested side was
/// already claimed.
#[instrument(skip_all)]
pub async fn provision_resources(
    State(state): State<AppState>,
    payload: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegistrationSnapshot>), ApiError> {
    let Json(payload) = payload.map_err(|e| malformed(&state, e.body_text()))?;
    let outcome = services::provision_resources(&state, payload)
        .await
        .map_err(|e| ApiError::from_registration(e, state.config.environment))?;

    let status = if outcome.created.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(RegistrationSnapshot::from(&outcome.registration))))
}
