use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod error;
pub mod handlers;
pub mod memory;
mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod token;
pub mod validation;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::registration_routes())
}
