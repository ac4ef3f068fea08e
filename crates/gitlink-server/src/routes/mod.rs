//! HTTP route handlers.

pub mod gitlab_setup;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gitlink_core::GitlinkError;
use gitlink_core::installation::ValidationErrors;
use gitlink_core::oauth::config::SETUP_REDIRECT_PATH;
use gitlink_core::translate::message_from_error;
use serde::Serialize;

use crate::state::AppState;

/// Installation forms are small; larger request bodies get 413.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Error response type.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<ValidationErrors>,
}

pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
                fields: None,
            },
        }),
    )
        .into_response()
}

/// Status and error code for a failed installation step.
pub fn error_status(err: &GitlinkError) -> (StatusCode, &'static str) {
    match err {
        GitlinkError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
        GitlinkError::Authorization(_) => (StatusCode::UNPROCESSABLE_ENTITY, "AUTHORIZATION_FAILED"),
        GitlinkError::Api { .. } | GitlinkError::InvalidResponse(_) | GitlinkError::Http(_) => {
            (StatusCode::BAD_GATEWAY, "GITLAB_API_ERROR")
        }
        GitlinkError::Database(_) | GitlinkError::Migration(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

/// Renders an installation failure with its user-facing message.
pub fn gitlink_error_response(err: &GitlinkError) -> Response {
    let (status, code) = error_status(err);
    let fields = match err {
        GitlinkError::Validation(errors) => Some(errors.clone()),
        _ => None,
    };

    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message_from_error(err),
                fields,
            },
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    name: &'static str,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn version() -> impl IntoResponse {
    Json(VersionResponse {
        version: gitlink_core::VERSION,
        name: "gitlinkd",
    })
}

/// Creates the public API router.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_check))
        .route("/version", get(version))
        // Installation flow
        .route("/gitlab/provider", get(gitlab_setup::get_provider))
        .route("/gitlab/setup", post(gitlab_setup::setup))
        // Setup status (public - state token is authorization)
        .route("/gitlab/setup/status", get(gitlab_setup::get_setup_status))
        .with_state(state)
}

/// Creates the full application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        // OAuth redirect target registered with the GitLab application
        .route(SETUP_REDIRECT_PATH, get(gitlab_setup::handle_callback))
        .with_state(state.clone())
        .nest("/api", api_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
