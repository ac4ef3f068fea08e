//! GitLab installation endpoints.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gitlink_core::GitlinkError;
use gitlink_core::db::session::SetupSessionRepo;
use gitlink_core::installation::Submission;
use gitlink_core::oauth::config::redirect_uri;
use gitlink_core::pipeline::{FormSubmitted, OAuthConfigured, PipelineStage};
use gitlink_core::provider::{PROVIDER_KEY, gitlab_provider};
use gitlink_core::translate::message_from_error;

use super::{error_response, gitlink_error_response};
use crate::state::AppState;

/// GET /api/gitlab/provider - Describes the provider and its installation form.
pub async fn get_provider() -> impl IntoResponse {
    Json(gitlab_provider())
}

/// Setup response.
#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub auth_url: String,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

/// Decodes the installation form from a JSON or form-encoded body.
fn decode_submission(headers: &HeaderMap, body: &[u8]) -> Result<Submission, Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());

    match content_type.as_deref() {
        Some("application/x-www-form-urlencoded") => Ok(Submission::from_urlencoded(body)),
        None | Some("application/json") => {
            let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
                tracing::debug!("Unparseable installation form: {}", e);
                error_response(
                    StatusCode::BAD_REQUEST,
                    "INVALID_REQUEST",
                    "Request body is not valid JSON",
                )
            })?;
            Ok(Submission::from_json(&value))
        }
        Some(other) => {
            tracing::debug!("Rejected installation form with content type {}", other);
            Err(error_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_MEDIA_TYPE",
                "Send the form as application/json or application/x-www-form-urlencoded",
            ))
        }
    }
}

/// POST /api/gitlab/setup - Validates the installation form and starts OAuth.
pub async fn setup(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    // Get encryption key
    let encryption_key = match state.require_encryption_key() {
        Ok(key) => key,
        Err(msg) => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "ENCRYPTION_NOT_CONFIGURED", msg);
        }
    };

    let submission = match decode_submission(&headers, &body) {
        Ok(submission) => submission,
        Err(response) => return response,
    };

    let configured = match FormSubmitted::submit_decoded(&submission) {
        Ok(submitted) => submitted.configure_oauth(),
        Err(e) => {
            tracing::debug!("Rejected GitLab installation form: {}", e);
            return gitlink_error_response(&e);
        }
    };

    let session =
        match SetupSessionRepo::new_session(PROVIDER_KEY, &configured.installation, encryption_key) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to bind installation data: {}", e);
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ENCRYPTION_ERROR",
                    "Failed to store installation details",
                );
            }
        };

    if let Err(e) = SetupSessionRepo::create(&state.db, &session).await {
        tracing::error!("Failed to create setup session: {}", e);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DATABASE_ERROR",
            "Failed to create setup session",
        );
    }

    let redirect_uri = redirect_uri(&state.config.base_url_parsed);
    let auth_url = configured.authorize_url(&redirect_uri, &session.state);

    tracing::info!(
        "Started GitLab installation for {} (group: {})",
        configured.installation.url,
        configured.installation.group
    );

    (
        StatusCode::OK,
        Json(SetupResponse {
            auth_url,
            state: session.state,
            expires_at: session.expires_at,
        }),
    )
        .into_response()
}

/// Setup status query parameters.
#[derive(Debug, Deserialize)]
pub struct SetupStatusQuery {
    pub state: String,
}

/// Setup status response.
#[derive(Debug, Serialize)]
pub struct SetupStatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// GET /api/gitlab/setup/status - Returns setup status for polling.
/// This endpoint is public - the state token itself serves as authorization.
pub async fn get_setup_status(
    State(state): State<AppState>,
    Query(params): Query<SetupStatusQuery>,
) -> Response {
    // Non-consuming lookup
    let session = match SetupSessionRepo::get_by_state(&state.db, &params.state, PROVIDER_KEY).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return Json(SetupStatusResponse {
                status: "not_found",
                stage: None,
                message: "Setup session not found or expired".to_string(),
                external_id: None,
            })
            .into_response();
        }
        Err(e) => {
            tracing::error!("Failed to fetch setup session: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Failed to fetch setup status",
            );
        }
    };

    let (status, message) = if let Some(ref error) = session.error_message {
        ("failed", error.clone())
    } else if session.completed_at.is_some() {
        ("completed", "GitLab installation completed".to_string())
    } else if session.is_expired() {
        ("expired", "Setup session expired. Please submit the installation form again.".to_string())
    } else if session.consumed_at.is_some() {
        ("pending", "Processing GitLab authorization...".to_string())
    } else {
        ("pending", "Waiting for GitLab authorization...".to_string())
    };

    Json(SetupStatusResponse {
        status,
        stage: Some(session.stage),
        message,
        external_id: session.external_id,
    })
    .into_response()
}

/// Query parameters GitLab appends to the redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GET /extensions/gitlab/setup/ - OAuth redirect target. Completes the installation.
pub async fn handle_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackQuery>,
) -> Response {
    // Checked before consuming so a misconfigured server leaves the session usable
    let encryption_key = match state.require_encryption_key() {
        Ok(key) => key,
        Err(msg) => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "ENCRYPTION_NOT_CONFIGURED", msg);
        }
    };

    let Some(state_param) = params.state.as_deref().filter(|s| !s.is_empty()) else {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_STATE",
            "Missing state parameter",
        );
    };

    // Validate and consume state
    let session = match SetupSessionRepo::consume(&state.db, state_param, PROVIDER_KEY).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_STATE",
                "Invalid or expired state parameter",
            );
        }
        Err(e) => {
            tracing::error!("Failed to validate setup state: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Failed to validate state",
            );
        }
    };

    // The user declined, or GitLab refused the application
    if let Some(ref error) = params.error {
        let detail = params.error_description.as_deref().unwrap_or(error);
        let err = GitlinkError::Authorization(format!("GitLab denied the authorization: {}", detail));
        tracing::warn!("GitLab authorization denied for {}: {}", session.instance_host, error);
        return fail(&state, state_param, OAuthConfigured::STAGE, &err).await;
    }

    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        let err = GitlinkError::Authorization("GitLab did not return an authorization code".to_string());
        return fail(&state, state_param, OAuthConfigured::STAGE, &err).await;
    };

    let installation = match session.installation(encryption_key) {
        Ok(i) => i,
        Err(e) => {
            tracing::error!("Failed to decrypt installation for state {}: {}", state_param, e);
            return fail(&state, state_param, OAuthConfigured::STAGE, &e).await;
        }
    };

    let redirect_uri = redirect_uri(&state.config.base_url_parsed);
    let integration = match OAuthConfigured::new(installation)
        .complete(state.connector.as_ref(), code, &redirect_uri)
        .await
    {
        Ok(i) => i,
        Err(failure) => {
            tracing::error!("GitLab installation for {}: {}", session.instance_host, failure);
            return fail(&state, state_param, failure.stage, &failure.error).await;
        }
    };

    tracing::info!(
        "GitLab installation completed for {} (external id: {})",
        session.instance_host,
        integration.external_id
    );

    match SetupSessionRepo::mark_completed(&state.db, state_param, &integration.external_id).await {
        Ok(true) => tracing::debug!("Setup session marked as completed"),
        Ok(false) => tracing::warn!("Failed to mark setup session as completed (no rows updated)"),
        Err(e) => tracing::error!("Failed to mark setup session as completed: {}", e),
    }

    (StatusCode::CREATED, Json(integration)).into_response()
}

/// Records the failure on the session for polling and renders it.
async fn fail(state: &AppState, state_param: &str, stage: PipelineStage, err: &GitlinkError) -> Response {
    let message = message_from_error(err);
    if let Err(e) = SetupSessionRepo::mark_failed(&state.db, state_param, stage, &message).await {
        tracing::error!("Failed to mark setup session as failed: {}", e);
    }
    gitlink_error_response(err)
}
