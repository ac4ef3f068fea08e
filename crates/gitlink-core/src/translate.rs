//! User-facing messages for installation failures.

use crate::error::GitlinkError;

pub const ERR_INTERNAL: &str =
    "An internal error occurred with the integration and the team has been notified";

pub const ERR_UNAUTHORIZED: &str =
    "Unauthorized: either your access token was invalid or you do not have access";

pub const ERR_NOT_FOUND: &str = "GitLab returned a 404 Not Found error. If this group exists, \
     ensure that your installation has permission to access it";

/// Fixed messages for API status codes.
const API_ERRORS: &[(u16, &str)] = &[(404, ERR_NOT_FOUND), (401, ERR_UNAUTHORIZED)];

fn api_error_message(status: u16) -> Option<&'static str> {
    API_ERRORS
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, message)| *message)
}

/// Maps any failure to a short message that is safe to show to the user.
pub fn message_from_error(err: &GitlinkError) -> String {
    match err {
        GitlinkError::Api { status, .. } => match api_error_message(*status) {
            Some(message) => message.to_string(),
            None => format!(
                "Error Communicating with GitLab (HTTP {}): {}",
                status,
                err.api_message().unwrap_or_else(|| "unknown error".to_string())
            ),
        },
        GitlinkError::Authorization(message) => message.clone(),
        GitlinkError::Validation(errors) => format!("Invalid installation details: {}", errors),
        _ => ERR_INTERNAL.to_string(),
    }
}
