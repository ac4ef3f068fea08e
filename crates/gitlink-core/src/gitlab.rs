//! GitLab REST API (v4) lookups used during installation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{GitlinkError, Result};

/// GitLab group info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: i64,
    pub name: String,
    pub web_url: String,
    pub avatar_url: Option<String>,
    pub full_path: Option<String>,
}

/// GitLab user info for the authorizing user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: Option<String>,
    pub name: Option<String>,
}

/// Authenticated GitLab API client bound to one instance and access token.
pub struct GitLabApi {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GitLabApi {
    /// Creates a client for `base_url` (e.g. `https://gitlab.example.com`).
    pub fn new(client: reqwest::Client, base_url: &str, access_token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    /// Gets a group by path or numeric id.
    pub async fn get_group(&self, group: &str) -> Result<GroupInfo> {
        self.get_json(&group_path(group), "group").await
    }

    /// Gets the user the access token belongs to.
    pub async fn get_user(&self) -> Result<UserInfo> {
        self.get_json("/api/v4/user", "user").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!("GitLab {} lookup returned HTTP {}", what, status.as_u16());
            return Err(GitlinkError::Api {
                status: status.as_u16(),
                body: serde_json::from_str(&body).ok(),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            GitlinkError::InvalidResponse(format!("Failed to parse {} response: {}", what, e))
        })
    }
}

/// API path for a group; nested group paths are percent-encoded.
fn group_path(group: &str) -> String {
    format!("/api/v4/groups/{}", urlencoding::encode(group))
}
