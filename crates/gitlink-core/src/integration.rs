//! The integration record produced by a successful installation.

use serde::{Deserialize, Serialize};

use crate::error::{GitlinkError, Result};
use crate::gitlab::{GroupInfo, UserInfo};
use crate::installation::InstallationData;
use crate::oauth::config::oauth_scopes;
use crate::oauth::exchange::TokenPayload;
use crate::provider::PROVIDER_KEY;

/// Final artifact of the installation pipeline.
///
/// Keyed by `external_id`; the caller persists it (upserting on that key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub name: String,
    pub external_id: String,
    pub metadata: IntegrationMetadata,
    pub user_identity: UserIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationMetadata {
    pub icon: Option<String>,
    pub domain_name: String,
    pub scopes: Vec<String>,
    pub verify_ssl: bool,
    /// Set on reinstall to the group id part of the external id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(rename = "type")]
    pub kind: String,
    pub external_id: String,
    pub scopes: Vec<String>,
    pub data: OAuthData,
}

/// Token data stored on the user identity. Absent keys are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthData {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl From<&TokenPayload> for OAuthData {
    fn from(payload: &TokenPayload) -> Self {
        Self {
            access_token: payload.access_token.clone(),
            refresh_token: payload.refresh_token.clone(),
            token_type: payload.token_type.clone(),
        }
    }
}

/// External id of an installation: `{base_url}:{group_id}`.
pub fn external_id(base_url: &str, group_id: i64) -> String {
    format!("{}:{}", base_url, group_id)
}

/// Combines the pipeline results into the integration record.
pub fn build_integration(
    installation: &InstallationData,
    token: &TokenPayload,
    group: &GroupInfo,
    user: &UserInfo,
) -> Integration {
    let scopes = oauth_scopes();

    Integration {
        name: group.name.clone(),
        external_id: external_id(&installation.url, group.id),
        metadata: IntegrationMetadata {
            icon: group.avatar_url.clone(),
            domain_name: group
                .web_url
                .strip_prefix("https://")
                .unwrap_or(&group.web_url)
                .to_string(),
            scopes: scopes.clone(),
            verify_ssl: installation.verify_ssl,
            installation_id: None,
        },
        user_identity: UserIdentity {
            kind: PROVIDER_KEY.to_string(),
            external_id: user.id.to_string(),
            scopes,
            data: OAuthData::from(token),
        },
    }
}

impl Integration {
    /// Group id component of the external id.
    ///
    /// The base URL may itself contain a port, so the id is the part after
    /// the last `:`.
    pub fn group_id(&self) -> Result<&str> {
        self.external_id
            .rsplit_once(':')
            .map(|(_, id)| id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GitlinkError::InvalidExternalId(self.external_id.clone()))
    }

    /// Metadata for a reinstalled integration: the existing metadata with
    /// `installation_id` set to the group id.
    pub fn reinstall_metadata(&self) -> Result<IntegrationMetadata> {
        let mut metadata = self.metadata.clone();
        metadata.installation_id = Some(self.group_id()?.to_string());
        Ok(metadata)
    }
}
