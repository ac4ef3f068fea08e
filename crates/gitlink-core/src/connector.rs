//! Network side of the installation pipeline.

use async_trait::async_trait;

use crate::error::{GitlinkError, Result};
use crate::gitlab::{GitLabApi, GroupInfo, UserInfo};
use crate::installation::InstallationData;
use crate::oauth::config::OAuthConfig;
use crate::oauth::exchange::{TokenPayload, exchange_code};
use crate::oauth::{SsrfConfig, create_pinned_http_client, validate_instance_host};

/// Outbound calls made while completing an installation.
///
/// Implementations can be:
/// - HttpGitLabConnector: talks to the real GitLab instance
/// - test doubles returning canned responses
#[async_trait]
pub trait GitLabConnector: Send + Sync {
    /// Exchanges an authorization code for tokens.
    async fn exchange_code(
        &self,
        installation: &InstallationData,
        config: &OAuthConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenPayload>;

    /// Looks up the installation's group.
    async fn fetch_group(
        &self,
        installation: &InstallationData,
        access_token: &str,
    ) -> Result<GroupInfo>;

    /// Looks up the user the access token belongs to.
    async fn fetch_user(
        &self,
        installation: &InstallationData,
        access_token: &str,
    ) -> Result<UserInfo>;
}

/// Connector backed by reqwest, with SSRF validation and IP pinning.
#[derive(Debug, Clone, Default)]
pub struct HttpGitLabConnector {
    ssrf_config: SsrfConfig,
}

impl HttpGitLabConnector {
    pub fn new(ssrf_config: SsrfConfig) -> Self {
        Self { ssrf_config }
    }

    /// Creates a connector configured from the environment.
    pub fn from_env() -> Self {
        Self::new(SsrfConfig::from_env())
    }

    /// Validates the host and returns a client pinned to its addresses.
    async fn client_for(&self, installation: &InstallationData) -> Result<reqwest::Client> {
        let host = installation.url.clone();
        let ssrf_config = self.ssrf_config.clone();
        // DNS resolution blocks.
        let validated = tokio::task::spawn_blocking(move || validate_instance_host(&host, &ssrf_config))
            .await
            .map_err(|e| GitlinkError::Configuration(format!("Host validation task failed: {}", e)))??;

        create_pinned_http_client(&self.ssrf_config, &validated, installation.verify_ssl)
    }
}

#[async_trait]
impl GitLabConnector for HttpGitLabConnector {
    async fn exchange_code(
        &self,
        installation: &InstallationData,
        config: &OAuthConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenPayload> {
        let client = self.client_for(installation).await?;
        exchange_code(&client, config, code, redirect_uri).await
    }

    async fn fetch_group(
        &self,
        installation: &InstallationData,
        access_token: &str,
    ) -> Result<GroupInfo> {
        let client = self.client_for(installation).await?;
        GitLabApi::new(client, &installation.base_url(), access_token)
            .get_group(&installation.group)
            .await
    }

    async fn fetch_user(
        &self,
        installation: &InstallationData,
        access_token: &str,
    ) -> Result<UserInfo> {
        let client = self.client_for(installation).await?;
        GitLabApi::new(client, &installation.base_url(), access_token)
            .get_user()
            .await
    }
}
