//! OAuth endpoint configuration derived from an installation.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::installation::InstallationData;

/// Scopes requested from GitLab, sorted.
pub const OAUTH_SCOPES: [&str; 2] = ["api", "sudo"];

/// Path on this server that GitLab redirects back to after authorization.
pub const SETUP_REDIRECT_PATH: &str = "/extensions/gitlab/setup/";

/// Returns the requested scopes as owned strings, sorted lexically.
pub fn oauth_scopes() -> Vec<String> {
    let mut scopes: Vec<String> = OAUTH_SCOPES.iter().map(|s| s.to_string()).collect();
    scopes.sort();
    scopes
}

/// Absolute redirect URI registered with the GitLab OAuth application.
pub fn redirect_uri(base_url: &Url) -> String {
    format!(
        "{}{}",
        base_url.as_str().trim_end_matches('/'),
        SETUP_REDIRECT_PATH
    )
}

/// OAuth endpoints and client credentials for one GitLab instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub access_token_url: String,
    pub authorize_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub verify_ssl: bool,
}

impl OAuthConfig {
    /// Derives the OAuth configuration from validated installation data.
    pub fn from_installation(data: &InstallationData) -> Self {
        Self {
            access_token_url: format!("https://{}/oauth/token", data.url),
            authorize_url: format!("https://{}/oauth/authorize", data.url),
            client_id: data.client_id.clone(),
            client_secret: data.client_secret.clone(),
            verify_ssl: data.verify_ssl,
        }
    }

    /// Builds the URL the user agent is sent to in order to grant access.
    pub fn build_auth_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&state={}&scope={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(&OAUTH_SCOPES.join(" "))
        )
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("access_token_url", &self.access_token_url)
            .field("authorize_url", &self.authorize_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::InstallationForm;

    fn installation(url: &str, verify_ssl: Option<bool>) -> InstallationData {
        InstallationForm {
            url: Some(url.to_string()),
            name: Some("Tracker App".to_string()),
            group: Some("my-group".to_string()),
            client_id: Some("client-123".to_string()),
            client_secret: Some("secret-456".to_string()),
            verify_ssl,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_endpoints_use_host_only() {
        let config =
            OAuthConfig::from_installation(&installation("https://gitlab.example.com/foo?x=1", None));

        assert_eq!(config.access_token_url, "https://gitlab.example.com/oauth/token");
        assert_eq!(config.authorize_url, "https://gitlab.example.com/oauth/authorize");
        assert_eq!(config.client_id, "client-123");
        assert_eq!(config.client_secret, "secret-456");
        assert!(config.verify_ssl);
    }

    #[test]
    fn test_verify_ssl_flows_through() {
        let config =
            OAuthConfig::from_installation(&installation("https://gitlab.example.com", Some(false)));
        assert!(!config.verify_ssl);
    }

    #[test]
    fn test_build_auth_url() {
        let config = OAuthConfig::from_installation(&installation("https://gitlab.example.com", None));
        let url = config.build_auth_url("https://tracker.example.com/extensions/gitlab/setup/", "state456");

        assert!(url.starts_with("https://gitlab.example.com/oauth/authorize?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains(
            "redirect_uri=https%3A%2F%2Ftracker.example.com%2Fextensions%2Fgitlab%2Fsetup%2F"
        ));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=state456"));
        assert!(url.contains("scope=api%20sudo"));
    }

    #[test]
    fn test_redirect_uri() {
        let base = Url::parse("https://tracker.example.com").unwrap();
        assert_eq!(redirect_uri(&base), "https://tracker.example.com/extensions/gitlab/setup/");

        let base = Url::parse("https://tracker.example.com/prefix/").unwrap();
        assert_eq!(
            redirect_uri(&base),
            "https://tracker.example.com/prefix/extensions/gitlab/setup/"
        );
    }

    #[test]
    fn test_scopes_sorted() {
        assert_eq!(oauth_scopes(), vec!["api".to_string(), "sudo".to_string()]);
    }
}
