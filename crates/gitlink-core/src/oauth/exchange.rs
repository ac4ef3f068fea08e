//! Authorization code exchange against the GitLab token endpoint.

use serde::{Deserialize, Serialize};

use super::config::OAuthConfig;
use crate::error::{GitlinkError, Result};

/// Token response from GitLab.
///
/// GitLab also sends `created_at` and sometimes `expires_in`; those are not
/// carried into the integration and are ignored here.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPayload")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

const INVALID_TOKEN_RESPONSE: &str = "Invalid token response from GitLab";

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Exchanges an authorization code for tokens.
///
/// Every failure is reported as [`GitlinkError::Authorization`]; the exchange
/// is never retried.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenPayload> {
    let response = client
        .post(&config.access_token_url)
        .header("Accept", "application/json")
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| GitlinkError::Authorization(format!("GitLab OAuth request failed: {}", e)))?;

    let status = response.status();
    let body = response.text().await.map_err(|e| {
        GitlinkError::Authorization(format!("Failed to read GitLab token response: {}", e))
    })?;

    if !status.is_success() {
        let detail = serde_json::from_str::<OAuthErrorBody>(&body)
            .ok()
            .and_then(|b| b.error_description.or(b.error))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        return Err(GitlinkError::Authorization(format!(
            "GitLab rejected the authorization: {}",
            detail
        )));
    }

    serde_json::from_str(&body).map_err(|e| {
        tracing::debug!("Unparseable GitLab token response: {}", e);
        GitlinkError::Authorization(INVALID_TOKEN_RESPONSE.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{SsrfConfig, create_http_client};
    use mockito::{Matcher, Server};

    fn client() -> reqwest::Client {
        create_http_client(&SsrfConfig::default(), true).unwrap()
    }

    fn config(server_url: &str) -> OAuthConfig {
        OAuthConfig {
            access_token_url: format!("{}/oauth/token", server_url),
            authorize_url: format!("{}/oauth/authorize", server_url),
            client_id: "client-123".to_string(),
            client_secret: "secret-456".to_string(),
            verify_ssl: true,
        }
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "code-789".into()),
                Matcher::UrlEncoded("client_id".into(), "client-123".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret-456".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "https://tracker.example.com/extensions/gitlab/setup/".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "access_token": "123432sfh29uhs29347",
                    "token_type": "bearer",
                    "refresh_token": "29f43sdfsk22fsj929",
                    "created_at": 1536798907,
                    "scope": "api sudo"
                }"#,
            )
            .create_async()
            .await;

        let client = client();
        let token = exchange_code(
            &client,
            &config(&server.url()),
            "code-789",
            "https://tracker.example.com/extensions/gitlab/setup/",
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(token.access_token, "123432sfh29uhs29347");
        assert_eq!(token.refresh_token.as_deref(), Some("29f43sdfsk22fsj929"));
        assert_eq!(token.token_type.as_deref(), Some("bearer"));
        assert_eq!(token.scope.as_deref(), Some("api sudo"));
    }

    #[tokio::test]
    async fn test_exchange_code_without_refresh_token() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token": "abc"}"#)
            .create_async()
            .await;

        let client = client();
        let token = exchange_code(&client, &config(&server.url()), "code", "https://x/cb")
            .await
            .unwrap();

        assert_eq!(token.access_token, "abc");
        assert!(token.refresh_token.is_none());
        assert!(token.token_type.is_none());
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(
                r#"{"error": "invalid_grant", "error_description": "The provided authorization grant is invalid."}"#,
            )
            .create_async()
            .await;

        let client = client();
        let err = exchange_code(&client, &config(&server.url()), "bad", "https://x/cb")
            .await
            .unwrap_err();

        match err {
            GitlinkError::Authorization(msg) => {
                assert!(msg.contains("The provided authorization grant is invalid."));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_rejected_without_body() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/oauth/token")
            .with_status(503)
            .create_async()
            .await;

        let client = client();
        let err = exchange_code(&client, &config(&server.url()), "code", "https://x/cb")
            .await
            .unwrap_err();

        assert!(matches!(err, GitlinkError::Authorization(ref msg) if msg.contains("HTTP 503")));
    }

    #[tokio::test]
    async fn test_exchange_code_missing_access_token() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"token_type": "bearer"}"#)
            .create_async()
            .await;

        let client = client();
        let err = exchange_code(&client, &config(&server.url()), "code", "https://x/cb")
            .await
            .unwrap_err();

        assert!(matches!(err, GitlinkError::Authorization(ref msg) if msg == INVALID_TOKEN_RESPONSE));
    }

    #[tokio::test]
    async fn test_exchange_code_malformed_body_hides_parser_detail() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>Sign in</html>")
            .create_async()
            .await;

        let client = client();
        let err = exchange_code(&client, &config(&server.url()), "code", "https://x/cb")
            .await
            .unwrap_err();

        match err {
            GitlinkError::Authorization(msg) => {
                assert_eq!(msg, INVALID_TOKEN_RESPONSE);
                assert!(!msg.contains("line"));
                assert!(!msg.contains("column"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_token_debug_redacts() {
        let token = TokenPayload {
            access_token: "abc".to_string(),
            refresh_token: Some("def".to_string()),
            token_type: None,
            scope: None,
        };
        let debug = format!("{:?}", token);
        assert!(!debug.contains("abc"));
        assert!(!debug.contains("def"));
    }
}
