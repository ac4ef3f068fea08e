//! Test utilities for gitlink-server integration tests.

use async_trait::async_trait;
use axum::Router;
use gitlink_core::GitlinkError;
use gitlink_core::connector::GitLabConnector;
use gitlink_core::db::{DbPool, create_pool, run_migrations};
use gitlink_core::gitlab::{GroupInfo, UserInfo};
use gitlink_core::installation::InstallationData;
use gitlink_core::crypto::EncryptionKey;
use gitlink_core::oauth::config::OAuthConfig;
use gitlink_core::oauth::exchange::TokenPayload;
use serde_json::json;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::routes;
use crate::state::{AppState, ServerConfig};

/// Test encryption key used in all tests (base64, 32 bytes).
pub const TEST_ENCRYPTION_KEY: &str = "K7gNU3sdo+OL0wNhqoVWhr3g6s1xYv72ol/pe/Unols=";

pub const TEST_ACCESS_TOKEN: &str = "test-access-token";
pub const TEST_GROUP_ID: i64 = 42;
pub const TEST_USER_ID: i64 = 7;

/// Code exchange recorded by [`StubConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExchange {
    pub token_url: String,
    pub code: String,
    pub redirect_uri: String,
}

/// Connector returning canned GitLab responses.
#[derive(Debug, Clone, Default)]
pub struct StubConnector {
    /// Rejects the code exchange with this message.
    pub reject_code: Option<String>,
    /// Fails the group lookup with this HTTP status.
    pub group_status: Option<u16>,
    /// Fails the user lookup with this HTTP status.
    pub user_status: Option<u16>,
    /// Omits `refresh_token` from the token response.
    pub no_refresh_token: bool,
    pub exchanges: Arc<Mutex<Vec<RecordedExchange>>>,
}

impl StubConnector {
    pub fn recorded_exchanges(&self) -> Vec<RecordedExchange> {
        self.exchanges.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

fn api_error(status: u16) -> GitlinkError {
    GitlinkError::Api {
        status,
        body: Some(json!({ "message": format!("{} stub error", status) })),
    }
}

#[async_trait]
impl GitLabConnector for StubConnector {
    async fn exchange_code(
        &self,
        _installation: &InstallationData,
        config: &OAuthConfig,
        code: &str,
        redirect_uri: &str,
    ) -> gitlink_core::Result<TokenPayload> {
        if let Ok(mut exchanges) = self.exchanges.lock() {
            exchanges.push(RecordedExchange {
                token_url: config.access_token_url.clone(),
                code: code.to_string(),
                redirect_uri: redirect_uri.to_string(),
            });
        }

        if let Some(ref message) = self.reject_code {
            return Err(GitlinkError::Authorization(message.clone()));
        }

        Ok(TokenPayload {
            access_token: TEST_ACCESS_TOKEN.to_string(),
            refresh_token: (!self.no_refresh_token).then(|| "test-refresh-token".to_string()),
            token_type: Some("bearer".to_string()),
            scope: Some("read_user".to_string()),
        })
    }

    async fn fetch_group(
        &self,
        installation: &InstallationData,
        _access_token: &str,
    ) -> gitlink_core::Result<GroupInfo> {
        if let Some(status) = self.group_status {
            return Err(api_error(status));
        }

        Ok(GroupInfo {
            id: TEST_GROUP_ID,
            name: "My Group".to_string(),
            web_url: format!("https://{}/groups/{}", installation.url, installation.group),
            avatar_url: None,
            full_path: Some(installation.group.clone()),
        })
    }

    async fn fetch_user(
        &self,
        _installation: &InstallationData,
        _access_token: &str,
    ) -> gitlink_core::Result<UserInfo> {
        if let Some(status) = self.user_status {
            return Err(api_error(status));
        }

        Ok(UserInfo {
            id: TEST_USER_ID,
            username: Some("jdoe".to_string()),
            name: Some("Jane Doe".to_string()),
        })
    }
}

/// Creates an in-memory test database with migrations applied.
pub async fn setup_test_db() -> DbPool {
    let pool = create_pool("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        base_url: "http://localhost:8080".to_string(),
        base_url_parsed: Url::parse("http://localhost:8080").unwrap(),
        bind_addr: "127.0.0.1:0".to_string(),
        dashboard_origin: None,
        database_url: "sqlite::memory:".to_string(),
        dev_mode: true,
    }
}

/// Creates test application state with in-memory database and the given connector.
pub async fn setup_test_state(connector: StubConnector) -> AppState {
    let db = setup_test_db().await;
    let key = EncryptionKey::from_string(TEST_ENCRYPTION_KEY).expect("Invalid test key");
    AppState::new(db, test_config(), Arc::new(connector), Some(key))
}

/// Creates the full application router for testing.
pub fn create_test_app(state: AppState) -> Router {
    routes::app_router(state)
}
