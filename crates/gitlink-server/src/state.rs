//! Application state for the Gitlink server.

use gitlink_core::connector::GitLabConnector;
use gitlink_core::db::DbPool;
use gitlink_core::crypto::EncryptionKey;
use std::sync::Arc;
use url::Url;

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Server configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL for the server (for building the OAuth redirect URI).
    pub base_url: String,
    /// Parsed base URL.
    pub base_url_parsed: Url,
    /// Address to listen on.
    pub bind_addr: String,
    /// Allowed CORS origin for the dashboard.
    pub dashboard_origin: Option<String>,
    /// Database URL.
    pub database_url: String,
    /// Whether dev mode is enabled.
    pub dev_mode: bool,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let base_url = std::env::var("GITLINK_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());

        let base_url_parsed =
            Url::parse(&base_url).map_err(|e| format!("Invalid GITLINK_BASE_URL: {}", e))?;

        let dev_mode = std::env::var("GITLINK_DEV_MODE").ok() == Some("true".to_string());

        // OAuth codes travel through the redirect, so require HTTPS in production
        if !dev_mode && base_url_parsed.scheme() != "https" {
            let host = base_url_parsed.host_str().unwrap_or("");
            let is_loopback = host == "localhost" || host == "127.0.0.1" || host == "[::1]";
            if !is_loopback {
                return Err(
                    "GITLINK_BASE_URL must use HTTPS in production. Set GITLINK_DEV_MODE=true for development."
                        .to_string(),
                );
            }
        }

        Ok(Self {
            base_url,
            base_url_parsed,
            bind_addr: std::env::var("GITLINK_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            dashboard_origin: std::env::var("GITLINK_DASHBOARD_ORIGIN").ok(),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:gitlink.db".to_string()),
            dev_mode,
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Outbound GitLab calls.
    pub connector: Arc<dyn GitLabConnector>,
    /// Encryption key for bound installation data.
    pub encryption_key: Option<EncryptionKey>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        db: DbPool,
        config: ServerConfig,
        connector: Arc<dyn GitLabConnector>,
        encryption_key: Option<EncryptionKey>,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            connector,
            encryption_key,
        }
    }

    /// Gets the encryption key, returning an error if not configured.
    pub fn require_encryption_key(&self) -> Result<&EncryptionKey, &'static str> {
        self.encryption_key
            .as_ref()
            .ok_or("ENCRYPTION_KEY not configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 5] = [
        "GITLINK_BASE_URL",
        "GITLINK_DEV_MODE",
        "GITLINK_BIND",
        "GITLINK_DASHBOARD_ORIGIN",
        "DATABASE_URL",
    ];

    fn unset_all() -> Vec<(&'static str, Option<&'static str>)> {
        VARS.iter().map(|v| (*v, None)).collect()
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(unset_all(), || {
            let config = ServerConfig::from_env().unwrap();
            assert_eq!(config.base_url, "http://localhost:8080");
            assert_eq!(config.bind_addr, DEFAULT_BIND);
            assert_eq!(config.database_url, "sqlite:gitlink.db");
            assert!(config.dashboard_origin.is_none());
            assert!(!config.dev_mode);
        });
    }

    #[test]
    fn test_http_rejected_in_production() {
        let mut vars = unset_all();
        vars[0] = ("GITLINK_BASE_URL", Some("http://gitlink.example.com"));
        temp_env::with_vars(vars, || {
            let err = ServerConfig::from_env().unwrap_err();
            assert!(err.contains("HTTPS"));
        });
    }

    #[test]
    fn test_http_allowed_in_dev_mode() {
        let mut vars = unset_all();
        vars[0] = ("GITLINK_BASE_URL", Some("http://gitlink.example.com"));
        vars[1] = ("GITLINK_DEV_MODE", Some("true"));
        temp_env::with_vars(vars, || {
            let config = ServerConfig::from_env().unwrap();
            assert!(config.dev_mode);
            assert_eq!(config.base_url_parsed.host_str(), Some("gitlink.example.com"));
        });
    }

    #[test]
    fn test_invalid_base_url() {
        let mut vars = unset_all();
        vars[0] = ("GITLINK_BASE_URL", Some("not a url"));
        temp_env::with_vars(vars, || {
            assert!(ServerConfig::from_env().unwrap_err().contains("GITLINK_BASE_URL"));
        });
    }

    #[test]
    fn test_overrides() {
        temp_env::with_vars(
            [
                ("GITLINK_BASE_URL", Some("https://gitlink.example.com")),
                ("GITLINK_DEV_MODE", None),
                ("GITLINK_BIND", Some("127.0.0.1:9000")),
                ("GITLINK_DASHBOARD_ORIGIN", Some("https://app.example.com")),
                ("DATABASE_URL", Some("sqlite::memory:")),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config.bind_addr, "127.0.0.1:9000");
                assert_eq!(config.dashboard_origin.as_deref(), Some("https://app.example.com"));
                assert_eq!(config.database_url, "sqlite::memory:");
            },
        );
    }
}
