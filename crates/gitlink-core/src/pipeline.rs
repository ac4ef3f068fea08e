//! Installation pipeline as a sequence of typed steps.
//!
//! ```text
//! Start -> FormSubmitted -> OAuthConfigured -> Authorized
//!       -> GroupResolved -> UserResolved -> Assembled
//! ```
//!
//! Each step consumes its context and returns the next one, so a stage can
//! only be reached with everything the previous stages bound. Any step after
//! `Start` may fail, which ends the attempt in `Failed`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::connector::GitLabConnector;
use crate::error::{GitlinkError, Result};
use crate::gitlab::{GroupInfo, UserInfo};
use crate::installation::{InstallationData, InstallationForm, Submission};
use crate::integration::{Integration, build_integration};
use crate::oauth::config::OAuthConfig;
use crate::oauth::exchange::TokenPayload;

/// Stage of an installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Start,
    FormSubmitted,
    #[serde(rename = "oauth_configured")]
    OAuthConfigured,
    Authorized,
    GroupResolved,
    UserResolved,
    Assembled,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Start => "start",
            PipelineStage::FormSubmitted => "form_submitted",
            PipelineStage::OAuthConfigured => "oauth_configured",
            PipelineStage::Authorized => "authorized",
            PipelineStage::GroupResolved => "group_resolved",
            PipelineStage::UserResolved => "user_resolved",
            PipelineStage::Assembled => "assembled",
            PipelineStage::Failed => "failed",
        }
    }

    /// The stage that follows on success, if any.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Start => Some(PipelineStage::FormSubmitted),
            PipelineStage::FormSubmitted => Some(PipelineStage::OAuthConfigured),
            PipelineStage::OAuthConfigured => Some(PipelineStage::Authorized),
            PipelineStage::Authorized => Some(PipelineStage::GroupResolved),
            PipelineStage::GroupResolved => Some(PipelineStage::UserResolved),
            PipelineStage::UserResolved => Some(PipelineStage::Assembled),
            PipelineStage::Assembled | PipelineStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Assembled | PipelineStage::Failed)
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: PipelineStage) -> bool {
        match to {
            PipelineStage::Failed => !matches!(self, PipelineStage::Start) && !self.is_terminal(),
            _ => self.next() == Some(to),
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = GitlinkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "start" => Ok(PipelineStage::Start),
            "form_submitted" => Ok(PipelineStage::FormSubmitted),
            "oauth_configured" => Ok(PipelineStage::OAuthConfigured),
            "authorized" => Ok(PipelineStage::Authorized),
            "group_resolved" => Ok(PipelineStage::GroupResolved),
            "user_resolved" => Ok(PipelineStage::UserResolved),
            "assembled" => Ok(PipelineStage::Assembled),
            "failed" => Ok(PipelineStage::Failed),
            _ => Err(GitlinkError::Configuration(format!(
                "Unknown pipeline stage: {}",
                s
            ))),
        }
    }
}

/// A failed step: the stage the pipeline was in and why it stopped.
#[derive(Debug)]
pub struct StepFailure {
    pub stage: PipelineStage,
    pub error: GitlinkError,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "installation failed at {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for StepFailure {}

/// The installation form passed validation.
#[derive(Debug, Clone)]
pub struct FormSubmitted {
    pub installation: InstallationData,
}

impl FormSubmitted {
    pub const STAGE: PipelineStage = PipelineStage::FormSubmitted;

    /// Validates a submitted form. Nothing is bound if any field is invalid.
    pub fn submit(form: &InstallationForm) -> Result<Self> {
        let installation = form.validate().map_err(GitlinkError::Validation)?;
        Ok(Self { installation })
    }

    /// Validates a form decoded from a request body, including any fields
    /// that failed to decode.
    pub fn submit_decoded(submission: &Submission) -> Result<Self> {
        let installation = submission.validate().map_err(GitlinkError::Validation)?;
        Ok(Self { installation })
    }

    pub fn configure_oauth(self) -> OAuthConfigured {
        OAuthConfigured::new(self.installation)
    }
}

/// OAuth endpoints are known; waiting for the user to authorize.
#[derive(Debug, Clone)]
pub struct OAuthConfigured {
    pub installation: InstallationData,
    pub oauth: OAuthConfig,
}

impl OAuthConfigured {
    pub const STAGE: PipelineStage = PipelineStage::OAuthConfigured;

    /// Rebuilds this stage from bound installation data.
    pub fn new(installation: InstallationData) -> Self {
        let oauth = OAuthConfig::from_installation(&installation);
        Self {
            installation,
            oauth,
        }
    }

    /// URL to send the user to for authorization.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        self.oauth.build_auth_url(redirect_uri, state)
    }

    /// Exchanges the authorization code returned on the redirect.
    pub async fn authorize(
        self,
        connector: &dyn GitLabConnector,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Authorized> {
        let token = connector
            .exchange_code(&self.installation, &self.oauth, code, redirect_uri)
            .await?;

        Ok(Authorized {
            installation: self.installation,
            token,
        })
    }

    /// Runs every remaining step and assembles the integration.
    pub async fn complete(
        self,
        connector: &dyn GitLabConnector,
        code: &str,
        redirect_uri: &str,
    ) -> std::result::Result<Integration, StepFailure> {
        let authorized = self
            .authorize(connector, code, redirect_uri)
            .await
            .map_err(|error| StepFailure {
                stage: OAuthConfigured::STAGE,
                error,
            })?;

        let resolved = authorized.resolve_metadata(connector).await?;
        Ok(resolved.assemble())
    }
}

/// Tokens were obtained.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub installation: InstallationData,
    pub token: TokenPayload,
}

impl Authorized {
    pub const STAGE: PipelineStage = PipelineStage::Authorized;

    pub async fn resolve_group(self, connector: &dyn GitLabConnector) -> Result<GroupResolved> {
        let group = connector
            .fetch_group(&self.installation, &self.token.access_token)
            .await?;

        Ok(GroupResolved {
            installation: self.installation,
            token: self.token,
            group,
        })
    }

    /// Resolves group and user with both lookups in flight at once.
    ///
    /// A group failure is reported at `Authorized`, a user failure at
    /// `GroupResolved`, matching the sequential order of the steps.
    pub async fn resolve_metadata(
        self,
        connector: &dyn GitLabConnector,
    ) -> std::result::Result<UserResolved, StepFailure> {
        let access_token = self.token.access_token.as_str();
        let (group, user) = tokio::join!(
            connector.fetch_group(&self.installation, access_token),
            connector.fetch_user(&self.installation, access_token),
        );

        let group = group.map_err(|error| StepFailure {
            stage: Authorized::STAGE,
            error,
        })?;
        let user = user.map_err(|error| StepFailure {
            stage: GroupResolved::STAGE,
            error,
        })?;

        Ok(UserResolved {
            installation: self.installation,
            token: self.token,
            group,
            user,
        })
    }
}

/// The group was found and is accessible.
#[derive(Debug, Clone)]
pub struct GroupResolved {
    pub installation: InstallationData,
    pub token: TokenPayload,
    pub group: GroupInfo,
}

impl GroupResolved {
    pub const STAGE: PipelineStage = PipelineStage::GroupResolved;

    pub async fn resolve_user(self, connector: &dyn GitLabConnector) -> Result<UserResolved> {
        let user = connector
            .fetch_user(&self.installation, &self.token.access_token)
            .await?;

        Ok(UserResolved {
            installation: self.installation,
            token: self.token,
            group: self.group,
            user,
        })
    }
}

/// Everything needed for the integration record is known.
#[derive(Debug, Clone)]
pub struct UserResolved {
    pub installation: InstallationData,
    pub token: TokenPayload,
    pub group: GroupInfo,
    pub user: UserInfo,
}

impl UserResolved {
    pub const STAGE: PipelineStage = PipelineStage::UserResolved;

    pub fn assemble(self) -> Integration {
        build_integration(&self.installation, &self.token, &self.group, &self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Connector returning canned data; fails on request.
    struct FakeConnector {
        reject_code: bool,
        group_status: Option<u16>,
        user_status: Option<u16>,
    }

    impl FakeConnector {
        fn ok() -> Self {
            Self {
                reject_code: false,
                group_status: None,
                user_status: None,
            }
        }
    }

    #[async_trait]
    impl GitLabConnector for FakeConnector {
        async fn exchange_code(
            &self,
            _installation: &InstallationData,
            config: &OAuthConfig,
            code: &str,
            _redirect_uri: &str,
        ) -> Result<TokenPayload> {
            assert_eq!(config.access_token_url, "https://gitlab.example.com/oauth/token");
            if self.reject_code {
                return Err(GitlinkError::Authorization("bad code".to_string()));
            }
            Ok(TokenPayload {
                access_token: format!("token-for-{}", code),
                refresh_token: None,
                token_type: Some("bearer".to_string()),
                scope: Some("api".to_string()),
            })
        }

        async fn fetch_group(
            &self,
            installation: &InstallationData,
            access_token: &str,
        ) -> Result<GroupInfo> {
            assert_eq!(access_token, "token-for-abc");
            if let Some(status) = self.group_status {
                return Err(GitlinkError::Api { status, body: None });
            }
            Ok(GroupInfo {
                id: 42,
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
        ) -> Result<UserInfo> {
            if let Some(status) = self.user_status {
                return Err(GitlinkError::Api { status, body: None });
            }
            Ok(UserInfo {
                id: 7,
                username: Some("jdoe".to_string()),
                name: None,
            })
        }
    }

    fn form(verify_ssl: Option<bool>) -> InstallationForm {
        InstallationForm {
            url: Some("https://gitlab.example.com/some/path".to_string()),
            name: Some("Tracker App".to_string()),
            group: Some("my-group".to_string()),
            client_id: Some("client-123".to_string()),
            client_secret: Some("secret-456".to_string()),
            verify_ssl,
        }
    }

    #[test]
    fn test_stage_transitions() {
        let mut stage = PipelineStage::Start;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            assert!(stage.can_transition_to(next));
            stage = next;
            visited.push(stage);
        }
        assert_eq!(stage, PipelineStage::Assembled);
        assert_eq!(visited.len(), 7);

        assert!(!PipelineStage::Start.can_transition_to(PipelineStage::Failed));
        assert!(PipelineStage::FormSubmitted.can_transition_to(PipelineStage::Failed));
        assert!(PipelineStage::UserResolved.can_transition_to(PipelineStage::Failed));
        assert!(!PipelineStage::Assembled.can_transition_to(PipelineStage::Failed));
        assert!(!PipelineStage::Failed.can_transition_to(PipelineStage::Failed));
        assert!(!PipelineStage::Start.can_transition_to(PipelineStage::Authorized));
    }

    #[test]
    fn test_stage_string_roundtrip() {
        for stage in [
            PipelineStage::Start,
            PipelineStage::FormSubmitted,
            PipelineStage::OAuthConfigured,
            PipelineStage::Authorized,
            PipelineStage::GroupResolved,
            PipelineStage::UserResolved,
            PipelineStage::Assembled,
            PipelineStage::Failed,
        ] {
            assert_eq!(stage.as_str().parse::<PipelineStage>().unwrap(), stage);
        }
        assert!("bogus".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_stage_serializes_as_stored_string() {
        for stage in [
            PipelineStage::Start,
            PipelineStage::FormSubmitted,
            PipelineStage::OAuthConfigured,
            PipelineStage::Authorized,
            PipelineStage::GroupResolved,
            PipelineStage::UserResolved,
            PipelineStage::Assembled,
            PipelineStage::Failed,
        ] {
            let value = serde_json::to_value(stage).unwrap();
            assert_eq!(value, stage.as_str());
            assert_eq!(serde_json::from_value::<PipelineStage>(value).unwrap(), stage);
        }
    }

    #[test]
    fn test_submit_decoded_reports_type_errors() {
        let body = serde_json::json!({
            "url": "https://gitlab.example.com",
            "name": "Tracker App",
            "group": "my-group",
            "client_id": "client-123",
            "client_secret": "secret-456",
            "verify_ssl": {"nested": true},
        });
        let err = FormSubmitted::submit_decoded(&Submission::from_json(&body)).unwrap_err();
        match err {
            GitlinkError::Validation(errors) => {
                assert!(errors.contains("verify_ssl"));
                assert_eq!(errors.fields().len(), 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_submit_invalid_form_binds_nothing() {
        let err = FormSubmitted::submit(&InstallationForm::default()).unwrap_err();
        assert!(matches!(err, GitlinkError::Validation(_)));
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let configured = FormSubmitted::submit(&form(Some(false)))
            .unwrap()
            .configure_oauth();
        assert!(!configured.oauth.verify_ssl);

        let integration = configured
            .complete(&FakeConnector::ok(), "abc", "https://tracker.example.com/extensions/gitlab/setup/")
            .await
            .unwrap();

        assert_eq!(integration.external_id, "gitlab.example.com:42");
        assert_eq!(integration.metadata.domain_name, "gitlab.example.com/groups/my-group");
        assert!(!integration.metadata.verify_ssl);
        assert_eq!(integration.metadata.scopes, vec!["api", "sudo"]);
        assert_eq!(integration.user_identity.external_id, "7");
        assert!(integration.user_identity.data.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_sequential_steps() {
        let connector = FakeConnector::ok();
        let configured = FormSubmitted::submit(&form(None)).unwrap().configure_oauth();

        let authorized = configured.authorize(&connector, "abc", "https://x/cb").await.unwrap();
        let group_resolved = authorized.resolve_group(&connector).await.unwrap();
        assert_eq!(group_resolved.group.id, 42);
        let user_resolved = group_resolved.resolve_user(&connector).await.unwrap();
        assert_eq!(user_resolved.user.id, 7);

        let integration = user_resolved.assemble();
        assert!(integration.metadata.verify_ssl);
    }

    #[tokio::test]
    async fn test_authorization_failure_stage() {
        let connector = FakeConnector {
            reject_code: true,
            ..FakeConnector::ok()
        };
        let configured = FormSubmitted::submit(&form(None)).unwrap().configure_oauth();

        let failure = configured.complete(&connector, "abc", "https://x/cb").await.unwrap_err();
        assert_eq!(failure.stage, PipelineStage::OAuthConfigured);
        assert!(matches!(failure.error, GitlinkError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_group_failure_stage() {
        let connector = FakeConnector {
            group_status: Some(404),
            ..FakeConnector::ok()
        };
        let configured = FormSubmitted::submit(&form(None)).unwrap().configure_oauth();

        let failure = configured.complete(&connector, "abc", "https://x/cb").await.unwrap_err();
        assert_eq!(failure.stage, PipelineStage::Authorized);
        assert!(matches!(failure.error, GitlinkError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_user_failure_stage() {
        let connector = FakeConnector {
            user_status: Some(401),
            ..FakeConnector::ok()
        };
        let configured = FormSubmitted::submit(&form(None)).unwrap().configure_oauth();

        let failure = configured.complete(&connector, "abc", "https://x/cb").await.unwrap_err();
        assert_eq!(failure.stage, PipelineStage::GroupResolved);
        assert!(failure.to_string().contains("group_resolved"));
    }
}
