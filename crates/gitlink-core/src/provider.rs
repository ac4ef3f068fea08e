//! Static description of the GitLab integration provider.

use serde::Serialize;

use crate::oauth::config::{OAUTH_SCOPES, SETUP_REDIRECT_PATH};

/// Provider key, also used as the identity type.
pub const PROVIDER_KEY: &str = "gitlab";

#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub features: Vec<&'static str>,
    pub needs_default_identity: bool,
    pub oauth_scopes: Vec<&'static str>,
    pub redirect_path: &'static str,
    pub setup_dialog: SetupDialog,
    pub metadata: ProviderMetadata,
    pub form: Vec<FormField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupDialog {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetadata {
    pub description: &'static str,
    pub author: &'static str,
    pub noun: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Secret,
    Checkbox,
}

/// One field of the installation form, for whatever front-end renders it.
#[derive(Debug, Clone, Serialize)]
pub struct FormField {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<bool>,
}

impl FormField {
    fn text(name: &'static str, label: &'static str) -> Self {
        Self {
            name,
            label,
            kind: FieldKind::Text,
            required: true,
            help_text: None,
            placeholder: None,
            initial: None,
        }
    }

    fn help(mut self, help_text: &'static str) -> Self {
        self.help_text = Some(help_text);
        self
    }

    fn placeholder(mut self, placeholder: &'static str) -> Self {
        self.placeholder = Some(placeholder);
        self
    }
}

/// Installation form fields, in display order.
pub fn installation_form() -> Vec<FormField> {
    vec![
        FormField::text("url", "Installation Url")
            .help("The \"base URL\" for your GitLab instance, includes the host and protocol.")
            .placeholder("https://gitlab.example.com"),
        FormField::text("name", "GitLab App Name")
            .help(
                "The name of your OAuth Application in GitLab. This can be found on the apps \
                 configuration page. (/profile/applications)",
            )
            .placeholder("Tracker App"),
        FormField::text("group", "GitLab Group Name").placeholder("my-awesome-group"),
        FormField {
            kind: FieldKind::Checkbox,
            required: false,
            initial: Some(true),
            ..FormField::text("verify_ssl", "Verify SSL").help(
                "By default, we verify SSL certificates when making requests to your GitLab instance",
            )
        },
        FormField::text("client_id", "GitLab Application ID")
            .placeholder("5832fc6e14300a0d962240a8144466eef4ee93ef0d218477e55f11cf12fc3737"),
        FormField {
            kind: FieldKind::Secret,
            ..FormField::text("client_secret", "GitLab Application Secret")
                .placeholder("XXXXXXXXXXXXXXXXXXXXXXXXXXX")
        },
    ]
}

/// Describes the GitLab provider.
pub fn gitlab_provider() -> ProviderDescriptor {
    ProviderDescriptor {
        key: PROVIDER_KEY,
        name: "GitLab",
        features: vec!["issue-basic"],
        needs_default_identity: true,
        oauth_scopes: OAUTH_SCOPES.to_vec(),
        redirect_path: SETUP_REDIRECT_PATH,
        setup_dialog: SetupDialog {
            width: 1030,
            height: 1000,
        },
        metadata: ProviderMetadata {
            description: "Connect a GitLab group to track and link issues.",
            author: "The Gitlink Team",
            noun: "Installation",
        },
        form: installation_form(),
    }
}
