//! Installation form validation.
//!
//! The form is what a user fills in to connect a GitLab group: the instance
//! URL, the OAuth application credentials and the group to link. Validation
//! either yields a complete [`InstallationData`] or reports every bad field at
//! once so the form can be redisplayed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

const REQUIRED: &str = "This field is required.";
const INVALID_VALUE: &str = "Enter a valid value.";
const INVALID_BOOLEAN: &str = "Enter a valid boolean.";

/// Text fields of the form, in display order.
const TEXT_FIELDS: [&str; 5] = ["url", "name", "group", "client_id", "client_secret"];

/// Raw installation form as submitted by the user.
///
/// Every field is optional here so that missing fields can be reported
/// together instead of failing on the first one during deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallationForm {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub verify_ssl: Option<bool>,
}

/// Validated connection parameters for one installation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationData {
    /// Host of the GitLab instance, with the port only when non-default.
    pub url: String,
    /// Name of the OAuth application registered in GitLab.
    pub name: String,
    /// Group path (or numeric id) to link.
    pub group: String,
    pub client_id: String,
    pub client_secret: String,
    pub verify_ssl: bool,
}

impl InstallationData {
    /// Canonical base URL of the instance.
    pub fn base_url(&self) -> String {
        format!("https://{}", self.url)
    }
}

impl fmt::Debug for InstallationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationData")
            .field("url", &self.url)
            .field("name", &self.name)
            .field("group", &self.group)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

/// A single invalid form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// All invalid fields of a rejected form, in form order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    /// Returns true if the given field was rejected.
    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    fn message(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl InstallationForm {
    /// Validates the form and normalizes the instance URL to its host.
    pub fn validate(&self) -> std::result::Result<InstallationData, ValidationErrors> {
        self.validate_with(&ValidationErrors::default())
    }

    /// Validates the form, reporting fields already rejected while decoding
    /// in their place among the other errors.
    fn validate_with(
        &self,
        rejected: &ValidationErrors,
    ) -> std::result::Result<InstallationData, ValidationErrors> {
        if rejected.contains("form") {
            return Err(rejected.clone());
        }

        let mut errors = ValidationErrors::default();

        let url = required(&mut errors, rejected, "url", &self.url).and_then(|raw| {
            match extract_host(&raw) {
                Ok(host) => Some(host),
                Err(message) => {
                    errors.push("url", message);
                    None
                }
            }
        });
        let name = required(&mut errors, rejected, "name", &self.name);
        let group = required(&mut errors, rejected, "group", &self.group);
        let client_id = required(&mut errors, rejected, "client_id", &self.client_id);
        let client_secret = required(&mut errors, rejected, "client_secret", &self.client_secret);
        if let Some(message) = rejected.message("verify_ssl") {
            errors.push("verify_ssl", message);
        }

        match (url, name, group, client_id, client_secret) {
            (Some(url), Some(name), Some(group), Some(client_id), Some(client_secret))
                if errors.is_empty() =>
            {
                Ok(InstallationData {
                    url,
                    name,
                    group: group.trim_matches('/').to_string(),
                    client_id,
                    client_secret,
                    verify_ssl: self.verify_ssl.unwrap_or(true),
                })
            }
            _ => Err(errors),
        }
    }
}

/// An installation form decoded from a request body.
///
/// Decoding never fails outright: values of the wrong type are remembered
/// and reported by [`Submission::validate`] together with the fields that
/// are missing.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub form: InstallationForm,
    rejected: ValidationErrors,
}

impl Submission {
    /// Decodes a JSON body. Text fields accept strings and numbers,
    /// `verify_ssl` accepts booleans and the usual checkbox strings, and
    /// `null` counts as absent.
    pub fn from_json(body: &Value) -> Self {
        let mut submission = Self::default();

        let Some(object) = body.as_object() else {
            submission.rejected.push("form", "Expected a JSON object.");
            return submission;
        };

        for field in TEXT_FIELDS {
            let text = match object.get(field) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(_) => {
                    submission.rejected.push(field, INVALID_VALUE);
                    continue;
                }
            };
            submission.set_text(field, text);
        }

        submission.form.verify_ssl = match object.get("verify_ssl") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) => submission.flag(s),
            Some(Value::Number(n)) => submission.flag(&n.to_string()),
            Some(_) => {
                submission.rejected.push("verify_ssl", INVALID_BOOLEAN);
                None
            }
        };

        submission
    }

    /// Decodes an `application/x-www-form-urlencoded` body.
    ///
    /// An unchecked checkbox is not sent at all, so a missing `verify_ssl`
    /// means false here.
    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut submission = Self::default();
        let mut verify_ssl = None;

        for (key, value) in url::form_urlencoded::parse(body) {
            if key == "verify_ssl" {
                verify_ssl = Some(value.into_owned());
            } else if let Some(field) = TEXT_FIELDS.iter().find(|f| **f == key) {
                submission.set_text(field, value.into_owned());
            }
        }

        submission.form.verify_ssl = match verify_ssl {
            Some(raw) => submission.flag(&raw),
            None => Some(false),
        };

        submission
    }

    /// Validates the decoded form; see [`InstallationForm::validate`].
    pub fn validate(&self) -> std::result::Result<InstallationData, ValidationErrors> {
        self.form.validate_with(&self.rejected)
    }

    fn set_text(&mut self, field: &str, value: String) {
        let slot = match field {
            "url" => &mut self.form.url,
            "name" => &mut self.form.name,
            "group" => &mut self.form.group,
            "client_id" => &mut self.form.client_id,
            "client_secret" => &mut self.form.client_secret,
            _ => return,
        };
        *slot = Some(value);
    }

    fn flag(&mut self, raw: &str) -> Option<bool> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" | "yes" => Some(true),
            "off" | "false" | "0" | "no" | "" => Some(false),
            _ => {
                self.rejected.push("verify_ssl", INVALID_BOOLEAN);
                None
            }
        }
    }
}

impl From<InstallationForm> for Submission {
    fn from(form: InstallationForm) -> Self {
        Self {
            form,
            rejected: ValidationErrors::default(),
        }
    }
}

fn required(
    errors: &mut ValidationErrors,
    rejected: &ValidationErrors,
    field: &'static str,
    value: &Option<String>,
) -> Option<String> {
    if let Some(message) = rejected.message(field) {
        errors.push(field, message);
        return None;
    }

    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            errors.push(field, REQUIRED);
            None
        }
    }
}

/// Extracts the host (and explicit non-default port) from an absolute URL.
fn extract_host(raw: &str) -> std::result::Result<String, String> {
    let url = Url::parse(raw).map_err(|e| format!("Enter a valid absolute URL ({}).", e))?;

    if !url.username().is_empty() || url.password().is_some() {
        return Err("URL must not contain username or password.".to_string());
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "URL must include a host.".to_string())?;

    let host = host.trim_end_matches('.').to_lowercase();

    // All GitLab calls go over https, so 443 is the default whatever the scheme
    Ok(match url.port().filter(|port| *port != 443) {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}
