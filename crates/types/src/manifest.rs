//! Strongly typed integration manifest shared across the engine and the command-line host.
//!
//! A manifest is authored as JSON (or YAML converted to JSON) and describes how one third-party
//! integration provisions, probes, and revokes accounts. Documents are checked structurally in
//! [`validation`] before they are deserialized, so every problem is reported together with its
//! JSON path instead of failing on the first unknown operator. Maps preserve authoring order (via
//! `IndexMap`) because `store_data` entries and headers are applied in the order they were written.

pub mod validation;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::http::HttpMethod;

/// Fully parsed integration manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Per-actor questions asked before provisioning.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub form: Vec<FormField>,
    /// Probe used to check whether the actor already has an account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<ExistsSpec>,
    /// Ordered provisioning steps.
    #[serde(default)]
    pub execute: Vec<StepSpec>,
    /// Ordered steps that remove the actor's account.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revoke: Vec<StepSpec>,
    /// Directives sent once every execute step succeeded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_execute_notification: Vec<NotificationSpec>,
    /// Values collected from the administrator when the integration is configured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial_data_form: Vec<InitialDataField>,
    /// Actor-level fields the integration needs before it can run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_user_info: Vec<ExtraUserInfoField>,
    /// Default headers applied to steps that declare none of their own.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    /// OAuth authorization and refresh configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OauthSpec>,
    /// Cron expression for user synchronisation integrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Response path holding the user list for synchronisation integrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_from: Option<String>,
    /// Mapping from actor field to response path for synchronisation integrations.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data_structure: IndexMap<String, String>,
}

impl Manifest {
    /// Parse and validate a manifest from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ManifestError> {
        let document: JsonValue = serde_json::from_str(text)?;
        Self::from_value(document)
    }

    /// Validate a JSON document and convert it into a typed manifest.
    pub fn from_value(document: JsonValue) -> Result<Self, ManifestError> {
        let issues = validation::validate_document(&document);
        if !issues.is_empty() {
            return Err(ManifestError::Invalid { issues });
        }
        Ok(serde_json::from_value(document)?)
    }

    /// True when the manifest declares an OAuth section.
    pub fn has_oauth(&self) -> bool {
        self.oauth.is_some()
    }

    /// Identifiers of the `initial_data_form` entries that mint a random secret per run.
    pub fn generated_secret_ids(&self) -> impl Iterator<Item = &str> {
        self.initial_data_form
            .iter()
            .filter(|field| field.generates_secret())
            .map(|field| field.id.as_str())
    }
}

/// One outbound HTTP request described by the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSpec {
    /// Target URL template.
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Request payload; serialized to JSON text and rendered before sending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    /// Step-level headers. When empty the manifest defaults apply.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    /// Multipart attachments: body field name to saved file key.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub files: IndexMap<String, String>,
    /// Parse the rendered body as JSON and send it form-encoded.
    #[serde(default)]
    pub cast_data_to_json: bool,
    #[serde(default = "default_fail_when_4xx")]
    pub fail_when_4xx_response_code: bool,
    /// Conditions that must hold for the step to run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub precondition: Vec<Condition>,
    /// Gate evaluated against the step's response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_if: Option<ResponseCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling: Option<PollingSpec>,
    /// Actor field name to response notation, applied in authoring order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub store_data: IndexMap<String, String>,
    /// Buffer the raw response body under this key for later attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as_file: Option<String>,
}

impl StepSpec {
    /// Build a step with defaults for everything except the URL and method.
    pub fn new(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: url.into(),
            method,
            data: None,
            headers: IndexMap::new(),
            files: IndexMap::new(),
            cast_data_to_json: false,
            fail_when_4xx_response_code: true,
            precondition: Vec::new(),
            continue_if: None,
            polling: None,
            store_data: IndexMap::new(),
            save_as_file: None,
        }
    }
}

fn default_fail_when_4xx() -> bool {
    true
}

/// Existence probe: a step plus the text expected somewhere in its response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExistsSpec {
    #[serde(flatten)]
    pub step: StepSpec,
    pub expected: String,
}

/// OAuth configuration for integrations that authenticate with bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OauthSpec {
    /// URL the administrator is sent to in order to grant access.
    pub authenticate_url: String,
    /// Step exchanging the authorization code for tokens.
    pub access_token: StepSpec,
    /// Step refreshing an expired access token.
    pub refresh: StepSpec,
    /// Skip appending the authorization code to the access token URL.
    #[serde(default)]
    pub without_code: bool,
}

/// Fixed-interval polling budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PollingSpec {
    /// Seconds to wait between attempts.
    pub interval: f64,
    /// Total number of attempts, including the initial request.
    pub amount: u32,
}

/// `continue_if` gate comparing a rendered value with a value read from the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseCondition {
    pub response_notation: String,
    pub value: JsonValue,
}

/// Single comparison inside a precondition list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    #[serde(rename = "A")]
    pub left: JsonValue,
    #[serde(rename = "B")]
    pub right: JsonValue,
    #[serde(rename = "A_to_B")]
    pub comparison: ComparisonOperator,
    /// Joins this comparison's result with the one that follows it.
    #[serde(default)]
    pub logic_with_after: LogicOperator,
}

/// Comparison operators accepted in `A_to_B`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl ComparisonOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterThanOrEqual => ">=",
            ComparisonOperator::LessThanOrEqual => "<=",
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "equal" | "==" | "=" => Ok(ComparisonOperator::Equal),
            "not equal" | "!=" => Ok(ComparisonOperator::NotEqual),
            "greater than" | ">" => Ok(ComparisonOperator::GreaterThan),
            "less than" | "<" => Ok(ComparisonOperator::LessThan),
            "greater than or equal to" | ">=" => Ok(ComparisonOperator::GreaterThanOrEqual),
            "less than or equal to" | "<=" => Ok(ComparisonOperator::LessThanOrEqual),
            _ => Err(format!(
                "unknown comparison '{}' (expected equal, not equal, greater than, less than, greater than or equal to, less than or equal to)",
                raw
            )),
        }
    }
}

impl TryFrom<String> for ComparisonOperator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ComparisonOperator> for String {
    fn from(value: ComparisonOperator) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean connective used by `logic_with_after`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum LogicOperator {
    #[default]
    And,
    Or,
}

impl LogicOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicOperator::And => "and",
            LogicOperator::Or => "or",
        }
    }

    /// Combine two results.
    pub fn apply(self, left: bool, right: bool) -> bool {
        match self {
            LogicOperator::And => left && right,
            LogicOperator::Or => left || right,
        }
    }
}

impl FromStr for LogicOperator {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "and" | "&&" => Ok(LogicOperator::And),
            "or" | "||" => Ok(LogicOperator::Or),
            _ => Err(format!("unknown logical operator '{}' (expected and, &&, or, ||)", raw)),
        }
    }
}

impl TryFrom<String> for LogicOperator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogicOperator> for String {
    fn from(value: LogicOperator) -> Self {
        value.as_str().to_string()
    }
}

/// Post-execution notification directive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationSpec {
    Email {
        to: String,
        subject: String,
        message: String,
    },
    /// Text message sent to the actor's phone number.
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        message: String,
    },
}

/// Administrator-supplied configuration value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitialDataField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl InitialDataField {
    /// Entries named (or typed) `generate` receive a fresh random secret on every run.
    pub fn generates_secret(&self) -> bool {
        self.name == "generate" || self.kind.as_deref() == Some("generate")
    }
}

/// Question rendered before provisioning an actor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Presentation details (`items`, `data_from`, `choice_value`, `choice_name`).
    #[serde(flatten)]
    pub extra: IndexMap<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtraUserInfoField {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A single manifest problem located by its JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestIssue {
    pub path: String,
    pub message: String,
}

impl ManifestIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ManifestIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors raised while loading a manifest. Never retried.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest could not be decoded: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("manifest is invalid: {}", join_issues(.issues))]
    Invalid { issues: Vec<ManifestIssue> },
}

impl ManifestError {
    pub fn invalid(issues: Vec<ManifestIssue>) -> Self {
        ManifestError::Invalid { issues }
    }

    /// Issues carried by an `Invalid` error; empty for decoding failures.
    pub fn issues(&self) -> &[ManifestIssue] {
        match self {
            ManifestError::Invalid { issues } => issues,
            ManifestError::Malformed(_) => &[],
        }
    }
}

fn join_issues(issues: &[ManifestIssue]) -> String {
    issues.iter().map(ManifestIssue::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook_manifest() -> JsonValue {
        json!({
            "exists": {
                "url": "https://example.com/api/users/{{email}}",
                "method": "GET",
                "expected": "{{email}}"
            },
            "execute": [
                {
                    "url": "https://example.com/api/users",
                    "data": {"email": "{{email}}"},
                    "store_data": {"remote_id": "id", "remote_name": "profile.name"},
                    "precondition": [
                        {"A": "{{TEAM}}", "B": "sales", "A_to_B": " Not Equal ", "logic_with_after": "||"},
                        {"A": 1, "B": 2, "A_to_B": "<"}
                    ]
                }
            ],
            "post_execute_notification": [
                {"type": "email", "to": "{{email}}", "subject": "Welcome", "message": "Hi {{first_name}}"},
                {"type": "text", "message": "Account ready"}
            ],
            "initial_data_form": [
                {"id": "TOKEN", "name": "API token"},
                {"id": "PASSWORD", "name": "generate", "description": "Will be generated"}
            ],
            "headers": {"Authorization": "Bearer {{TOKEN}}"}
        })
    }

    #[test]
    fn parses_webhook_manifest_with_defaults() {
        let manifest = Manifest::from_value(webhook_manifest()).expect("manifest parses");

        let step = &manifest.execute[0];
        assert_eq!(step.method, HttpMethod::Post);
        assert!(step.fail_when_4xx_response_code);
        assert!(!step.cast_data_to_json);
        assert_eq!(step.precondition[0].comparison, ComparisonOperator::NotEqual);
        assert_eq!(step.precondition[0].logic_with_after, LogicOperator::Or);
        assert_eq!(step.precondition[1].logic_with_after, LogicOperator::And);

        let store_keys: Vec<&str> = step.store_data.keys().map(String::as_str).collect();
        assert_eq!(store_keys, vec!["remote_id", "remote_name"]);

        let exists = manifest.exists.as_ref().expect("exists probe");
        assert_eq!(exists.step.method, HttpMethod::Get);
        assert_eq!(exists.expected, "{{email}}");

        assert!(matches!(
            manifest.post_execute_notification[1],
            NotificationSpec::Text { to: None, .. }
        ));
        assert_eq!(manifest.generated_secret_ids().collect::<Vec<_>>(), vec!["PASSWORD"]);
    }

    #[test]
    fn operators_are_case_and_whitespace_insensitive() {
        assert_eq!(
            " GREATER THAN OR EQUAL TO ".parse::<ComparisonOperator>(),
            Ok(ComparisonOperator::GreaterThanOrEqual)
        );
        assert_eq!("=".parse::<ComparisonOperator>(), Ok(ComparisonOperator::Equal));
        assert_eq!("&&".parse::<LogicOperator>(), Ok(LogicOperator::And));
        assert!("xor".parse::<LogicOperator>().is_err());
    }

    #[test]
    fn reports_every_problem_with_its_path() {
        let document = json!({
            "execute": [
                {
                    "url": "https://example.com",
                    "method": "TRACE",
                    "precondition": [{"A": 1, "B": 2, "A_to_B": "about"}],
                    "polling": {"interval": 1, "amount": 0},
                    "continue_if": {"response_notation": "status", "value": "done"}
                }
            ],
            "post_execute_notification": [{"type": "pigeon", "message": "hi"}]
        });

        let error = Manifest::from_value(document).expect_err("invalid manifest");
        let paths: Vec<&str> = error.issues().iter().map(|issue| issue.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "execute[0].method",
                "execute[0].precondition[0].A_to_B",
                "execute[0].polling.amount",
                "post_execute_notification[0].type",
            ]
        );
        assert!(error.to_string().starts_with("manifest is invalid: execute[0].method"));
    }

    #[test]
    fn rejects_text_that_is_not_json() {
        let error = Manifest::from_json_str("{not json").expect_err("malformed");
        assert!(matches!(error, ManifestError::Malformed(_)));
    }

    #[test]
    fn yaml_documents_convert_to_the_same_manifest() {
        let yaml = r#"
execute:
  - url: "https://example.com/users"
    method: put
    cast_data_to_json: true
    polling:
      interval: 0.5
      amount: 3
    continue_if:
      response_notation: state
      value: ready
"#;
        let document: JsonValue = serde_yaml::from_str(yaml).expect("yaml parses");
        let manifest = Manifest::from_value(document).expect("manifest parses");
        let step = &manifest.execute[0];
        assert_eq!(step.method, HttpMethod::Put);
        assert_eq!(step.polling, Some(PollingSpec { interval: 0.5, amount: 3 }));
        assert!(step.cast_data_to_json);
    }
}
