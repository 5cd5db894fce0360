//! Integration configuration, persisted credential state, and the actor being provisioned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::manifest::{Manifest, ManifestError};

/// What an integration is used for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ManifestType {
    /// Provision user accounts or trigger webhooks.
    #[default]
    Webhook,
    /// Import users from a third-party directory.
    SyncUsers,
    /// Accounts are created by hand; no manifest runs.
    ManualUserProvisioning,
}

/// Stored configuration of one integration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationConfig {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub manifest_type: ManifestType,
    #[serde(default)]
    pub manifest: Manifest,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Moment the current OAuth access token stops being valid.
    #[serde(default = "Utc::now")]
    pub expiring: DateTime<Utc>,
    /// Administrator-supplied values and the live OAuth payload under `oauth`.
    #[serde(default)]
    pub extra_args: Map<String, JsonValue>,
    #[serde(default)]
    pub enabled_oauth: bool,
}

impl IntegrationConfig {
    /// Parse a stored integration, validating its manifest structure.
    pub fn from_json_str(text: &str) -> Result<Self, ManifestError> {
        let mut document: JsonValue = serde_json::from_str(text)?;
        let manifest = match document.as_object_mut().and_then(|object| object.remove("manifest")) {
            Some(JsonValue::Null) | None => Manifest::default(),
            Some(raw) => Manifest::from_value(raw)?,
        };
        let mut config: IntegrationConfig = serde_json::from_value(document)?;
        config.manifest = manifest;
        Ok(config)
    }

    /// Manual integrations never run manifest steps.
    pub fn skip_user_provisioning(&self) -> bool {
        self.manifest_type == ManifestType::ManualUserProvisioning
    }

    /// Stored OAuth payload, when present.
    pub fn oauth_payload(&self) -> Option<&Map<String, JsonValue>> {
        self.extra_args.get("oauth").and_then(JsonValue::as_object)
    }

    pub fn credential_state(&self) -> CredentialState {
        CredentialState {
            token: self.token.clone(),
            refresh_token: self.refresh_token.clone(),
            expiring: self.expiring,
            extra_args: self.extra_args.clone(),
            enabled_oauth: self.enabled_oauth,
        }
    }

    pub fn apply_credentials(&mut self, state: CredentialState) {
        self.token = state.token;
        self.refresh_token = state.refresh_token;
        self.expiring = state.expiring;
        self.extra_args = state.extra_args;
        self.enabled_oauth = state.enabled_oauth;
    }
}

/// Mutable credential fields, persisted atomically after renewal or authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialState {
    pub token: String,
    pub refresh_token: String,
    pub expiring: DateTime<Utc>,
    pub extra_args: Map<String, JsonValue>,
    pub enabled_oauth: bool,
}

/// The person whose account is being provisioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Actor {
    pub id: u64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    /// Free-form fields filled by forms and `store_data`.
    #[serde(default)]
    pub extra_fields: Map<String, JsonValue>,
}

impl Actor {
    /// The actor's own attributes as template values.
    pub fn builtin_fields(&self) -> Map<String, JsonValue> {
        let mut values = Map::new();
        values.insert("id".into(), JsonValue::from(self.id));
        values.insert("first_name".into(), JsonValue::String(self.first_name.clone()));
        values.insert("last_name".into(), JsonValue::String(self.last_name.clone()));
        values.insert("full_name".into(), JsonValue::String(self.full_name()));
        values.insert("email".into(), JsonValue::String(self.email.clone()));
        values.insert(
            "phone".into(),
            JsonValue::String(self.phone.clone().unwrap_or_default()),
        );
        values.insert(
            "position".into(),
            JsonValue::String(self.position.clone().unwrap_or_default()),
        );
        values
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integration_loads_with_validated_manifest() {
        let text = json!({
            "id": 3,
            "name": "Asana",
            "manifest": {"execute": [{"url": "https://example.com", "method": "get"}]},
            "extra_args": {"TOKEN": "abc", "oauth": {"access_token": "x", "expires_in": 3600}}
        })
        .to_string();

        let config = IntegrationConfig::from_json_str(&text).expect("integration parses");
        assert_eq!(config.manifest_type, ManifestType::Webhook);
        assert_eq!(config.manifest.execute.len(), 1);
        assert_eq!(config.oauth_payload().and_then(|oauth| oauth.get("expires_in")), Some(&json!(3600)));
        assert!(!config.skip_user_provisioning());
    }

    #[test]
    fn manual_integration_without_manifest() {
        let text = json!({"id": 9, "manifest_type": "manual_user_provisioning", "manifest": null}).to_string();
        let config = IntegrationConfig::from_json_str(&text).expect("integration parses");
        assert!(config.skip_user_provisioning());
        assert!(config.manifest.execute.is_empty());
    }

    #[test]
    fn invalid_manifest_is_reported() {
        let text = json!({"id": 1, "manifest": {"execute": [{"method": "GET"}]}}).to_string();
        let error = IntegrationConfig::from_json_str(&text).expect_err("missing url");
        assert_eq!(error.issues()[0].path, "execute[0].url");
    }

    #[test]
    fn actor_builtins_include_full_name() {
        let actor = Actor {
            id: 4,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            ..Actor::default()
        };
        let fields = actor.builtin_fields();
        assert_eq!(fields["full_name"], "Ada Lovelace");
        assert_eq!(fields["phone"], "");
    }
}
