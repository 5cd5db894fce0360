//! Engine-wide settings supplied by the host.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_GENERATED_SECRET_LENGTH: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Tunables for a run. Durations are stored in whole seconds on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Public address of the host, used to build OAuth redirect URLs.
    pub base_url: String,
    #[serde(with = "duration_seconds")]
    pub request_timeout: Duration,
    #[serde(with = "duration_seconds")]
    pub retry_delay: Duration,
    pub generated_secret_length: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            generated_secret_length: DEFAULT_GENERATED_SECRET_LENGTH,
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        let settings: EngineSettings = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        provisio_api::validate_base_url(&settings.base_url).map_err(|error| ConfigError::InvalidBaseUrl {
            url: settings.base_url.clone(),
            reason: error.to_string(),
        })?;
        Ok(settings)
    }

    /// OAuth callback address for an integration.
    pub fn redirect_url(&self, integration_id: u64) -> String {
        format!(
            "{}/integrations/oauth/{}/callback/",
            self.base_url.trim_end_matches('/'),
            integration_id
        )
    }
}

mod duration_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = EngineSettings::load(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn partial_file_overrides_named_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"base_url": "https://hr.example.com/", "retry_delay": 60}"#).expect("write");
        let settings = EngineSettings::load(&path).expect("load");
        assert_eq!(settings.retry_delay, Duration::from_secs(60));
        assert_eq!(settings.generated_secret_length, 10);
        assert_eq!(
            settings.redirect_url(7),
            "https://hr.example.com/integrations/oauth/7/callback/"
        );
    }

    #[test]
    fn plain_http_base_url_outside_localhost_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"base_url": "http://hr.example.com"}"#).expect("write");
        assert!(matches!(
            EngineSettings::load(&path),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }
}
