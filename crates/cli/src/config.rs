//! CLI configuration: engine settings plus the directory holding integration records.

use std::path::PathBuf;

use anyhow::{Context, Result};
use provisio_engine::EngineSettings;
use provisio_util::{config_file_path, expand_tilde};

pub const CONFIG_PATH_ENV: &str = "PROVISIO_CONFIG_PATH";
pub const DATA_DIR_ENV: &str = "PROVISIO_DATA_DIR";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub settings: EngineSettings,
    /// Root of the file-backed store, retry queue and outboxes.
    pub data_dir: PathBuf,
}

impl CliConfig {
    /// Resolve settings from `PROVISIO_CONFIG_PATH` (or the platform config dir) and the data
    /// directory from `data_dir`, `PROVISIO_DATA_DIR`, or `<config dir>/provisio/data`.
    pub fn load(data_dir: Option<&str>) -> Result<Self> {
        let settings_path = config_file_path(CONFIG_PATH_ENV, "config.json");
        let settings = EngineSettings::load(&settings_path)
            .with_context(|| format!("could not load settings from {}", settings_path.display()))?;
        let data_dir = match data_dir {
            Some(path) => expand_tilde(path),
            None => config_file_path(DATA_DIR_ENV, "data"),
        };
        Ok(Self { settings, data_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_data_dir_wins_over_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"retry_delay": 30}"#).expect("write");

        temp_env::with_vars(
            [
                (CONFIG_PATH_ENV, Some(config_path.to_str().expect("utf-8 path"))),
                (DATA_DIR_ENV, Some("/srv/provisio")),
            ],
            || {
                let config = CliConfig::load(Some("/tmp/provisio-data")).expect("config");
                assert_eq!(config.data_dir, PathBuf::from("/tmp/provisio-data"));
                assert_eq!(config.settings.retry_delay, std::time::Duration::from_secs(30));

                let from_env = CliConfig::load(None).expect("config");
                assert_eq!(from_env.data_dir, PathBuf::from("/srv/provisio"));
            },
        );
    }

    #[test]
    fn invalid_settings_file_is_reported_with_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{not json").expect("write");

        temp_env::with_var(CONFIG_PATH_ENV, Some(config_path.to_str().expect("utf-8 path")), || {
            let error = CliConfig::load(None).expect_err("invalid settings");
            assert!(format!("{error:#}").contains("config.json"));
        });
    }
}
