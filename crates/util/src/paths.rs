use std::path::PathBuf;

use dirs_next::{config_dir, home_dir};

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(trimmed)
}

/// Resolve a file path from an environment override, falling back to
/// `<config dir>/provisio/<file_name>`.
pub fn config_file_path(env_var: &str, file_name: &str) -> PathBuf {
    if let Ok(path) = std::env::var(env_var) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("provisio")
        .join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_paths_untouched() {
        assert_eq!(expand_tilde(" /tmp/manifest.json "), PathBuf::from("/tmp/manifest.json"));
    }

    #[test]
    fn env_override_wins() {
        temp_env::with_var("PROVISIO_TEST_PATH", Some("/srv/provisio/settings.json"), || {
            assert_eq!(
                config_file_path("PROVISIO_TEST_PATH", "config.json"),
                PathBuf::from("/srv/provisio/settings.json")
            );
        });
    }

    #[test]
    fn falls_back_to_config_dir() {
        temp_env::with_var_unset("PROVISIO_TEST_PATH_UNSET", || {
            let path = config_file_path("PROVISIO_TEST_PATH_UNSET", "config.json");
            assert!(path.ends_with("provisio/config.json"));
        });
    }
}
