use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backup: BackupSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    #[serde(default = "default_types")]
    pub types: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            types: default_types(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_types() -> Vec<String> {
    vec![
        "im".to_string(),
        "mpim".to_string(),
        "private_channel".to_string(),
    ]
}

fn default_concurrency() -> usize {
    4
}

impl Settings {
    pub fn load() -> Result<Self> {
        let path = Path::new(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| BackupError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| BackupError::TomlParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_file_constant() {
        assert_eq!(SETTINGS_FILE, "settings.toml");
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();

        assert_eq!(settings.backup.types, vec!["im", "mpim", "private_channel"]);
        assert_eq!(settings.backup.concurrency, 4);
    }

    #[test]
    fn test_settings_deserialization() {
        let toml_content = r#"
[backup]
types = ["public_channel", "im"]
concurrency = 8
"#;

        let settings: Settings = toml::from_str(toml_content).unwrap();

        assert_eq!(settings.backup.types, vec!["public_channel", "im"]);
        assert_eq!(settings.backup.concurrency, 8);
    }

    #[test]
    fn test_settings_deserialization_empty_uses_defaults() {
        let settings: Settings = toml::from_str("").unwrap();

        assert_eq!(settings.backup.types, vec!["im", "mpim", "private_channel"]);
        assert_eq!(settings.backup.concurrency, 4);
    }

    #[test]
    fn test_settings_deserialization_partial() {
        let toml_content = r#"
[backup]
concurrency = 2
"#;

        let settings: Settings = toml::from_str(toml_content).unwrap();

        assert_eq!(settings.backup.concurrency, 2);
        assert_eq!(settings.backup.types, vec!["im", "mpim", "private_channel"]);
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = Settings {
            backup: BackupSettings {
                types: vec!["public_channel".to_string()],
                concurrency: 16,
            },
        };

        let toml = toml::to_string(&settings).unwrap();
        let deserialized: Settings = toml::from_str(&toml).unwrap();

        assert_eq!(deserialized.backup.types, settings.backup.types);
        assert_eq!(deserialized.backup.concurrency, settings.backup.concurrency);
    }
}
