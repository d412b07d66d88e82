//! Settings file loading and parsing.

use crate::env::apply_overrides;
use crate::types::SetuSettings;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the settings directory.
pub const SETTINGS_FILE: &str = "setu.yaml";

/// Settings loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },

    #[error("invalid value for {var}: {message}")]
    InvalidEnvValue { var: String, message: String },
}

/// Settings loader.
pub struct SettingsLoader {
    base_path: PathBuf,
}

impl SettingsLoader {
    /// Create a loader for the given directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            base_path: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the settings file this loader reads.
    pub fn path(&self) -> PathBuf {
        self.base_path.join(SETTINGS_FILE)
    }

    /// Load `setu.yaml` and apply `SETU_*` environment overrides.
    pub fn load(&self) -> Result<SetuSettings, ConfigError> {
        let mut settings = self.load_file()?;
        apply_overrides(&mut settings)?;
        self.validate(&settings)?;
        Ok(settings)
    }

    /// Load `setu.yaml` only, without environment overrides.
    pub fn load_file(&self) -> Result<SetuSettings, ConfigError> {
        let path = self.path();

        if !path.exists() {
            return Ok(SetuSettings::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let expanded = self.expand_env_vars(&contents)?;

        let settings: SetuSettings =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        self.validate(&settings)?;
        Ok(settings)
    }

    /// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
    fn expand_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").map_err(|e| {
            ConfigError::ValidationError {
                message: e.to_string(),
            }
        })?;

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_name = &cap[1];
            let default = cap.get(2).map(|m| m.as_str());

            let value = match std::env::var(var_name) {
                Ok(v) => v,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        return Err(ConfigError::EnvVarNotFound {
                            var: var_name.to_string(),
                        })
                    }
                },
            };

            result = result.replace(full_match, &value);
        }

        Ok(result)
    }

    /// Validate settings values.
    fn validate(&self, settings: &SetuSettings) -> Result<(), ConfigError> {
        if let Some(base) = &settings.base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(ConfigError::ValidationError {
                    message: format!("base_url must be an absolute http(s) URL, got {base}"),
                });
            }
        }

        if settings.response_type.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "response_type must not be empty".to_string(),
            });
        }

        for name in settings.headers.keys() {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationError {
                    message: "header names must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Save settings to `setu.yaml`.
    pub fn save(&self, settings: &SetuSettings) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.base_path)?;

        let yaml = serde_yaml::to_string(settings).map_err(|e| ConfigError::ParseError {
            line: None,
            message: e.to_string(),
        })?;

        std::fs::write(self.path(), yaml)?;
        Ok(())
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_default())
    }
}
