//! Settings for the Setu HTTP client.
//!
//! This crate provides the serde types for `setu.yaml` files and the
//! environment overrides that feed process-wide request defaults.

pub mod types;
pub mod loader;
pub mod env;

pub use types::*;
pub use loader::*;
pub use env::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_have_sensible_values() {
        let settings = SetuSettings::default();

        assert!(settings.base_url.is_none());
        assert_eq!(settings.timeout_ms, 0);
        assert_eq!(settings.retries, 0);
        assert_eq!(settings.retry_delay_ms, 0);
        assert_eq!(settings.retry_counting, RetryCountingSetting::Additional);
        assert_eq!(settings.response_type, "json");
        assert_eq!(settings.max_redirects, 20);
        assert!(settings.headers.is_empty());
        assert_eq!(settings.adapter, AdapterSetting::Auto);
    }

    #[test]
    fn test_settings_serialize_to_yaml() {
        let settings = SetuSettings::default();
        let yaml = serde_yaml::to_string(&settings).unwrap();

        assert!(yaml.contains("timeout_ms: 0"));
        assert!(yaml.contains("response_type: json"));
        assert!(yaml.contains("retry_counting: additional"));
        assert!(yaml.contains("adapter: auto"));
    }

    #[test]
    fn test_partial_settings_merge_with_defaults() {
        let partial_yaml = r#"
timeout_ms: 5000
retries: 3
headers:
  Authorization: Bearer token
"#;

        let settings: SetuSettings = serde_yaml::from_str(partial_yaml).unwrap();

        assert_eq!(settings.timeout_ms, 5000);
        assert_eq!(settings.retries, 3);
        assert_eq!(settings.headers.get("Authorization").unwrap(), "Bearer token");

        assert_eq!(settings.response_type, "json");
        assert_eq!(settings.max_redirects, 20);
    }

    #[test]
    fn test_adapter_setting_parses_snake_case() {
        let settings: SetuSettings = serde_yaml::from_str("adapter: socket").unwrap();
        assert_eq!(settings.adapter, AdapterSetting::Socket);

        let settings: SetuSettings = serde_yaml::from_str("adapter: fetch").unwrap();
        assert_eq!(settings.adapter, AdapterSetting::Fetch);

        let settings: SetuSettings = serde_yaml::from_str("retry_counting: total").unwrap();
        assert_eq!(settings.retry_counting, RetryCountingSetting::Total);
    }
}
