//! Environment variable handling.

use crate::loader::ConfigError;
use crate::types::SetuSettings;
use std::env;
use std::str::FromStr;

/// Environment variable names.
pub mod vars {
    pub const SETU_BASE_URL: &str = "SETU_BASE_URL";
    pub const SETU_TIMEOUT_MS: &str = "SETU_TIMEOUT_MS";
    pub const SETU_RETRIES: &str = "SETU_RETRIES";
    pub const SETU_RETRY_DELAY_MS: &str = "SETU_RETRY_DELAY_MS";
    pub const SETU_RESPONSE_TYPE: &str = "SETU_RESPONSE_TYPE";
    pub const SETU_MAX_REDIRECTS: &str = "SETU_MAX_REDIRECTS";
}

/// Load `.env` and `.env.local` from the working directory, if present.
///
/// Later files override earlier ones; missing files are not an error.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env");
    let _ = dotenvy::from_filename(".env.local");
}

/// Apply `SETU_*` environment variables on top of `settings`.
pub fn apply_overrides(settings: &mut SetuSettings) -> Result<(), ConfigError> {
    if let Ok(base) = env::var(vars::SETU_BASE_URL) {
        settings.base_url = Some(base);
    }
    if let Some(timeout) = parse_var(vars::SETU_TIMEOUT_MS)? {
        settings.timeout_ms = timeout;
    }
    if let Some(retries) = parse_var(vars::SETU_RETRIES)? {
        settings.retries = retries;
    }
    if let Some(delay) = parse_var(vars::SETU_RETRY_DELAY_MS)? {
        settings.retry_delay_ms = delay;
    }
    if let Ok(kind) = env::var(vars::SETU_RESPONSE_TYPE) {
        settings.response_type = kind;
    }
    if let Some(max) = parse_var(vars::SETU_MAX_REDIRECTS)? {
        settings.max_redirects = max;
    }
    Ok(())
}

fn parse_var<T: FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidEnvValue {
            var: var.to_string(),
            message: format!("expected a non-negative integer, got {v:?}"),
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Overrides share process-wide environment state, so they run in one test.
    #[test]
    fn test_overrides_apply_and_reject_garbage() {
        env::set_var(vars::SETU_TIMEOUT_MS, "1500");
        env::set_var(vars::SETU_RETRIES, "4");
        env::set_var(vars::SETU_RESPONSE_TYPE, "text");
        env::set_var(vars::SETU_BASE_URL, "http://localhost:9000");

        let mut settings = SetuSettings::default();
        apply_overrides(&mut settings).unwrap();
        assert_eq!(settings.timeout_ms, 1500);
        assert_eq!(settings.retries, 4);
        assert_eq!(settings.response_type, "text");
        assert_eq!(settings.base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(settings.retry_delay_ms, 0);

        env::set_var(vars::SETU_RETRIES, "-1");
        let mut settings = SetuSettings::default();
        match apply_overrides(&mut settings).unwrap_err() {
            ConfigError::InvalidEnvValue { var, .. } => assert_eq!(var, vars::SETU_RETRIES),
            other => panic!("Expected InvalidEnvValue, got {other:?}"),
        }

        env::remove_var(vars::SETU_TIMEOUT_MS);
        env::remove_var(vars::SETU_RETRIES);
        env::remove_var(vars::SETU_RESPONSE_TYPE);
        env::remove_var(vars::SETU_BASE_URL);
    }

    #[test]
    fn test_load_dotenv_without_files() {
        load_dotenv();
    }
}
