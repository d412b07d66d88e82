//! Settings types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default cap on followed redirects.
pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// Process-wide request defaults as read from `setu.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetuSettings {
    /// Base URL that relative request URLs resolve against.
    pub base_url: Option<String>,
    /// Per-attempt timeout in milliseconds (0 = none).
    pub timeout_ms: u64,
    /// Retry count for network and timeout failures.
    pub retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Whether `retries` counts additional or total attempts.
    pub retry_counting: RetryCountingSetting,
    /// One of `json`, `text`, `blob`, `stream`, `arrayBuffer`.
    ///
    /// Kept as a string so that an unknown value is reported when the
    /// settings are turned into request defaults.
    pub response_type: String,
    /// Maximum redirect hops followed per attempt.
    pub max_redirects: u32,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Transport selection.
    pub adapter: AdapterSetting,
}

impl Default for SetuSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 0,
            retries: 0,
            retry_delay_ms: 0,
            retry_counting: RetryCountingSetting::Additional,
            response_type: "json".to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            headers: BTreeMap::new(),
            adapter: AdapterSetting::Auto,
        }
    }
}

/// How the `retries` count is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCountingSetting {
    /// `retries` attempts after the first one.
    #[default]
    Additional,
    /// `retries` attempts in total.
    Total,
}

/// Which transport carries requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterSetting {
    /// Detect from the compile target.
    #[default]
    Auto,
    /// Fetch-style transport.
    Fetch,
    /// Socket-level transport.
    Socket,
}
