use crate::api::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Tuning for list views: debounce window and throttle gate limits.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ListTuning {
    pub search_debounce_ms: u64,
    pub throttle_interval_ms: u64,
    pub throttle_max_attempts: u32,
}

impl Default for ListTuning {
    fn default() -> Self {
        Self {
            search_debounce_ms: 300,
            throttle_interval_ms: 500,
            throttle_max_attempts: 100,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct EnvConfig {
    pub api_url: String,
    pub log_level: String,
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub list: ListTuning,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            log_level: "info".to_string(),
            request_timeout_ms: 15_000,
            retry: RetryPolicy::default(),
            list: ListTuning::default(),
        }
    }
}

impl EnvConfig {
    /// Reads overrides from the host environment on top of the defaults.
    pub fn new() -> Self {
        Self::from_lookup(lookup)
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(url) = get("API_URL").filter(|s| !s.trim().is_empty()) {
            cfg.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(level) = get("LOG_LEVEL").filter(|s| !s.trim().is_empty()) {
            cfg.log_level = level;
        }

        let num = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = num("REQUEST_TIMEOUT_MS") {
            cfg.request_timeout_ms = v;
        }
        if let Some(v) = num("MAX_RETRIES") {
            cfg.retry.max_retries = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = num("RATE_LIMIT_DELAY_MS") {
            cfg.retry.rate_limit_delay_ms = v;
        }
        if let Some(v) = num("UNAVAILABLE_DELAY_MS") {
            cfg.retry.unavailable_delay_ms = v;
        }
        if let Some(v) = num("NETWORK_RETRY_BASE_MS") {
            cfg.retry.network_base_delay_ms = v;
        }
        if let Some(v) = num("MAX_RETRY_DELAY_MS") {
            cfg.retry.max_delay_ms = v;
        }
        if let Some(v) = num("SEARCH_DEBOUNCE_MS") {
            cfg.list.search_debounce_ms = v;
        }
        if let Some(v) = num("THROTTLE_INTERVAL_MS") {
            cfg.list.throttle_interval_ms = v;
        }
        if let Some(v) = num("THROTTLE_MAX_ATTEMPTS") {
            cfg.list.throttle_max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }

        cfg
    }
}

// We support BOTH `window.ENV.API_URL` (documented style) and the lower-case
// `window.ENV.api_url` alias.
#[cfg(target_arch = "wasm32")]
fn lookup(key: &str) -> Option<String> {
    let window = web_sys::window()?;
    let env = window.get("ENV")?;
    if env.is_undefined() || !env.is_object() {
        return None;
    }

    for k in [key.to_string(), key.to_lowercase()] {
        if let Ok(v) = js_sys::Reflect::get(&env, &k.as_str().into()) {
            if let Some(s) = v.as_string() {
                return Some(s);
            }
            if let Some(n) = v.as_f64() {
                return Some(format!("{n}"));
            }
        }
    }
    None
}

#[cfg(not(target_arch = "wasm32"))]
fn lookup(key: &str) -> Option<String> {
    std::env::var(format!("RCKIK_{key}")).ok()
}
