use std::{path::PathBuf, time::Duration};

use tracing::warn;

use crate::{
    error::ApiError,
    opensubtitles::{DEFAULT_BASE_URL, DEFAULT_LANGUAGES, DEFAULT_USER_AGENT},
    relay::{ErrorPageMatcher, MAX_REDIRECTS, RelayOptions},
};

const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub api_key: String,
    pub base_url: String,
    pub user_agent: String,
    pub default_languages: String,
    pub upstream_timeout: Duration,
    pub use_system_proxy: bool,
    pub error_page_markers: Vec<String>,
    pub max_upload_bytes: u64,
    pub upload_dir: PathBuf,
}

impl Config {
    /// Settings with defaults for everything but the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_languages: DEFAULT_LANGUAGES.to_string(),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECONDS),
            use_system_proxy: true,
            error_page_markers: ErrorPageMatcher::default_markers(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_dir: std::env::temp_dir().join("subtitle-relay-uploads"),
        }
    }

    pub fn from_env() -> Result<Self, ApiError> {
        let api_key = read_string_env("OPENSUBTITLES_API_KEY").ok_or_else(|| {
            ApiError::internal("OPENSUBTITLES_API_KEY is not set. Export the OpenSubtitles API key.")
        })?;

        let mut config = Self::new(api_key);
        config.bind_addr = resolve_bind_addr();

        if let Some(base_url) = read_string_env("OPENSUBTITLES_BASE_URL") {
            url::Url::parse(&base_url).map_err(|error| {
                ApiError::internal(format!("Invalid OPENSUBTITLES_BASE_URL {base_url}: {error}"))
            })?;
            config.base_url = base_url;
        }
        if let Some(user_agent) = read_string_env("OPENSUBTITLES_USER_AGENT") {
            config.user_agent = user_agent;
        }
        if let Some(languages) = read_string_env("DEFAULT_LANGUAGES") {
            config.default_languages = languages;
        }
        if let Some(seconds) = read_u64_env("UPSTREAM_TIMEOUT_SECONDS").filter(|value| *value > 0) {
            config.upstream_timeout = Duration::from_secs(seconds);
        }
        if let Some(use_system_proxy) = read_bool_env("UPSTREAM_SYSTEM_PROXY") {
            config.use_system_proxy = use_system_proxy;
        }
        if let Some(markers) = read_string_env("ERROR_PAGE_MARKERS") {
            config.error_page_markers = split_list(&markers);
        }
        if let Some(limit) = read_u64_env("MAX_UPLOAD_BYTES").filter(|value| *value > 0) {
            config.max_upload_bytes = limit;
        }
        if let Some(dir) = read_string_env("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }

        if config.error_page_markers.is_empty() {
            warn!("ERROR_PAGE_MARKERS is empty: redirects to error pages will be followed.");
        }

        Ok(config)
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            timeout: self.upstream_timeout,
            error_pages: ErrorPageMatcher::new(self.error_page_markers.iter().cloned()),
            max_redirects: MAX_REDIRECTS,
            use_system_proxy: self.use_system_proxy,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn read_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    parse_bool(&value)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_string_env("APP_ADDR") {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
