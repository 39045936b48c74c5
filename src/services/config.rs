//! Configuration loading for the chat client.
//!
//! Everything comes from `.env`/environment; there are no secrets on the
//! client side because the endpoint is a proxy that owns the provider key.

use std::path::PathBuf;
use std::time::Duration;

use crate::services::chat::Locale;
use crate::services::retry::RetryPolicy;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/chat";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STORAGE_QUOTA_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_NOTICE_TIMEOUT_MS: u64 = 5_000;

const SAVEDATA_DIR_NAME: &str = "savedata";

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub locale: Locale,
    pub data_dir: Option<PathBuf>,
    pub storage_quota_bytes: u64,
    pub probe_interval: Duration,
    /// `None` keeps error notices up until replaced or dismissed.
    pub notice_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            locale: Locale::default(),
            data_dir: None,
            storage_quota_bytes: DEFAULT_STORAGE_QUOTA_BYTES,
            probe_interval: Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS),
            notice_timeout: Some(Duration::from_millis(DEFAULT_NOTICE_TIMEOUT_MS)),
            retry: RetryPolicy::new(3, Duration::from_millis(500), true),
        }
    }
}

impl ChatConfig {
    /// Resolve and create the session storage directory.
    ///
    /// `CHAT_DATA_DIR` wins; otherwise `<exe_dir>/savedata`.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, String> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|p| p.join(SAVEDATA_DIR_NAME)))
                .ok_or_else(|| "Failed to resolve executable directory".to_string())?,
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("Failed to create data directory: {e}"))?;
        Ok(dir)
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        return DEFAULT_ENDPOINT.to_string();
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    format!("http://{endpoint}")
}

fn parse_locale(raw: &str) -> Locale {
    match raw.trim().to_ascii_lowercase().as_str() {
        "ko" | "ko-kr" | "ko_kr" | "korean" => Locale::Ko,
        _ => Locale::En,
    }
}

/// Load client configuration from `.env`/environment.
///
/// Reads:
/// - `CHAT_ENDPOINT`
/// - `CHAT_CONNECT_TIMEOUT_MS`
/// - `CHAT_LOCALE` (`en` | `ko`)
/// - `CHAT_DATA_DIR`
/// - `CHAT_STORAGE_QUOTA_BYTES`
/// - `CHAT_PROBE_INTERVAL_MS`
/// - `CHAT_NOTICE_TIMEOUT_MS` (`0` disables auto-dismiss)
/// - `CHAT_RETRY_MAX_ATTEMPTS`, `CHAT_RETRY_DELAY_MS`, `CHAT_RETRY_BACKOFF`
pub fn load_chat_config() -> ChatConfig {
    let _ = dotenvy::dotenv();

    let endpoint = std::env::var("CHAT_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
    let data_dir = std::env::var("CHAT_DATA_DIR")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);

    ChatConfig {
        endpoint: normalize_endpoint(&endpoint),
        connect_timeout: Duration::from_millis(
            env_u64("CHAT_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS).clamp(1_000, 300_000),
        ),
        locale: parse_locale(&std::env::var("CHAT_LOCALE").unwrap_or_default()),
        data_dir,
        storage_quota_bytes: env_u64("CHAT_STORAGE_QUOTA_BYTES", DEFAULT_STORAGE_QUOTA_BYTES)
            .max(1024),
        probe_interval: Duration::from_millis(
            env_u64("CHAT_PROBE_INTERVAL_MS", DEFAULT_PROBE_INTERVAL_MS).clamp(250, 600_000),
        ),
        notice_timeout: notice_timeout(env_u64("CHAT_NOTICE_TIMEOUT_MS", DEFAULT_NOTICE_TIMEOUT_MS)),
        retry: RetryPolicy::from_env(),
    }
}

fn notice_timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms.min(600_000)))
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .and_then(|v| match v.as_str() {
            "1" | "true" | "yes" | "y" | "on" => Some(true),
            "0" | "false" | "no" | "n" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("http://localhost:3000/api/chat/"),
            "http://localhost:3000/api/chat"
        );
        assert_eq!(
            normalize_endpoint("chat.example.com/api/chat"),
            "http://chat.example.com/api/chat"
        );
        assert_eq!(normalize_endpoint("   "), DEFAULT_ENDPOINT);
        assert_eq!(
            normalize_endpoint("https://chat.example.com/api/chat"),
            "https://chat.example.com/api/chat"
        );
    }

    #[test]
    fn test_parse_locale() {
        assert_eq!(parse_locale("ko"), Locale::Ko);
        assert_eq!(parse_locale(" KO-KR "), Locale::Ko);
        assert_eq!(parse_locale("en"), Locale::En);
        assert_eq!(parse_locale(""), Locale::En);
        assert_eq!(parse_locale("fr"), Locale::En);
    }

    #[test]
    fn test_default_config_uses_backoff() {
        let config = ChatConfig::default();
        assert!(config.retry.backoff);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.storage_quota_bytes, 5 * 1024 * 1024);
        assert_eq!(config.notice_timeout, Some(Duration::from_millis(5_000)));
    }

    #[test]
    fn test_notice_timeout_zero_disables() {
        assert_eq!(notice_timeout(0), None);
        assert_eq!(notice_timeout(1_500), Some(Duration::from_millis(1_500)));
        assert_eq!(notice_timeout(u64::MAX), Some(Duration::from_millis(600_000)));
    }
}
