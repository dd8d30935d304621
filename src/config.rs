use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AppError, AppResult};

const DEFAULT_BACKEND_URI: &str = "http://localhost:3000";
const DEFAULT_LEDGER_PATH: &str = ".chat-ledger.json";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_PAGE_SIZE: usize = 30;

/// Runtime configuration, read from the environment (and `.env` when the
/// binary loads one).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_uri: String,
    pub ledger_path: PathBuf,
    pub session_cookie: Option<String>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_uri: DEFAULT_BACKEND_URI.to_string(),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            session_cookie: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let defaults = Self::default();

        let backend_uri = lookup("CHAT_BACKEND_URI")
            .map(|uri| uri.trim_end_matches('/').to_string())
            .unwrap_or(defaults.backend_uri);
        let ledger_path = lookup("CHAT_LEDGER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.ledger_path);
        let session_cookie = lookup("CHAT_SESSION_COOKIE").filter(|c| !c.is_empty());

        let max_retries = parse_or(&lookup, "CHAT_STREAM_MAX_RETRIES", defaults.max_retries)?;
        let retry_delay_ms = parse_or(&lookup, "CHAT_STREAM_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?;
        let page_size = parse_or(&lookup, "CHAT_PAGE_SIZE", defaults.page_size)?;

        Ok(Self {
            backend_uri,
            ledger_path,
            session_cookie,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            page_size,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> AppResult<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value '{raw}'"))),
        None => Ok(default),
    }
}
