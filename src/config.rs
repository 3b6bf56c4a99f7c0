use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::assistant::engine::EngineConfig;
use crate::assistant::gemini::GEMINI_BASE_URL;
use crate::assistant::schedule::parse_push_time;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Unknown IANA timezone name.
    InvalidTimezone(String),
    /// Push time is not HH:MM.
    InvalidTime(String),
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidTimezone(tz) => write!(f, "unknown timezone '{}'", tz),
            Self::InvalidTime(msg) => write!(f, "invalid push_time: {}", msg),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidTimezone(_) | Self::InvalidTime(_) | Self::Validation(_) => None,
        }
    }
}

/// Which messaging platform the bot talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Line,
    Telegram,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    platform: Platform,
    #[serde(default)]
    line_channel_access_token: String,
    #[serde(default)]
    line_channel_secret: String,
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    gemini_api_key: String,
    /// Override for the Gemini endpoint (tests, proxies).
    gemini_base_url: Option<String>,
    /// Candidate models, tried in order when one is over quota.
    #[serde(default = "default_models")]
    models: Vec<String>,
    #[serde(default = "default_listen_addr")]
    listen_addr: String,
    /// Local wall-clock time of the nightly push, "HH:MM".
    #[serde(default = "default_push_time")]
    push_time: String,
    /// IANA timezone name, e.g. "Asia/Tokyo".
    #[serde(default = "default_timezone")]
    timezone: String,
    /// Directory for state files (database, logs). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_daily_question")]
    daily_question: String,
    #[serde(default = "default_summary_phrases")]
    summary_phrases: Vec<String>,
    #[serde(default = "default_history_window")]
    history_window: usize,
    #[serde(default = "default_summary_window")]
    summary_window: usize,
}

fn default_models() -> Vec<String> {
    ["gemini-2.5-flash", "gemini-2.0-flash-lite", "gemini-2.0-flash", "gemini-pro-latest"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_push_time() -> String {
    "21:00".to_string()
}

fn default_timezone() -> String {
    "Asia/Tokyo".to_string()
}

fn default_daily_question() -> String {
    "Good evening! How did job hunting, studying and life go today?\n\
     e.g. \"Did some job hunting today. Not sure where to start researching big companies.\"\n\
     Just send it as is."
        .to_string()
}

fn default_summary_phrases() -> Vec<String> {
    ["What am I like now?", "What am I like?", "今の私はどんなですか", "私ってどんな"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_history_window() -> usize {
    10
}

fn default_summary_window() -> usize {
    30
}

pub struct Config {
    pub platform: Platform,
    pub line_channel_access_token: String,
    pub line_channel_secret: String,
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub models: Vec<String>,
    pub listen_addr: SocketAddr,
    pub push_hour: u32,
    pub push_minute: u32,
    pub timezone: Tz,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub daily_question: String,
    pub summary_phrases: Vec<String>,
    pub history_window: usize,
    pub summary_window: usize,
}

impl Config {
    /// Load from a JSON file; secrets in the environment take precedence.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let mut file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let overrides = [
            ("LINE_CHANNEL_ACCESS_TOKEN", &mut file.line_channel_access_token),
            ("LINE_CHANNEL_SECRET", &mut file.line_channel_secret),
            ("TELEGRAM_BOT_TOKEN", &mut file.telegram_bot_token),
            ("GEMINI_API_KEY", &mut file.gemini_api_key),
        ];
        for (key, field) in overrides {
            if let Some(value) = env(key).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }

        // Validate required fields
        let mut missing = Vec::new();
        match file.platform {
            Platform::Line => {
                if file.line_channel_access_token.is_empty() {
                    missing.push("LINE_CHANNEL_ACCESS_TOKEN");
                }
                if file.line_channel_secret.is_empty() {
                    missing.push("LINE_CHANNEL_SECRET");
                }
            }
            Platform::Telegram => {
                if file.telegram_bot_token.is_empty() {
                    missing.push("TELEGRAM_BOT_TOKEN");
                }
            }
        }
        if file.gemini_api_key.is_empty() {
            missing.push("GEMINI_API_KEY");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Validation(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if file.platform == Platform::Telegram {
            // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
            let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
            if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
                return Err(ConfigError::Validation(
                    "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
                ));
            }
        }

        if file.models.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::Validation("models must contain at least one model name".into()));
        }
        if file.history_window == 0 || file.summary_window == 0 {
            return Err(ConfigError::Validation("history_window and summary_window must be positive".into()));
        }

        let timezone: Tz = file
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(file.timezone.clone()))?;
        let (push_hour, push_minute) = parse_push_time(&file.push_time).map_err(ConfigError::InvalidTime)?;
        let listen_addr: SocketAddr = file
            .listen_addr
            .parse()
            .map_err(|e| ConfigError::Validation(format!("listen_addr '{}': {}", file.listen_addr, e)))?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            platform: file.platform,
            line_channel_access_token: file.line_channel_access_token,
            line_channel_secret: file.line_channel_secret,
            telegram_bot_token: file.telegram_bot_token,
            gemini_api_key: file.gemini_api_key,
            gemini_base_url: file.gemini_base_url.unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            models: file.models.into_iter().filter(|m| !m.trim().is_empty()).collect(),
            listen_addr,
            push_hour,
            push_minute,
            timezone,
            data_dir,
            daily_question: file.daily_question,
            summary_phrases: file.summary_phrases,
            history_window: file.history_window,
            summary_window: file.summary_window,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            timezone: self.timezone,
            daily_question: self.daily_question.clone(),
            summary_phrases: self.summary_phrases.clone(),
            history_window: self.history_window,
            summary_window: self.summary_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_line_config_with_defaults() {
        let file = write_config(r#"{
            "line_channel_access_token": "access",
            "line_channel_secret": "secret",
            "gemini_api_key": "key"
        }"#);
        let config = Config::load_with_env(file.path(), no_env).expect("should load valid config");
        assert_eq!(config.platform, Platform::Line);
        assert_eq!((config.push_hour, config.push_minute), (21, 0));
        assert_eq!(config.timezone, chrono_tz::Asia::Tokyo);
        assert_eq!(config.models[0], "gemini-2.5-flash");
        assert_eq!(config.models.len(), 4);
        assert_eq!(config.listen_addr.port(), 5000);
        assert_eq!(config.history_window, 10);
        assert_eq!(config.summary_window, 30);
        assert_eq!(config.data_dir, PathBuf::from("."));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(r#"{
            "line_channel_access_token": "from-file",
            "line_channel_secret": "secret"
        }"#);
        let env: HashMap<&str, &str> = [
            ("LINE_CHANNEL_ACCESS_TOKEN", "from-env"),
            ("GEMINI_API_KEY", "env-key"),
        ]
        .into_iter()
        .collect();

        let config = Config::load_with_env(file.path(), |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.line_channel_access_token, "from-env");
        assert_eq!(config.line_channel_secret, "secret");
        assert_eq!(config.gemini_api_key, "env-key");
    }

    #[test]
    fn test_missing_secrets_listed() {
        let file = write_config("{}");
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
        let msg = err.to_string();
        assert!(msg.contains("LINE_CHANNEL_ACCESS_TOKEN"));
        assert!(msg.contains("LINE_CHANNEL_SECRET"));
        assert!(msg.contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_telegram_requires_token() {
        let file = write_config(r#"{"platform": "telegram", "gemini_api_key": "key"}"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn test_telegram_invalid_token_format() {
        let file = write_config(r#"{
            "platform": "telegram",
            "telegram_bot_token": "notanumber:ABCdef",
            "gemini_api_key": "key"
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_telegram_valid() {
        let file = write_config(r#"{
            "platform": "telegram",
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "gemini_api_key": "key",
            "push_time": "07:30",
            "timezone": "Europe/Berlin"
        }"#);
        let config = Config::load_with_env(file.path(), no_env).unwrap();
        assert_eq!(config.platform, Platform::Telegram);
        assert_eq!((config.push_hour, config.push_minute), (7, 30));
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_invalid_timezone() {
        let file = write_config(r#"{
            "line_channel_access_token": "a", "line_channel_secret": "s", "gemini_api_key": "k",
            "timezone": "Mars/Olympus"
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::InvalidTimezone(_)));
    }

    #[test]
    fn test_invalid_push_time() {
        let file = write_config(r#"{
            "line_channel_access_token": "a", "line_channel_secret": "s", "gemini_api_key": "k",
            "push_time": "25:00"
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::InvalidTime(_)));
    }

    #[test]
    fn test_empty_models() {
        let file = write_config(r#"{
            "line_channel_access_token": "a", "line_channel_secret": "s", "gemini_api_key": "k",
            "models": []
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(err.to_string().contains("models"));
    }

    #[test]
    fn test_unknown_platform() {
        let file = write_config(r#"{"platform": "whatsapp"}"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load_with_env("/nonexistent/path/config.json", no_env));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
