//! Configuration file parser for `newsletter.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::content::DEFAULT_BASE_URL;
use crate::feed::{ChannelMeta, MergeMode, Placement};
use crate::newsletter::{HtmlPolicy, ItemOptions, ViolationAction, DEFAULT_ALLOWED_TAGS};

/// Environment variable holding the completion API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("No API key: set OPENAI_API_KEY or `api_key` in the config file")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level generator configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `Debug` masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Completion API key (fallback when `OPENAI_API_KEY` is unset).
    pub api_key: Option<String>,

    /// Chat model name.
    pub model: String,

    /// Completion API base URL, without the `/chat/completions` suffix.
    pub base_url: String,

    /// Per-request timeout in seconds. Must be positive.
    pub request_timeout_secs: u64,

    /// Where the feed document lives.
    pub feed_path: PathBuf,

    pub mode: MergeMode,

    pub placement: Placement,

    /// Prefix the body with the generated subtitle in bold.
    pub include_subtitle: bool,

    /// Custom prompt template; the built-in German prompt when unset.
    pub prompt_file: Option<PathBuf>,

    /// Channel metadata for freshly created feeds.
    pub channel: ChannelMeta,

    pub html: HtmlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 60,
            feed_path: PathBuf::from("feed.xml"),
            mode: MergeMode::Append,
            placement: Placement::NewestLast,
            include_subtitle: true,
            prompt_file: None,
            channel: ChannelMeta::default(),
            html: HtmlConfig::default(),
        }
    }
}

/// SEC-015: Mask api_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("feed_path", &self.feed_path)
            .field("mode", &self.mode)
            .field("placement", &self.placement)
            .field("include_subtitle", &self.include_subtitle)
            .field("prompt_file", &self.prompt_file)
            .field("channel", &self.channel)
            .field("html", &self.html)
            .finish()
    }
}

/// `[html]` table: the tag allow-list applied to generated bodies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HtmlConfig {
    /// When false, bodies pass through untouched.
    pub enforce: bool,
    pub allowed_tags: Vec<String>,
    pub on_violation: ViolationAction,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            enforce: true,
            allowed_tags: DEFAULT_ALLOWED_TAGS.iter().map(|t| t.to_string()).collect(),
            on_violation: ViolationAction::Reject,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect unknown keys (likely typos)
        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            model = %config.model,
            feed = %config.feed_path.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Checks values serde cannot: an absolute channel link and a positive timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        match url::Url::parse(&self.channel.link) {
            Ok(url) if url.has_host() => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "channel.link '{}' is not an absolute URL",
                    self.channel.link
                )))
            }
        }

        if self.html.enforce && self.html.allowed_tags.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "html.allowed_tags is empty while html.enforce is true".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolves the API key. `env` (the value of `OPENAI_API_KEY`) wins over
    /// the config file; blank values count as unset.
    pub fn api_key(&self, env: Option<String>) -> Result<SecretString, ConfigError> {
        env.filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
            .map(|k| SecretString::from(k.trim().to_string()))
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn html_policy(&self) -> HtmlPolicy {
        if self.html.enforce {
            HtmlPolicy::allow_list(&self.html.allowed_tags, self.html.on_violation)
        } else {
            HtmlPolicy::unrestricted()
        }
    }

    pub fn item_options(&self) -> ItemOptions {
        ItemOptions {
            include_subtitle: self.include_subtitle,
        }
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    const KNOWN_KEYS: &[&str] = &[
        "api_key",
        "model",
        "base_url",
        "request_timeout_secs",
        "feed_path",
        "mode",
        "placement",
        "include_subtitle",
        "prompt_file",
        "channel",
        "html",
    ];
    const CHANNEL_KEYS: &[&str] = &["title", "link", "description"];
    const HTML_KEYS: &[&str] = &["enforce", "allowed_tags", "on_violation"];

    for (key, value) in raw {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            continue;
        }
        let nested = match key.as_str() {
            "channel" => CHANNEL_KEYS,
            "html" => HTML_KEYS,
            _ => continue,
        };
        if let Some(table) = value.as_table() {
            for sub in table.keys() {
                if !nested.contains(&sub.as_str()) {
                    tracing::warn!(key = %format!("{}.{}", key, sub), "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("sprouts_feed_config_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("newsletter.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.feed_path, PathBuf::from("feed.xml"));
        assert_eq!(config.mode, MergeMode::Append);
        assert_eq!(config.placement, Placement::NewestLast);
        assert!(config.include_subtitle);
        assert!(config.prompt_file.is_none());
        assert_eq!(config.channel.title, "Weekly Newsletter");
        assert!(config.html.enforce);
        assert_eq!(config.html.on_violation, ViolationAction::Reject);
        assert!(config.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/sprouts_feed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "model = \"gpt-4o\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.channel, ChannelMeta::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
api_key = "sk-test"
model = "gpt-4o"
base_url = "http://localhost:8080/v1"
request_timeout_secs = 15
feed_path = "public/feed.xml"
mode = "overwrite"
placement = "newest_first"
include_subtitle = false
prompt_file = "prompt.txt"

[channel]
title = "Sprossen-Post"
link = "https://example.com/news/"
description = "Woechentlich"

[html]
enforce = true
allowed_tags = ["p", "a"]
on_violation = "strip"
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.request_timeout_secs, 15);
        assert_eq!(config.feed_path, PathBuf::from("public/feed.xml"));
        assert_eq!(config.mode, MergeMode::Overwrite);
        assert_eq!(config.placement, Placement::NewestFirst);
        assert!(!config.include_subtitle);
        assert_eq!(config.prompt_file, Some(PathBuf::from("prompt.txt")));
        assert_eq!(config.channel.title, "Sprossen-Post");
        assert_eq!(config.html.allowed_tags, vec!["p", "a"]);
        assert_eq!(config.html.on_violation, ViolationAction::Strip);

        let policy = config.html_policy();
        assert_eq!(policy.on_violation(), ViolationAction::Strip);
        assert!(policy.allowed_tags().unwrap().contains("a"));
        assert!(!config.item_options().include_subtitle);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let (dir, path) = write_config("bad_mode", "mode = \"prepend\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
model = "gpt-4o-mini"
totally_fake_key = "should not fail"

[channel]
colour = "green"
"#;
        let (dir, path) = write_config("unknown", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.channel.title, "Weekly Newsletter");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("sprouts_feed_config_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("newsletter.toml");
        let content = "# ".repeat(Config::MAX_FILE_SIZE as usize / 2 + 1);
        std::fs::write(&path, content).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_relative_link() {
        let mut config = Config::default();
        config.channel.link = "newsletter/".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("channel.link"));
    }

    #[test]
    fn test_validate_rejects_empty_allow_list() {
        let mut config = Config::default();
        config.html.allowed_tags.clear();
        assert!(config.validate().is_err());

        config.html.enforce = false;
        assert!(config.validate().is_ok());
        assert!(config.html_policy().allowed_tags().is_none());
    }

    #[test]
    fn test_api_key_env_takes_precedence() {
        let config = Config {
            api_key: Some("from-file".to_string()),
            ..Config::default()
        };
        let key = config.api_key(Some("from-env".to_string())).unwrap();
        assert_eq!(key.expose_secret(), "from-env");

        let key = config.api_key(None).unwrap();
        assert_eq!(key.expose_secret(), "from-file");

        // Blank env value falls back to the file
        let key = config.api_key(Some("  ".to_string())).unwrap();
        assert_eq!(key.expose_secret(), "from-file");
    }

    #[test]
    fn test_missing_api_key() {
        let config = Config::default();
        assert!(matches!(config.api_key(None), Err(ConfigError::MissingApiKey)));

        let config = Config {
            api_key: Some(String::new()),
            ..Config::default()
        };
        assert!(matches!(config.api_key(None), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = Config {
            api_key: Some("super-secret-key-12345".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_debug_shows_none_when_no_api_key() {
        let debug_output = format!("{:?}", Config::default());
        assert!(debug_output.contains("api_key: None"));
    }
}
