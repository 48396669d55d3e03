use serde::Deserialize;
use std::{env, path::Path, path::PathBuf, time::Duration};

use fieldhand_client::{ClientConfig, retry::RetryConfig};

use crate::confirmation::DEFAULT_AUTO_CONFIRM_SECS;
use crate::session::SessionOptions;

pub const BASE_URL_ENV: &str = "FIELDHAND_BASE_URL";
pub const IDLE_TIMEOUT_ENV: &str = "FIELDHAND_STREAM_IDLE_TIMEOUT_SECS";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

// Default value function for serde (bool::default() is false, so only true needs a fn)
pub(crate) const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct FieldhandConfig {
    pub server: Option<ServerConfig>,
    pub stream: Option<StreamConfig>,
    pub confirmation: Option<ConfirmationConfig>,
    pub retry: Option<RetrySection>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    /// Path of the streaming chat endpoint, relative to `base_url`.
    pub chat_path: Option<String>,
    pub api_token: Option<String>,
}

// Manual Debug impl to prevent leaking the token in logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("base_url", &self.base_url)
            .field("chat_path", &self.chat_path)
            .field(
                "api_token",
                &if self.api_token.is_some() { "[REDACTED]" } else { "None" },
            )
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamConfig {
    /// Seconds without a chunk before the turn fails.
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationConfig {
    pub auto_confirm_secs: Option<u32>,
    #[serde(default = "default_true")]
    pub auto_confirm: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            auto_confirm_secs: None,
            auto_confirm: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expanded(value: Option<&String>) -> Option<String> {
    value
        .map(|v| expand_env_vars(v))
        .filter(|v| !v.trim().is_empty())
}

impl FieldhandConfig {
    /// Load `~/.fieldhand/config.toml`. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Resolve file values, `${VAR}` expansion and environment overrides.
    #[must_use]
    pub fn resolve(&self) -> ResolvedConfig {
        self.resolve_with(|name| env::var(name).ok())
    }

    /// Like [`Self::resolve`] with an explicit environment.
    #[must_use]
    pub fn resolve_with(&self, env_lookup: impl Fn(&str) -> Option<String>) -> ResolvedConfig {
        let server = self.server.as_ref();

        let base_url = env_lookup(BASE_URL_ENV)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| expanded(server.and_then(|s| s.base_url.as_ref())))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let mut client = ClientConfig::new(base_url)
            .with_api_token(expanded(server.and_then(|s| s.api_token.as_ref())));
        if let Some(path) = expanded(server.and_then(|s| s.chat_path.as_ref())) {
            client = client.with_chat_path(path);
        }

        let idle_secs = env_lookup(IDLE_TIMEOUT_ENV)
            .and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(secs) => Some(secs),
                Err(_) => {
                    tracing::warn!(value = %raw, "Ignoring invalid {IDLE_TIMEOUT_ENV}");
                    None
                }
            })
            .or_else(|| self.stream.as_ref().and_then(|s| s.idle_timeout_secs));
        if let Some(secs) = idle_secs {
            client = client.with_idle_timeout(Duration::from_secs(secs));
        }

        if let Some(max_retries) = self.retry.as_ref().and_then(|r| r.max_retries) {
            client = client.with_retry(RetryConfig {
                max_retries,
                ..RetryConfig::default()
            });
        }

        let confirmation = self.confirmation.as_ref();
        let session = SessionOptions {
            auto_confirm_secs: confirmation
                .and_then(|c| c.auto_confirm_secs)
                .unwrap_or(DEFAULT_AUTO_CONFIRM_SECS),
            auto_confirm: confirmation.is_none_or(|c| c.auto_confirm),
            ..SessionOptions::default()
        };

        ResolvedConfig { client, session }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub client: ClientConfig,
    pub session: SessionOptions,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        FieldhandConfig::default().resolve()
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".fieldhand").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            std::env::set_var("FIELDHAND_TEST_TOKEN", "s3cret");
        }
        assert_eq!(
            expand_env_vars("Bearer ${FIELDHAND_TEST_TOKEN}!"),
            "Bearer s3cret!"
        );
        unsafe {
            std::env::remove_var("FIELDHAND_TEST_TOKEN");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        unsafe {
            std::env::remove_var("FIELDHAND_MISSING_FOR_TEST");
        }
        assert_eq!(
            expand_env_vars("a ${FIELDHAND_MISSING_FOR_TEST} b"),
            "a  b"
        );
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("test ${UNCLOSED"), "test ${UNCLOSED");
    }

    #[test]
    fn expand_env_vars_empty_var_name_dropped() {
        assert_eq!(expand_env_vars("test ${} more"), "test  more");
    }

    #[test]
    fn expand_env_vars_keeps_unicode() {
        assert_eq!(expand_env_vars("champ é 🌱"), "champ é 🌱");
    }

    #[test]
    fn parse_empty_config() {
        let config: FieldhandConfig = toml::from_str("").unwrap();
        assert!(config.server.is_none());
        let resolved = config.resolve_with(no_env);
        assert_eq!(resolved.client.base_url(), DEFAULT_BASE_URL);
        assert_eq!(resolved.session.auto_confirm_secs, DEFAULT_AUTO_CONFIRM_SECS);
        assert!(resolved.session.auto_confirm);
    }

    #[test]
    fn parse_full_config() {
        let config: FieldhandConfig = toml::from_str(
            r#"
            [server]
            base_url = "https://farm.example/api/"
            chat_path = "assistant/stream"
            api_token = "tok"

            [stream]
            idle_timeout_secs = 15

            [confirmation]
            auto_confirm_secs = 5
            auto_confirm = false

            [retry]
            max_retries = 0
            "#,
        )
        .unwrap();

        let resolved = config.resolve_with(no_env);
        assert_eq!(
            resolved.client.chat_url(),
            "https://farm.example/api/assistant/stream"
        );
        assert_eq!(resolved.client.api_token(), Some("tok"));
        assert_eq!(resolved.client.idle_timeout(), Duration::from_secs(15));
        assert_eq!(resolved.client.retry().max_retries, 0);
        assert_eq!(resolved.session.auto_confirm_secs, 5);
        assert!(!resolved.session.auto_confirm);
    }

    #[test]
    fn confirmation_section_defaults_auto_confirm_on() {
        let config: FieldhandConfig =
            toml::from_str("[confirmation]\nauto_confirm_secs = 3\n").unwrap();
        let resolved = config.resolve_with(no_env);
        assert!(resolved.session.auto_confirm);
        assert_eq!(resolved.session.auto_confirm_secs, 3);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let config: FieldhandConfig = toml::from_str(
            "[server]\nbase_url = \"http://file\"\n[stream]\nidle_timeout_secs = 15\n",
        )
        .unwrap();
        let resolved = config.resolve_with(|name| match name {
            BASE_URL_ENV => Some("http://env".to_string()),
            IDLE_TIMEOUT_ENV => Some("90".to_string()),
            _ => None,
        });
        assert_eq!(resolved.client.base_url(), "http://env");
        assert_eq!(resolved.client.idle_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn invalid_idle_timeout_env_falls_back_to_file() {
        let config: FieldhandConfig =
            toml::from_str("[stream]\nidle_timeout_secs = 15\n").unwrap();
        let resolved = config.resolve_with(|name| {
            (name == IDLE_TIMEOUT_ENV).then(|| "soon".to_string())
        });
        assert_eq!(resolved.client.idle_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn server_config_debug_redacts_token() {
        let config = ServerConfig {
            api_token: Some("s3cret".to_string()),
            ..ServerConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbase_url = \"http://from-file\"").unwrap();
        let config = FieldhandConfig::load_from(file.path()).unwrap();
        assert_eq!(
            config.server.unwrap().base_url.as_deref(),
            Some("http://from-file")
        );
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbase_url = 1").unwrap();
        let err = FieldhandConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), &file.path().to_path_buf());
    }
}
