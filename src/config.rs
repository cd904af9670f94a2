use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

const APP_DIR: &str = "neofeed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub ai: AiDefaults,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub server: ServerConfig,

    pub mail: Option<MailConfig>,
}

/// Completion service settings used when a user has not configured their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiDefaults {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    pub api_key: Option<String>,
    pub image_model: Option<String>,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_sweep_minutes")]
    pub sweep_interval_minutes: u32,
    /// Offset applied to wall-clock reads for users without their own.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_api_url")]
    pub api_url: String,
    pub api_key: Option<String>,
    pub sender_name: String,
    pub sender_email: String,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("neofeed.db").to_string_lossy().to_string()
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_timeout() -> u64 {
    90
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; NeoFeed/1.0; +https://neofeed.app)".to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_step_timeout() -> u64 {
    120
}

fn default_sweep_minutes() -> u32 {
    30
}

fn default_utc_offset() -> i32 {
    8 * 60
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_mail_api_url() -> String {
    "https://api.brevo.com/v3/smtp/email".to_string()
}

impl Default for AiDefaults {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            api_key: None,
            image_model: None,
            timeout_secs: default_ai_timeout(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            step_timeout_secs: default_step_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_minutes: default_sweep_minutes(),
            utc_offset_minutes: default_utc_offset(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            ai: AiDefaults::default(),
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig::default(),
            mail: None,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            config
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Secrets may come from the environment instead of the config file.
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("NEOFEED_AI_API_KEY") {
            if !key.trim().is_empty() {
                self.ai.api_key = Some(key);
            }
        }
        if let (Some(mail), Ok(key)) = (self.mail.as_mut(), std::env::var("NEOFEED_MAIL_API_KEY")) {
            if !key.trim().is_empty() {
                mail.api_key = Some(key);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.scheduler.sweep_interval_minutes == 0 {
            return Err(AppError::Config(
                "scheduler.sweep_interval_minutes must be at least 1".into(),
            ));
        }
        if self.scheduler.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(AppError::Config(
                "scheduler.utc_offset_minutes must be within one day".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.scheduler.sweep_interval_minutes, 30);
        assert_eq!(config.scheduler.utc_offset_minutes, 480);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
db_path = "/tmp/neofeed-test.db"

[retry]
max_attempts = 5

[mail]
sender_name = "NeoFeed Intelligence"
sender_email = "bot@neofeed.test"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.db_path, "/tmp/neofeed-test.db");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.ai.model, "gpt-4o-mini");
        let mail = config.mail.unwrap();
        assert_eq!(mail.api_url, "https://api.brevo.com/v3/smtp/email");
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
