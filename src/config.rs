//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Bot configuration, loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token (required in bot mode)
    pub telegram_token: Option<String>,

    /// OpenAI API key (enables /ask, /mood, /image and casino Q&A)
    pub openai_api_key: Option<String>,

    /// Chat completion model
    pub openai_chat_model: String,

    /// Image generation model
    pub openai_image_model: String,

    /// RapidAPI key and host for content search
    pub rapidapi_key: Option<String>,
    pub rapidapi_host: Option<String>,

    /// SQLite database path
    pub db_path: PathBuf,

    /// Data directory (downloaded images live under `images/`)
    pub data_dir: PathBuf,

    /// Optional casino seed file
    pub casino_data_path: PathBuf,

    /// development / production
    pub environment: String,

    /// Telegram ids with admin rights regardless of database state
    pub admin_user_ids: Vec<i64>,

    /// Message rate limit (requests per window)
    pub rate_limit_requests: usize,

    /// Message rate limit window in seconds
    pub rate_limit_window_secs: u64,

    /// Images a user may generate per UTC day
    pub daily_image_limit: u32,

    /// Reminder poll interval in seconds
    pub reminder_poll_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let telegram_token = env_opt("TELEGRAM_BOT_TOKEN").or_else(|| env_opt("TELOXIDE_TOKEN"));

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let casino_data_path = std::env::var("CASINO_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("casino_data.json"));

        let admin_user_ids = match env_opt("ADMIN_USER_IDS") {
            Some(raw) => parse_id_list(&raw).context("ADMIN_USER_IDS must be comma-separated integers")?,
            None => Vec::new(),
        };

        Ok(Self {
            telegram_token,
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_chat_model: env_or("OPENAI_CHAT_MODEL", "gpt-4o-mini"),
            openai_image_model: env_or("OPENAI_IMAGE_MODEL", "dall-e-3"),
            rapidapi_key: env_opt("RAPIDAPI_KEY"),
            rapidapi_host: env_opt("RAPIDAPI_HOST"),
            db_path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./bot.db")),
            data_dir,
            casino_data_path,
            environment: env_or("ENVIRONMENT", "development"),
            admin_user_ids,
            rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS", 30),
            rate_limit_window_secs: env_parse("RATE_LIMIT_WINDOW", 60),
            daily_image_limit: env_parse("DAILY_IMAGE_LIMIT", 25),
            reminder_poll_secs: env_parse("REMINDER_POLL_SECS", 30),
        })
    }

    /// Directory for downloaded images
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_token: None,
            openai_api_key: None,
            openai_chat_model: "gpt-4o-mini".to_string(),
            openai_image_model: "dall-e-3".to_string(),
            rapidapi_key: None,
            rapidapi_host: None,
            db_path: PathBuf::from("./bot.db"),
            data_dir: PathBuf::from("./data"),
            casino_data_path: PathBuf::from("./data/casino_data.json"),
            environment: "development".to_string(),
            admin_user_ids: Vec::new(),
            rate_limit_requests: 30,
            rate_limit_window_secs: 60,
            daily_image_limit: 25,
            reminder_poll_secs: 30,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Parse "1, 2,3" into ids, ignoring empty segments
pub fn parse_id_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().with_context(|| format!("invalid id: {}", s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_id_list(" , 42 ,").unwrap(), vec![42]);
        assert!(parse_id_list("1,abc").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rate_limit_requests, 30);
        assert_eq!(config.daily_image_limit, 25);
        assert_eq!(config.images_dir(), PathBuf::from("./data/images"));
        assert!(!config.is_production());
    }
}
