//! Dashboard Configuration
//!
//! Bind addresses for the stats (8080) and ops (9000) dashboards plus the
//! settings the ops dashboard needs to supervise the bot service.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Where one dashboard listens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Wrap the router in a request trace layer
    pub log_requests: bool,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            log_requests: true,
        }
    }

    fn from_env(prefix: &str, default_port: u16) -> Self {
        let mut config = Self::new(default_port);

        if let Ok(addr) = std::env::var(format!("{}_HOST", prefix)) {
            match addr.parse() {
                Ok(parsed) => config.bind_addr = parsed,
                Err(_) => tracing::warn!("Ignoring invalid {}_HOST: {}", prefix, addr),
            }
        }

        if let Ok(port) = std::env::var(format!("{}_PORT", prefix)) {
            if let Ok(parsed) = port.parse() {
                config.port = parsed;
            }
        }

        if let Ok(val) = std::env::var("DASHBOARD_LOG_REQUESTS") {
            config.log_requests = val == "true" || val == "1";
        }

        config
    }

    /// Check if bound to localhost only
    pub fn is_localhost(&self) -> bool {
        self.bind_addr.is_loopback()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.bind_addr, self.port)
    }
}

/// What the ops dashboard controls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsSettings {
    /// systemd unit of the bot
    pub service_name: String,
    /// Checkout the bot runs from
    pub repo_path: PathBuf,
    /// `owner/name` on GitHub, for the releases list
    pub github_repo: Option<String>,
    #[serde(skip_serializing)]
    pub github_token: Option<String>,
    /// Shell command run between the reset and the restart of a rollback
    pub post_rollback_cmd: Option<String>,
    /// Bearer token required on /api and /ws when set
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
}

impl Default for OpsSettings {
    fn default() -> Self {
        Self {
            service_name: "telegram-bot".to_string(),
            repo_path: PathBuf::from("."),
            github_repo: None,
            github_token: None,
            post_rollback_cmd: None,
            access_token: None,
        }
    }
}

/// Dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub stats: ServerConfig,
    pub ops: ServerConfig,
    pub ops_settings: OpsSettings,
    /// Bot database read by the stats dashboard
    pub db_path: PathBuf,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            stats: ServerConfig::new(8080),
            ops: ServerConfig::new(9000),
            ops_settings: OpsSettings::default(),
            db_path: PathBuf::from("./bot.db"),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl DashboardConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = OpsSettings::default();
        let ops_settings = OpsSettings {
            service_name: env_opt("OPS_SERVICE_NAME").unwrap_or(defaults.service_name),
            repo_path: env_opt("OPS_REPO_PATH").map(PathBuf::from).unwrap_or(defaults.repo_path),
            github_repo: env_opt("OPS_GITHUB_REPO"),
            github_token: env_opt("GITHUB_TOKEN"),
            post_rollback_cmd: env_opt("OPS_POST_ROLLBACK_CMD"),
            access_token: env_opt("OPS_DASHBOARD_TOKEN"),
        };

        let config = Self {
            stats: ServerConfig::from_env("STATS_DASHBOARD", 8080),
            ops: ServerConfig::from_env("OPS_DASHBOARD", 9000),
            ops_settings,
            db_path: env_opt("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./bot.db")),
        };

        if !config.ops.is_localhost() && config.ops_settings.access_token.is_none() {
            tracing::warn!(
                "Ops dashboard binding to {} without OPS_DASHBOARD_TOKEN - service control is unauthenticated",
                config.ops.bind_addr
            );
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let config = DashboardConfig::default();
        assert_eq!(config.stats.port, 8080);
        assert_eq!(config.ops.port, 9000);
        assert_eq!(config.ops_settings.service_name, "telegram-bot");
        assert!(config.ops_settings.access_token.is_none());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig::new(8080);
        assert_eq!(config.socket_addr().port(), 8080);
        assert!(!config.is_localhost());
        assert_eq!(config.base_url(), "http://0.0.0.0:8080");
    }

    #[test]
    fn test_tokens_not_serialized() {
        let settings = OpsSettings {
            access_token: Some("secret".to_string()),
            github_token: Some("ghp".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("ghp"));
    }
}
