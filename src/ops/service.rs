//! systemd service control through `systemctl` and `journalctl`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::str::FromStr;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} failed: {stderr}")]
    Failed { command: String, stderr: String },
    #[error("Invalid action: {0}")]
    InvalidAction(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    /// Past tense for result messages
    pub fn done(&self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Restart => "restarted",
        }
    }
}

impl FromStr for ServiceAction {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(ServiceError::InvalidAction(other.to_string())),
        }
    }
}

/// Parsed `systemctl status` output
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ServiceStatus {
    pub active: bool,
    pub enabled: bool,
    /// e.g. "2h 5min", "Unknown" when inactive
    pub uptime: String,
    pub since: Option<String>,
    pub memory_usage: String,
    pub cpu_usage: String,
    pub restart_count: u32,
}

const UNKNOWN: &str = "Unknown";

fn value_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.split_once(marker).map(|(_, rest)| rest.trim())
}

impl ServiceStatus {
    pub fn parse(output: &str) -> Self {
        let mut status = ServiceStatus {
            active: output.contains("active (running)"),
            uptime: UNKNOWN.to_string(),
            memory_usage: UNKNOWN.to_string(),
            cpu_usage: UNKNOWN.to_string(),
            ..Default::default()
        };

        for line in output.lines() {
            let line = line.trim();
            if let Some(loaded) = value_after(line, "Loaded:") {
                // loaded (/etc/systemd/system/x.service; enabled; vendor preset: enabled)
                status.enabled = loaded
                    .split(';')
                    .nth(1)
                    .map(|s| s.trim() == "enabled")
                    .unwrap_or(false);
            } else if line.starts_with("Active:") {
                if let Some(since) = value_after(line, "since ") {
                    let (when, ago) = since.split_once(';').unwrap_or((since, ""));
                    status.since = Some(when.trim().to_string());
                    let ago = ago.trim().trim_end_matches("ago").trim();
                    if !ago.is_empty() {
                        status.uptime = ago.to_string();
                    }
                }
            } else if let Some(memory) = value_after(line, "Memory:") {
                status.memory_usage = first_word(memory);
            } else if let Some(cpu) = value_after(line, "CPU:") {
                status.cpu_usage = first_word(cpu);
            } else if let Some(count) = value_after(line, "restart counter is at ") {
                if let Ok(n) = count.trim_end_matches('.').parse() {
                    status.restart_count = n;
                }
            }
        }

        status
    }
}

fn first_word(s: &str) -> String {
    s.split_whitespace().next().unwrap_or(UNKNOWN).to_string()
}

/// Control surface for the supervised bot process
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn status(&self) -> ServiceResult<ServiceStatus>;

    async fn control(&self, action: ServiceAction) -> ServiceResult<()>;

    /// Last `n` journal lines, oldest first
    async fn recent_logs(&self, n: usize) -> ServiceResult<Vec<String>>;
}

/// [`ServiceManager`] backed by systemd
pub struct Systemctl {
    service: String,
}

impl Systemctl {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn run(&self, program: &str, args: &[&str]) -> ServiceResult<std::process::Output> {
        let command = format!("{} {}", program, args.join(" "));
        debug!("Running {}", command);
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ServiceError::Spawn { command, source })
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn status(&self) -> ServiceResult<ServiceStatus> {
        // Exit code is non-zero for stopped units; the text is still parseable.
        let output = self.run("systemctl", &["status", &self.service, "--no-pager"]).await?;
        Ok(ServiceStatus::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn control(&self, action: ServiceAction) -> ServiceResult<()> {
        let output = self.run("systemctl", &[action.as_str(), &self.service]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("systemctl {} {} failed: {}", action.as_str(), self.service, stderr);
            return Err(ServiceError::Failed {
                command: format!("systemctl {} {}", action.as_str(), self.service),
                stderr,
            });
        }
        info!("Service {} {}", self.service, action.done());
        Ok(())
    }

    async fn recent_logs(&self, n: usize) -> ServiceResult<Vec<String>> {
        let n = n.to_string();
        let output = self
            .run("journalctl", &["-u", &self.service, "-n", &n, "--no-pager"])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING: &str = "\
● telegram-bot.service - Telegram Bot
     Loaded: loaded (/etc/systemd/system/telegram-bot.service; enabled; vendor preset: enabled)
     Active: active (running) since Mon 2024-01-01 10:00:00 UTC; 2h 5min ago
   Main PID: 1234 (communitybot)
      Tasks: 3 (limit: 4915)
     Memory: 45.2M
        CPU: 1min 2.345s
     CGroup: /system.slice/telegram-bot.service

Jan 01 09:59:58 host systemd[1]: telegram-bot.service: Scheduled restart job, restart counter is at 3.
";

    #[test]
    fn test_parse_running_service() {
        let status = ServiceStatus::parse(RUNNING);
        assert!(status.active);
        assert!(status.enabled);
        assert_eq!(status.uptime, "2h 5min");
        assert_eq!(status.since.as_deref(), Some("Mon 2024-01-01 10:00:00 UTC"));
        assert_eq!(status.memory_usage, "45.2M");
        assert_eq!(status.cpu_usage, "1min");
        assert_eq!(status.restart_count, 3);
    }

    #[test]
    fn test_parse_stopped_service() {
        let output = "\
○ telegram-bot.service - Telegram Bot
     Loaded: loaded (/etc/systemd/system/telegram-bot.service; disabled; vendor preset: enabled)
     Active: inactive (dead)
";
        let status = ServiceStatus::parse(output);
        assert!(!status.active);
        assert!(!status.enabled);
        assert_eq!(status.uptime, "Unknown");
        assert_eq!(status.memory_usage, "Unknown");
        assert_eq!(status.restart_count, 0);
    }

    #[test]
    fn test_parse_empty_output() {
        let status = ServiceStatus::parse("");
        assert!(!status.active);
        assert_eq!(status.cpu_usage, "Unknown");
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("start".parse::<ServiceAction>().unwrap(), ServiceAction::Start);
        assert_eq!(" Restart ".parse::<ServiceAction>().unwrap(), ServiceAction::Restart);
        assert!(matches!(
            "reboot".parse::<ServiceAction>(),
            Err(ServiceError::InvalidAction(_))
        ));
    }
}
