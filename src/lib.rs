//! Community Telegram bot
//!
//! Casino calculators, polls, todo lists, image generation, reminders and
//! an OpenAI assistant for group chats, plus two operator dashboards.
//!
//! # Features
//!
//! - **Calculators**: mines multiplier search and back-to-back progressions
//! - **Community**: polls and quizzes, todo lists, reminders, activity stats
//! - **AI**: chat assistant, mood analysis, image generation, casino Q&A
//! - **Access control**: allow-listed users and channels with admin commands
//! - **Dashboards**: read-only stats on :8080, service ops on :9000
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► teloxide dispatcher ──► telegram::execute_command
//!                                          │
//!                                          ├── Stores (SQLite via rusqlite)
//!                                          ├── OpenAI (chat + images)
//!                                          ├── RapidAPI (content search)
//!                                          └── ReminderPoller ──► notifier
//!
//! Browser ──► dashboard (stats) ──► SQLite
//!         └─► ops ──► systemctl / journalctl / git2 / GitHub API
//! ```

pub mod auth;
pub mod casino;
pub mod config;
pub mod content;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod images;
pub mod llm;
pub mod mines;
pub mod mood;
pub mod ops;
pub mod progression;
pub mod rate_limit;
pub mod reminders;
pub mod telegram;
pub mod telegram_ui;
pub mod timezone;
pub mod todo;
pub mod users;
pub mod voting;

pub use config::Config;
pub use dashboard::{DashboardConfig, DashboardServer};
pub use db::Database;
pub use error::{BotError, BotResult};
pub use llm::{Completion, ImageGenerator, OpenAiClient};
pub use ops::OpsServer;
pub use telegram::{execute_callback, execute_command, BotData, CommandContext, Reply};
