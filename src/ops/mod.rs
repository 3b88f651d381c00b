//! Operations dashboard for the deployed bot
//!
//! ```text
//! GET  /               -> embedded page
//! GET  /api/status     -> systemd status, last journal line, git HEAD
//! POST /api/control    -> {"action": "start" | "stop" | "restart"}
//! GET  /api/releases   -> ten most recent GitHub commits
//! POST /api/rollback   -> {"commit_sha": "..."}
//! GET  /ws/logs        -> journal tail over websocket
//! ```

pub mod git;
pub mod logs;
pub mod releases;
pub mod server;
pub mod service;

pub use git::{GitError, GitInfo, GitRepo};
pub use logs::LogFollower;
pub use releases::{Release, ReleasesClient};
pub use server::{OpsServer, OpsState};
pub use service::{ServiceAction, ServiceError, ServiceManager, ServiceStatus, Systemctl};
