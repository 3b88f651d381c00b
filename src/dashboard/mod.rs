//! Web dashboards
//!
//! The stats dashboard serves read-only counters from the bot database.
//!
//! ```text
//! GET /               -> embedded page
//! GET /health         -> health check
//! GET /healthz        -> liveness
//! GET /readyz         -> readiness (database ping)
//! GET /api/stats      -> user, image and todo counters
//! GET /api/activity   -> recent images and tasks
//! ```
//!
//! The ops dashboard in [`crate::ops`] reuses the server plumbing here.

pub mod api;
pub mod config;
pub mod server;

pub use api::{api_error, ApiError, ErrorResponse};
pub use config::{DashboardConfig, OpsSettings, ServerConfig};
pub use server::DashboardServer;
