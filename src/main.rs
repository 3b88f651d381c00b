//! Community bot entry point
//!
//! Modes:
//! - Default: Telegram bot
//! - --stats-dashboard / -s: stats dashboard
//! - --ops-dashboard / -o: ops dashboard

use communitybot::{Config, DashboardConfig, DashboardServer, Database, OpsServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let stats_mode = args.iter().any(|a| a == "--stats-dashboard" || a == "-s");
    let ops_mode = args.iter().any(|a| a == "--ops-dashboard" || a == "-o");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("communitybot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: communitybot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --stats-dashboard, -s  Run the stats dashboard (default port 8080)");
        println!("  --ops-dashboard, -o    Run the ops dashboard (default port 9000)");
        println!("  --help, -h             Show this help");
        println!();
        println!("Default: Run the Telegram bot");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN    Telegram bot token");
        println!("  OPENAI_API_KEY        Enables /ask, /mood, /image and /casinoask");
        println!("  RAPIDAPI_KEY/HOST     Enables /search");
        println!("  DATABASE_PATH         SQLite file (default: ./bot.db)");
        println!("  ADMIN_USER_IDS        Comma-separated admin Telegram ids");
        println!("  OPS_SERVICE_NAME      systemd unit managed by the ops dashboard");
        println!("  OPS_REPO_PATH         Deployed checkout used for rollbacks");
        println!("  OPS_GITHUB_REPO       owner/name for the commit list");
        println!("  OPS_DASHBOARD_TOKEN   Bearer token required by the ops API");
        return Ok(());
    }

    let dashboard_mode = stats_mode || ops_mode;

    // Setup logging based on mode
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if dashboard_mode {
        // Dashboards run under systemd - JSON lines for the journal
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    if stats_mode {
        info!("Stats dashboard v{}", env!("CARGO_PKG_VERSION"));

        let config = DashboardConfig::from_env();
        let db = Arc::new(Database::open(&config.db_path)?);
        DashboardServer::new(config.stats.clone(), db).run().await?;
    } else if ops_mode {
        info!("Ops dashboard v{}", env!("CARGO_PKG_VERSION"));

        let config = DashboardConfig::from_env();
        OpsServer::new(&config).run().await?;
    } else {
        info!("Community bot v{}", env!("CARGO_PKG_VERSION"));

        let config = Config::from_env()?;
        communitybot::telegram::run_telegram_bot(config).await?;
    }

    Ok(())
}
