use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;

use spendwatch::{
    load_or_init_config, migrate_config, open_store_dir, persist_config, Credentials,
    RefreshOrchestrator, TrackerSession, UsageApiClient, UsageCache,
};

#[derive(Parser, Debug)]
#[command(name = "spendwatch", version, about = "Track AI coding subscription usage and spend")]
struct Cli {
    /// Path to the config file (defaults to the per-user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the event cache and local store (defaults to the
    /// per-user data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Store dashboard credentials before anything else runs
    #[arg(long, value_name = "USER_ID::ACCESS_TOKEN")]
    login: Option<String>,

    /// Run a single refresh cycle, print the result and exit
    #[arg(long)]
    once: bool,

    /// Override the configured refresh interval for this run
    #[arg(long, value_name = "MINUTES")]
    interval_minutes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "spendwatch=info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dirs = ProjectDirs::from("", "", "spendwatch");
    let config_path = cli
        .config
        .or_else(|| dirs.as_ref().map(|d| d.config_dir().join("config.toml")))
        .context("no usable config directory; pass --config")?;
    let data_dir = cli
        .data_dir
        .or_else(|| dirs.as_ref().map(|d| d.data_dir().to_path_buf()))
        .context("no usable data directory; pass --data-dir")?;

    let mut cfg = load_or_init_config(&config_path)
        .with_context(|| format!("loading config at {}", config_path.display()))?;
    if let Some(minutes) = cli.interval_minutes {
        cfg.refresh_interval_minutes = minutes.max(1);
    }

    let store = open_store_dir(data_dir.join("data"))?;
    if migrate_config(&mut cfg, &store) {
        persist_config(&config_path, &cfg)?;
    }

    let cache = UsageCache::load(data_dir.join("usage_events.json"));
    let client = UsageApiClient::new(cfg.dashboard_base_url.as_deref())?;
    let orchestrator =
        RefreshOrchestrator::new(cfg, store, cache, client, TrackerSession::new());

    if let Some(login) = cli.login.as_deref() {
        let (user_id, access_token) = login
            .split_once("::")
            .context("--login expects USER_ID::ACCESS_TOKEN")?;
        orchestrator.set_credentials(Credentials {
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
        })?;
        log::info!("credentials stored");
    }

    if cli.once {
        if let Err(e) = orchestrator.refresh_now().await {
            if matches!(e, spendwatch::RefreshError::SessionExpired) {
                eprintln!("session expired; sign in again with --login");
                std::process::exit(2);
            }
            return Err(e.into());
        }
        let snap = orchestrator.session().current();
        let cursor_spend = snap
            .provider_totals
            .first()
            .map(|t| t.spend_cents / 100.0)
            .unwrap_or(0.0);
        println!(
            "{} events cached, {} requests today, {:.2} spent this window",
            snap.events.len(),
            snap.requests_today,
            cursor_spend
        );
        for warning in &snap.forecast_warnings {
            println!("{}", warning.message);
        }
        if !snap.last_error.is_empty() {
            eprintln!("warning: {}", snap.last_error);
        }
        return Ok(());
    }

    orchestrator.start();
    log::info!("refresh loop running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    orchestrator.stop();
    Ok(())
}
