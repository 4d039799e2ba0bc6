use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stocksync::net::{spawn_probe, ConnectivityMonitor};
use stocksync::remote::RestClient;
use stocksync::sync::SyncManager;
use stocksync::{config, db};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/stocksync.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let base_url = reqwest::Url::parse(&cfg.remote.base_url).context("invalid remote.base_url")?;
    let client = RestClient::new(
        base_url.clone(),
        cfg.remote.api_key.clone(),
        cfg.remote.access_token.clone(),
    );

    let user = client
        .current_user()
        .await
        .context("failed to resolve authenticated user")?;
    info!(user_id = %user.id, restaurant_id = %user.restaurant_id, "authenticated");

    // Start offline; the first probe corrects this within one interval.
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    spawn_probe(
        monitor.clone(),
        base_url,
        Duration::from_millis(cfg.app.probe_interval_ms),
    );

    let manager = Arc::new(SyncManager::new(
        pool,
        Arc::new(client),
        monitor.handle(),
        user.restaurant_id,
        cfg.sync_policy(),
    ));

    let backlog = manager.sync_backlog().await?;
    info!(
        unsynced = backlog.unsynced,
        dead = backlog.dead,
        "startup backlog"
    );

    // Replay triggers: reconnect transitions plus a periodic self-heal
    // tick. try_send on a bounded channel coalesces bursts.
    let (sync_tx, mut sync_rx) = tokio::sync::mpsc::channel::<()>(1);
    let trigger = sync_tx.clone();
    let _online_guard = manager.on_online(move || {
        let _ = trigger.try_send(());
    });

    let tick = sync_tx.clone();
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_sleep).await;
            let _ = tick.try_send(());
        }
    });

    info!("stocksync daemon running");
    while sync_rx.recv().await.is_some() {
        if !manager.is_online() {
            continue;
        }
        match manager.sync_offline_data().await {
            Ok(_) => {}
            Err(err) => error!(?err, "replay pass failed"),
        }
        if let Err(err) = manager.cache_inventory_items().await {
            warn!(?err, "inventory cache refresh failed");
        }
    }

    Ok(())
}
