use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use stocksync::config::Config;
use stocksync::remote::{RemoteStore, RestClient};

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let raw = fs::read_to_string(&args.config)?;
    let cfg: Config = serde_yaml::from_str(&raw)?;
    let base_url = reqwest::Url::parse(&cfg.remote.base_url)?;
    let client = RestClient::new(base_url, cfg.remote.api_key.clone(), cfg.remote.access_token);

    let user = client.current_user().await?;
    println!("User: {} ({})", user.id, user.email.as_deref().unwrap_or("-"));
    println!("Restaurant: {}", user.restaurant_id);

    let items = client.fetch_inventory(&user.restaurant_id).await?;
    println!("Inventory ({} items):", items.len());
    for item in items {
        println!(
            "  {} | {} | stock {} {} (min {})",
            item.id, item.name, item.current_stock, item.unit, item.min_threshold
        );
    }
    Ok(())
}
