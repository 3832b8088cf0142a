//! Status command - show resolved configuration and data-tier health

use anyhow::{Context, Result};
use mocktrade_core::{CacheStatus, DataTier};

pub async fn run_status(tier: &DataTier) -> Result<()> {
    let config = tier.connection_config();
    println!("Primary store");
    println!("  source:   {}", config.source().as_str());
    println!("  target:   {}:{}/{}", config.host, config.port, config.database);
    println!("  user:     {}", config.user);
    println!(
        "  password: {}",
        if config.password.is_empty() { "(empty)" } else { "(set)" }
    );

    let pool = tier.pool().await.context("primary store unreachable")?;
    let (version,): (String,) = sqlx::query_as("SELECT version()")
        .fetch_one(&pool)
        .await
        .context("primary store query failed")?;
    println!("  server:   {version}");

    tier.connect_cache().await;
    let cache = match tier.cache_status() {
        CacheStatus::Connected => "available".to_string(),
        other => format!("degraded ({})", other.as_str()),
    };
    println!("Cache");
    println!("  status:   {cache}");
    Ok(())
}
