use anyhow::Result;
use harvest_api::{run as run_api, ApiState};
use harvest_chat::{ChatService, MemoryRoomHub};
use harvest_core::{Config, HarvestContext};
use harvest_delivery::{default_channels, Channel};
use harvest_donations::DonationService;
use harvest_expiry::{run as run_expiry, ExpiryScanner};
use harvest_notify::{FanoutEngine, InboxService};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting GiveGood Harvest server");

    let config = Config::from_env();
    let ctx = HarvestContext::new(config).await?;
    tracing::info!("Harvest context initialized");

    let channels = default_channels(&ctx.config)?;
    tracing::info!(
        "Delivery channels: {}",
        channels.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
    );
    let fanout = FanoutEngine::new(ctx.store.clone(), channels, &ctx.config.fanout)
        .with_redis(ctx.redis_pool.clone());

    let chat = ChatService::new(ctx.store.clone(), Arc::new(MemoryRoomHub::new()));
    let donations = DonationService::new(ctx.store.clone(), Arc::new(fanout.clone()), chat.clone());
    let inbox = InboxService::new(ctx.store.clone(), ctx.redis_pool.clone());

    let scanner = ExpiryScanner::new(ctx.store.clone(), fanout, &ctx.config.expiry);
    tokio::spawn(async move {
        if let Err(e) = run_expiry(scanner).await {
            tracing::error!("Expiry scanner error: {}", e);
        }
    });

    // API server runs in main task
    let state = ApiState::new(ctx, donations, chat, inbox);
    tokio::select! {
        result = run_api(state) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
    }

    Ok(())
}
