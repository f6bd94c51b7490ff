//! Entry point: load config, wire the channels, and tail admin events until Ctrl-C.

use std::sync::Arc;

use primus_realtime::config::Config;
use primus_realtime::repositories::FileStore;
use primus_realtime::Realtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(FileStore::open(config.storage_dir.clone())?);
    let realtime = Realtime::new(&config, store)?;
    if let Some(token) = &config.token {
        realtime.credentials.save_token(token)?;
    }
    realtime.credentials.require_token()?;

    match realtime.queue.flush_queue().await {
        Ok(report) if report.sent > 0 || report.remaining > 0 => {
            tracing::info!(sent = report.sent, remaining = report.remaining, "offline queue replayed");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "offline queue flush failed"),
    }

    let _events = realtime.socket.subscribe(|event| {
        tracing::info!(channel = "ws", topic = %event.topic, payload = %event.payload, "event");
    });
    let _bridge = realtime.connect();
    let _stream_events = realtime.stream.subscribe("*", |event| {
        tracing::info!(
            channel = "sse",
            topic = %event.topic,
            id = ?event.id,
            payload = %event.payload,
            "event"
        );
    });
    let _bell = realtime.notifications.subscribe_notifications(|list| {
        let unread = list.iter().filter(|n| !n.read).count();
        tracing::info!(total = list.len(), unread, "notifications");
    });

    tracing::info!(api = %realtime.api_base, "tailing admin events");
    tokio::signal::ctrl_c().await?;

    realtime.disconnect();
    tracing::info!("disconnected");
    Ok(())
}
