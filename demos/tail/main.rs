//! Live Tail Example
//!
//! Connects to the commission tracker's real-time endpoint and prints every
//! event and connection change until Ctrl-C:
//! - config from an optional YAML path (first argument)
//! - identity from `LIVE_SUBJECT_ID` / `LIVE_TOKEN`
//! - notification tray and dashboard counters attached like the web UI does
//!
//! ```text
//! LIVE_SUBJECT_ID=42 LIVE_TOKEN=... RUST_LOG=live=debug cargo run --example tail -- live.yaml
//! ```

use anyhow::{Context, Result};
use futures::StreamExt;
use live::prelude::*;
use tracing_subscriber::EnvFilter;

fn identity_from_env() -> Option<SessionIdentity> {
    let subject_id = std::env::var("LIVE_SUBJECT_ID").ok()?;
    let token = std::env::var("LIVE_TOKEN").ok()?;
    Some(SessionIdentity::new(subject_id, token))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ChannelConfig::from_yaml_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => ChannelConfig::default(),
    };

    let channel = ChannelBuilder::new()
        .with_config(config)
        .with_identity_provider(identity_from_env)
        .build()?;

    let tray = NotificationTray::from_config(channel.config());
    let dashboard = DashboardCounters::new();
    tray.attach(channel.bus());
    dashboard.attach(channel.bus());

    let printer = channel.bus().subscribe(None, |event| {
        println!(
            "[{}] {:<20} {:<6} {}",
            event.timestamp().format("%H:%M:%S"),
            event.event_type(),
            event.priority().as_str(),
            event.message()
        );
    });

    println!("🚀 Connecting to {}", channel.config().endpoint);
    channel.connect();

    let mut status = channel.watch_status();
    loop {
        tokio::select! {
            Some(status) = status.next() => {
                println!("📡 {} ({:?})", status.state, status.indicator());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!(
        "\n🔔 {} notifications ({} unread), {} events seen",
        tray.len(),
        tray.unread_count(),
        dashboard.total_events()
    );

    channel.bus().unsubscribe(printer);
    tray.detach();
    dashboard.detach();
    channel.shutdown().await;

    Ok(())
}
