/// Duet chat - interactive demo session
use chrono::Utc;
use duet_core::transport::{ChannelTransport, DisconnectedTransport, LoopbackPeer, Transport};
use duet_core::{demo, ChatSession, Config};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let (transport, outbound): (Arc<dyn Transport>, _) = if config.loopback.enabled {
        let (transport, rx) = ChannelTransport::new();
        (Arc::new(transport) as Arc<dyn Transport>, Some(rx))
    } else {
        (Arc::new(DisconnectedTransport) as Arc<dyn Transport>, None)
    };

    let mut session = ChatSession::from_config(&config, transport)
        .map_err(|e| anyhow::anyhow!("Session error: {}", e))?;
    if config.demo_history {
        demo::seed(&mut session, Utc::now())
            .map_err(|e| anyhow::anyhow!("Demo seed error: {}", e))?;
    }
    info!("🚀 Starting chat session");
    info!("   Session ID: {}", session.id());
    info!("   Local participant: {}", session.local().display_name);
    info!("   Contacts: {}", config.contacts.len());

    let (handle, task) = session.spawn(config.command_capacity);

    let loopback = outbound.map(|rx| LoopbackPeer::spawn(rx, handle.ingress(), config.loopback.clone()));

    duet_core::cli_app::run(handle, &config).await?;

    let session = task.await?;
    if let Some(loopback) = loopback {
        loopback.abort();
    }
    info!("Session {} stopped", session.id());
    Ok(())
}
