use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;

use shardgate::config::Config;
use shardgate::gateway::{intents, Collaborators, DispatchEvent, IdentifyQueue};
use shardgate::shards::ShardManager;
use shardgate::transport::WsConnector;

/// Keep a set of gateway shards connected and log their dispatches.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Gateway URL, overrides SHARDGATE_URL.
    #[arg(long)]
    url: Option<String>,

    /// Total shard count, overrides SHARDGATE_SHARD_COUNT.
    #[arg(long)]
    shard_count: Option<u32>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardgate=debug".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(url) = args.url {
        config.gateway_url = url;
    }
    if let Some(count) = args.shard_count.filter(|n| *n > 0) {
        config.shard_count = count;
        config.shards.retain(|id| *id < count);
        if config.shards.is_empty() {
            config.shards = (0..count).collect();
        }
    }
    print_banner(&config);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<DispatchEvent>();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::debug!(
                "shard {}: {} (seq {:?})",
                event.shard_id,
                event.name,
                event.sequence
            );
        }
    });

    let queue = IdentifyQueue::new(config.identify_interval, config.max_concurrency);
    let collaborators = Collaborators::new(
        Arc::new(WsConnector::new(config.api_version)),
        Arc::new(event_tx),
    )
    .with_identify_queue(Arc::new(queue));

    let manager = ShardManager::new(collaborators);
    for shard_id in &config.shards {
        manager.start(config.shard(*shard_id));
    }

    tokio::select! {
        _ = shutdown_signal() => tracing::info!("shutdown requested"),
        _ = manager.closed() => tracing::warn!("all shards closed"),
    }

    for (shard_id, result) in manager.shutdown().await {
        match result {
            Ok(()) => tracing::info!("shard {} closed", shard_id),
            Err(e) => tracing::error!("shard {} failed: {}", shard_id, e),
        }
    }
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let sha = env!("SHARDGATE_GIT_SHA");
    let shards = config
        .shards
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    eprintln!();
    eprintln!("  \x1b[1;36mshardgate\x1b[0m \x1b[2mv{version} ({sha})\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mgateway\x1b[0m      {}", config.gateway_url);
    eprintln!("  \x1b[2mapi\x1b[0m          v{}", config.api_version);
    eprintln!("  \x1b[2mshards\x1b[0m       {shards} of {}", config.shard_count);
    eprintln!("  \x1b[2mintents\x1b[0m      {}", config.intents);
    eprintln!("  \x1b[2midentify\x1b[0m     {:?} x{}", config.identify_interval, config.max_concurrency);

    if intents::has_privileged(config.intents) {
        eprintln!();
        eprintln!("  \x1b[33m! privileged intents requested\x1b[0m");
    }

    eprintln!();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
