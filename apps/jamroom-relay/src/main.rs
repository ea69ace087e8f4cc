use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use jamroom_relay::{
    cli::{self, Cli, Commands},
    config::Config,
    storage::{RedisRoomStore, RoomStore},
    websocket::RelayState,
};

#[tokio::main]
async fn main() {
    // Default to WARN if RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();

    if let Some(Commands::Tail { url, room, name }) = args.command {
        if let Err(e) = cli::run_tail_client(url, room, name).await {
            error!("Tail client error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env();
    info!("Starting jamroom relay on port {}", config.port);
    info!("Redis URL: {}", config.redis_url);
    info!("Snapshot TTL: {} seconds", config.snapshot_ttl_seconds);

    let store: Arc<dyn RoomStore> =
        match RedisRoomStore::new(&config.redis_url, config.snapshot_ttl_seconds).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to connect to Redis: {}", e);
                std::process::exit(1);
            }
        };

    let state = RelayState::new(store, &config);
    let app = jamroom_relay::app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("jamroom relay listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws?roomId=<roomId>", addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
