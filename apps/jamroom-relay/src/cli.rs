use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "jamroom-relay")]
#[command(about = "Jam room sync relay server and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a room and print every envelope the relay delivers
    Tail {
        /// Relay URL (e.g., ws://localhost:8080)
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,

        /// Room ID to join
        #[arg(short, long)]
        room: String,

        /// Participant identity to present (random if omitted)
        #[arg(long)]
        name: Option<String>,
    },
}

/// Debug client: join a room over a real WebSocket and dump everything the
/// relay sends. First frame after joining a non-fresh room is `sync-state`.
pub async fn run_tail_client(url: String, room: String, name: Option<String>) -> Result<()> {
    let ws_url = format!("{}/ws?roomId={}", url.trim_end_matches('/'), room);
    debug!("Connecting to {}", ws_url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", ws_url, e);
            return Err(anyhow::anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            return Err(anyhow::anyhow!("Connection timeout - is the relay running?"));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let participant_id = name.unwrap_or_else(|| Uuid::new_v4().to_string());
    let join = json!({
        "type": "join",
        "roomId": room,
        "senderId": participant_id,
    });
    write.send(Message::Text(join.to_string().into())).await?;
    eprintln!("joined room {room} as {participant_id}; waiting for envelopes (ctrl-c to stop)");

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) => {
                    let kind = value
                        .get("type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    println!("[{kind}] {value}");
                }
                Err(_) => println!("[raw] {text}"),
            },
            Message::Close(_) => {
                eprintln!("relay closed the connection");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
