mod cli;

use std::time::Duration;

use orchestrator_protocol::{HeartbeatRequest, HeartbeatResponse};
use tracing_subscriber::EnvFilter;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const HEARTBEAT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = cli::parse_args()?;
    let orchestrator_url = std::env::var("ORCHESTRATOR_URL").unwrap_or_default();

    tracing::info!(
        room = %args.room,
        voice_id = %args.voice_id,
        "Connecting to room"
    );

    // A real pipeline would negotiate the room connection and the voice
    // persona here. This stub goes straight to the readiness marker the
    // controller's Spawner watches for.
    println!("Room joined: {}", args.room);
    if let Some(opening_line) = &args.opening_line {
        println!("Participant joined, speaking opening line: {opening_line}");
    } else {
        println!("Participant joined");
    }

    let client = reqwest::Client::builder()
        .timeout(HEARTBEAT_HTTP_TIMEOUT)
        .build()?;
    run_heartbeat_loop(&client, &orchestrator_url, &args.room).await;

    Ok(())
}

/// POST a heartbeat every minute until the controller tells us to stop or
/// the request itself fails repeatedly.
async fn run_heartbeat_loop(client: &reqwest::Client, orchestrator_url: &str, session_id: &str) {
    if orchestrator_url.is_empty() {
        tracing::warn!("ORCHESTRATOR_URL not set, heartbeats disabled");
        return;
    }
    let url = format!("{orchestrator_url}/api/session/heartbeat");

    loop {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;

        let response = client
            .post(&url)
            .json(&HeartbeatRequest {
                session_id: session_id.to_string(),
            })
            .send()
            .await;

        let body = match response {
            Ok(resp) => resp.json::<HeartbeatResponse>().await,
            Err(e) => {
                tracing::warn!("Heartbeat request failed: {e}");
                continue;
            }
        };

        match body {
            Ok(HeartbeatResponse { status, .. }) if status == "stop" => {
                tracing::info!("Controller requested stop, exiting");
                return;
            }
            Ok(HeartbeatResponse { status, message, .. }) => {
                tracing::debug!(status, ?message, "Heartbeat acknowledged");
            }
            Err(e) => {
                tracing::warn!("Failed to parse heartbeat response: {e}");
            }
        }
    }
}
