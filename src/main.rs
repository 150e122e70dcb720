use drone_gcs::comms::RadioConnector;
use drone_gcs::config::GcsConfig;
use drone_gcs::console::{self, ConsoleCommand};
use drone_gcs::session::{EventReceiver, Lifecycle, SessionEvent};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GcsConfig::resolve(std::env::args().nth(1))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .init();

    info!("Ground station starting");
    info!("  Radio: {}", config.radio.endpoint());
    info!(
        "  Ack: {}s x {} attempts",
        config.ack.ack_timeout_secs, config.ack.max_retries
    );

    let (session, events) = Lifecycle::spawn(RadioConnector::new(config.connect_timeout()));
    tokio::spawn(log_events(events));

    info!("Type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!("{e:#}");
                continue;
            }
        };

        match console::execute(command, &session, &config).await {
            Ok(flow) if flow.is_break() => break,
            Ok(_) => {}
            Err(e) => error!("{e:#}"),
        }
    }

    session.shutdown();
    info!("Ground station stopped");
    Ok(())
}

/// Print session events as JSON lines for whatever is watching stdout
async fn log_events(mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        match &event {
            SessionEvent::Succeeded { message, .. } => info!("{message}"),
            SessionEvent::Failed { phase, message } => warn!("{phase} failed: {message}"),
            SessionEvent::TimedOut { phase } => warn!("{phase} timed out"),
            SessionEvent::FatalError { message } => error!("Fatal: {message}"),
            _ => {}
        }

        match serde_json::to_string(&event) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("Failed to serialize event: {e}"),
        }
    }
}
