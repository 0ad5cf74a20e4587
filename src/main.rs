//! pktguard
//!
//! This is the main entry point for the capture monitor. It initializes
//! the pipeline components, starts the capture, and renders core events
//! until interrupted.

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use pktguard::cli::Cli;
use pktguard::config;
use pktguard::core::{CaptureController, CaptureSession, CaptureStatus};
use pktguard::events::{AlertKind, CoreEvent, EventBus};
use pktguard::models::MAX_BLOCK_DELAY_SECS;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    info!("Starting pktguard...");

    // Load configuration and overlay CLI flags
    let mut config = config::load_config().context("Failed to load configuration")?;
    cli.apply(&mut config);

    if cli.list_interfaces {
        let interfaces = CaptureSession::list_interfaces(&config.capture.tool_path)
            .await
            .context("Failed to list interfaces")?;
        for line in interfaces {
            println!("{}", line);
        }
        return Ok(());
    }

    // Caller-side validation; the capture session itself validates nothing.
    let tool_path = &config.capture.tool_path;
    if (tool_path.contains('/') || tool_path.contains('\\')) && !Path::new(tool_path).is_file() {
        anyhow::bail!("Capture tool not found at: {}", tool_path);
    }
    if config.capture.interface.trim().is_empty() {
        anyhow::bail!("Interface selection is empty");
    }
    if config.mitigation.block_delay_secs > MAX_BLOCK_DELAY_SECS {
        anyhow::bail!(
            "Block delay must be between 0 and {} seconds",
            MAX_BLOCK_DELAY_SECS
        );
    }

    let bus = EventBus::new(config.capture.event_buffer);
    let mut events = bus.subscribe();
    let json = cli.json;
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => render_event(&event, json),
                Err(RecvError::Lagged(n)) => warn!("Event consumer lagged, {} events dropped", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let handle = CaptureController::spawn(config, bus);
    handle.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");
    handle.shutdown();
    // Give the controller a moment to stop the capture process.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}

fn render_event(event: &CoreEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize event: {}", e),
        }
        return;
    }
    match event {
        CoreEvent::PacketRow(record) => {
            debug!(
                "{} {} {} -> {} {}",
                record.timestamp, record.protocol, record.source_ip, record.dest_ip, record.info
            );
        }
        CoreEvent::AlertRaised(alert) => match alert.kind {
            AlertKind::Dos | AlertKind::Ddos => warn!("ALERT: {}", alert.message),
            AlertKind::Info => info!("{}", alert.message),
        },
        CoreEvent::StatusChanged(status) => match status {
            CaptureStatus::Error(message) => warn!("Capture status: error ({})", message),
            other => info!("Capture status: {:?}", other),
        },
    }
}
