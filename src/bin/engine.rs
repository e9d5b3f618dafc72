//! Capture synchronization engine
//!
//! Connects to the remote capture service, opens the local audio
//! device, and runs the sync loop until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capture_sync_engine::{
    audio::{list_input_devices, AudioCapture},
    config::AppConfig,
    error::Error,
    remote::{RemoteCaptureClient, WsTransport},
    resilience::{health_registry, retry, RetryPolicy, RetryStrategy},
    sync::SyncManager,
};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting capture synchronization engine");

    let config = AppConfig::load()?;

    println!("\n=== Available Audio Input Devices ===");
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("  (none found)");
    }
    for device in &devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, default_marker);
        println!("      Sample rates: {:?}", device.sample_rates);
        println!("      Channels: {:?}", device.channels);
    }
    println!();

    tracing::info!(endpoint = %config.remote.endpoint, "remote capture service");

    let transport = WsTransport::new(Duration::from_millis(config.remote.request_timeout_ms));
    let client = Arc::new(RemoteCaptureClient::new(
        config.remote.clone(),
        (&config.breaker).into(),
        Box::new(transport),
    ));
    let audio = Arc::new(AudioCapture::new(config.audio.clone()));
    let manager = Arc::new(SyncManager::new(client, audio, config.sync.clone()));

    // A cold remote service or busy audio device should not kill the
    // process outright; give startup a few tries.
    let policy = RetryPolicy::new(
        3,
        RetryStrategy::exponential(
            Duration::from_secs(2),
            2.0,
            Duration::from_secs(15),
        ),
    );
    retry(&policy, |_: &Error| true, || manager.start())?;
    manager.register_health_checks("engine");

    tracing::info!("Engine running - press Ctrl+C to stop");

    let mut status_timer = tokio::time::interval(STATUS_LOG_INTERVAL);
    status_timer.tick().await; // first tick fires immediately
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
            _ = status_timer.tick() => {
                let status = manager.status();
                tracing::info!(
                    connected = status.connected,
                    fps = format!("{:.1}", status.measured_fps),
                    frames = status.frame_history_len,
                    audio_segments = status.audio_history_len,
                    buffer_fill = format!("{:.0}%", status.audio_buffer_fill * 100.0),
                    sync_offset_ms = status.sync_offset_ms,
                    frames_captured = status.client.frames_captured,
                    fallback_frames = status.client.fallback_frames,
                    reconnects = status.client.reconnects,
                    "engine status"
                );
                let report = health_registry().run_all();
                if !report.all_healthy() {
                    for name in report.unhealthy() {
                        tracing::warn!(probe = name, "health check failing");
                    }
                }
            }
        }
    }

    SyncManager::unregister_health_checks("engine");
    let clean = manager.stop(STOP_TIMEOUT);
    manager.client().disconnect();
    if clean {
        tracing::info!("Engine stopped");
    } else {
        tracing::warn!("Capture loop did not stop cleanly");
    }
    Ok(())
}
