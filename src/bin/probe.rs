//! Capture probe
//!
//! Lists local audio input devices and, when the remote capture
//! service is reachable, its version and sources. Useful for checking
//! a deployment before running the engine.

use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capture_sync_engine::{
    audio::list_input_devices,
    config::AppConfig,
    remote::{CaptureTransport, WsTransport},
};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::load()?;
    if let Some(endpoint) = std::env::args().nth(1) {
        config.remote.endpoint = endpoint;
    }

    println!("=== Audio Input Devices ===");
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("  (none found)");
    }
    for device in devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, default_marker);
        println!("      Sample rates: {:?}", device.sample_rates);
        println!("      Channels: {:?}", device.channels);
    }

    println!("\n=== Remote Capture Service ===");
    println!("  Endpoint: {}", config.remote.endpoint);
    let mut transport = WsTransport::new(Duration::from_millis(config.remote.request_timeout_ms));
    match transport.open(&config.remote.endpoint, Duration::from_secs(3)) {
        Ok(version) => {
            println!("  Service version: {}", version.service_version);
            println!("  RPC version: {}", version.rpc_version);
            if let Some(platform) = &version.platform {
                println!("  Platform: {platform}");
            }
            match transport.request(capture_sync_engine::remote::Request::ListSources) {
                Ok(payload) => println!("  Sources: {payload}"),
                Err(e) => println!("  Source listing failed: {e}"),
            }
            transport.close();
        }
        Err(e) => println!("  Unreachable: {e}"),
    }

    Ok(())
}
