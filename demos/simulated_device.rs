//! Bench run of the firmware on a simulated board
//!
//! A simulated peer connects after a few seconds, drops the link for a while,
//! then comes back. Every delivered snapshot is decoded and printed.
//!
//! Run with: cargo run --example simulated_device

use disense_ble::{
    DeviceConfig, Firmware, LoopbackTransport, Result, SimulatedBoard, SnapshotEvent, TokioClock,
};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("disense_ble=debug".parse().unwrap()),
        )
        .init();

    let config = DeviceConfig::default();
    let mut board = SimulatedBoard::new().with_force_pins(&[13, 12, 14, 27]);
    let (transport, peer) = LoopbackTransport::new();

    let mut firmware = Firmware::setup(config, &mut board, transport, TokioClock::new()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        println!("\nShutting down...");
        let _ = shutdown_tx.send(true);
    });

    // Scripted peer: connect, drop out, reconnect.
    let script = peer.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        println!(">> peer connected");
        script.set_connected(true);
        tokio::time::sleep(Duration::from_secs(16)).await;
        println!(">> peer disconnected");
        script.set_connected(false);
        tokio::time::sleep(Duration::from_secs(6)).await;
        println!(">> peer reconnected");
        script.set_connected(true);
    });

    let printer = peer.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(250)).await;
            for notification in printer.take_notifications() {
                match SnapshotEvent::decode(
                    &notification.uuid,
                    &notification.payload,
                    chrono::Utc::now(),
                ) {
                    Ok(event) => print_event(&event),
                    Err(e) => println!("undecodable notification: {}", e),
                }
            }
        }
    });

    println!("Press Ctrl+C to exit.\n");
    firmware.run(shutdown_rx).await?;

    let stats = firmware.stats();
    println!(
        "{} ticks, {} transmissions, {} failed notifications",
        stats.ticks, stats.transmissions, stats.failed_notifications
    );
    Ok(())
}

fn print_event(event: &SnapshotEvent) {
    let values: Vec<String> = event
        .records
        .iter()
        .map(|r| format!("#{}={:.2}", r.id, r.value))
        .collect();
    println!(
        "[{}] {:<10} {}",
        event.received_at.format("%H:%M:%S%.3f"),
        event.class,
        values.join("  ")
    );
}
