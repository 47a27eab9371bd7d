//! Run the firmware against a real BlueZ adapter with simulated sensors
//!
//! Any BLE central (a phone, or the companion_monitor demo on another
//! machine) can connect and subscribe.
//!
//! Run with: cargo run --example bluez_device --features bluez

use disense_ble::{BluezTransport, DeviceConfig, Firmware, Result, SimulatedBoard, TokioClock};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("disense_ble=info".parse().unwrap()),
        )
        .init();

    let config = DeviceConfig::default();
    let transport = BluezTransport::from_config(&config);
    let mut acks = transport.subscribe_writes();
    tokio::spawn(async move {
        while let Ok(write) = acks.recv().await {
            println!("acknowledgment: {:02x?}", write.value);
        }
    });

    let mut board = SimulatedBoard::new().with_force_pins(&[13, 12, 14, 27]);
    let mut firmware = Firmware::setup(config, &mut board, transport, TokioClock::new()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    println!("Advertising. Press Ctrl+C to exit.");
    firmware.run(shutdown_rx).await
}
