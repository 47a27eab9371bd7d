//! Companion receiver: connect to a Disense device and print its snapshots
//!
//! Run with: cargo run --example companion_monitor [device-name]

use disense_ble::{
    celsius_to_fahrenheit, DisenseMonitor, MonitorConfig, Result, SensorClass, SnapshotEvent,
};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let mut config = MonitorConfig::default().with_scan_timeout(Duration::from_secs(20));
    if let Some(name) = std::env::args().nth(1) {
        config = config.with_device_name(name);
    }

    println!("Disense Monitor");
    println!("===============\n");
    println!("Looking for {}...", config.device_name.as_deref().unwrap_or("any device"));

    let monitor = DisenseMonitor::connect(config).await?;
    println!(
        "Connected to {}. Press Ctrl+C to exit.\n",
        monitor.device_name().unwrap_or("device")
    );

    let mut rx = monitor.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            received = rx.recv() => match received {
                Ok(event) => {
                    display(&event);
                    if event.class == SensorClass::Oxygen {
                        monitor.acknowledge(&[1]).await?;
                    }
                }
                Err(RecvError::Lagged(n)) => println!("(skipped {} snapshots)", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    monitor.disconnect().await?;
    Ok(())
}

fn display(event: &SnapshotEvent) {
    let time = event.received_at.format("%H:%M:%S");
    match event.class {
        SensorClass::Thermistor => {
            println!("[{}] Temperatures:", time);
            for record in &event.records {
                if record.value.is_nan() {
                    println!("  T{}: --", record.id);
                } else {
                    println!(
                        "  T{}: {:.2}°C ({:.1}°F)",
                        record.id,
                        record.value,
                        celsius_to_fahrenheit(record.value)
                    );
                }
            }
        }
        SensorClass::Force => {
            println!("[{}] Forces:", time);
            for record in &event.records {
                println!("  F{}: {:.2} N", record.id, record.value);
            }
        }
        SensorClass::Oxygen => {
            for record in &event.records {
                println!("[{}] SpO2 #{}: {:.0}%", time, record.id, record.value);
            }
        }
    }
}
