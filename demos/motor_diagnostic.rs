// Motor diagnostic: READ-ONLY check of all four drives
//
// This tool sends only status, alarm and analog queries - no motion commands.
// Use this first before running the runtime.
//
// Usage: cargo run --example motor_diagnostic -- [config.toml]

use std::path::PathBuf;

use automic_runtime::config::RigConfig;
use automic_runtime::motor::{ConnectionStatus, MotionCoordinator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse()?),
        )
        .init();

    // Get config path from args or use the built-in rig
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = RigConfig::load(path.as_deref())?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            AUTOMIC Motor Diagnostic (READ-ONLY)              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only QUERIES drives - no motion commands are sent ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    for motor in &config.motors {
        println!(
            "  {:<8} {}{}",
            motor.name,
            motor.address(),
            if motor.inverted { "  (inverted)" } else { "" }
        );
    }
    println!();

    let coordinator = MotionCoordinator::new(&config);

    // Probe each drive
    println!("Step 1: Requesting status (RS)...");
    let statuses = coordinator.check_connections().await;
    let mut all_found = true;
    for (name, status) in &statuses {
        match status {
            ConnectionStatus::Connected => println!("  ✓ {} RESPONDING", name),
            ConnectionStatus::Disconnected => {
                println!("  ✗ {} NO RESPONSE", name);
                all_found = false;
            }
        }
    }
    println!();

    if !all_found {
        println!("⚠ WARNING: Not all drives responded!");
        println!("  - Check drive power and Ethernet link lights");
        println!("  - Verify the IP address switch on each drive");
        println!("  - Confirm this machine is on both 192.168.0.x and 192.168.1.x");
        println!();
    }

    // Alarm codes
    println!("Step 2: Reading alarm codes (AL)...");
    for (name, result) in coordinator.read_alarms().await {
        match result {
            Ok(code) => println!("  {:<8} {}", name, code),
            Err(e) => println!("  {:<8} ERROR - {}", name, e),
        }
    }
    println!();

    // Tension sensors on analog input 1
    println!("Step 3: Reading analog input 1 (IFD, IA1)...");
    for (name, result) in coordinator.read_analog(1).await {
        match result {
            Ok(reading) => println!(
                "  {:<8} {:>6} counts  {:.3} V",
                name, reading.raw, reading.volts
            ),
            Err(e) => println!("  {:<8} ERROR - {}", name, e),
        }
    }
    println!();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("If all drives responded and report no alarms:");
    println!("  1. Start the runtime with 'cargo run'");
    println!("  2. Calibrate at the microphone's measured position before moving");

    Ok(())
}
