//! Voltage Link Demo
//!
//! Runs a supervised master against a Modbus TCP server:
//! - connection supervision with reconnection
//! - background polling with heartbeat-based offline detection
//! - on-demand writes served ahead of the next poll cycle
//!
//! Usage: cargo run --features cli --bin demo [config.yaml]
//! Example: RUST_LOG=debug cargo run --features cli --bin demo demo.yaml
//!
//! Without a config file the demo connects to 127.0.0.1:502 and treats
//! discrete input 10001 as the heartbeat point.

use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voltage_link::{
    BatchResult, BatchSpec, ConnectionConfig, DataType, EventSink, LinkEvent, ModbusMaster,
    PointAddress, TableKind, TcpTransport, WriteCommand,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("{}", voltage_link::info());
    println!("=============================\n");

    // =========================================================================
    // Part 1: Configuration
    // =========================================================================
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let yaml = std::fs::read_to_string(&path)?;
            ConnectionConfig::from_yaml_str(&yaml)?
        }
        None => ConnectionConfig::new("127.0.0.1", 502)
            .with_device_id("demo")
            .with_heartbeat_point("link_down")
            .with_reconnect(2000, -1)
            .with_poll_interval_ms(1000),
    };
    println!("  Target: {}:{} (slave {})", config.host, config.port, config.slave_id);
    println!("  Heartbeat point: {}", config.heartbeat_point);

    // =========================================================================
    // Part 2: Batch specification
    // =========================================================================
    let spec = BatchSpec::new()
        .with_point(config.heartbeat_point.clone(), PointAddress::from_point_name("10001", DataType::Bit)?)?
        .with_point("run_state", PointAddress::coil(0))?
        .with_point("voltage", PointAddress::input_register(0, DataType::F32))?
        .with_point("current", PointAddress::input_register(2, DataType::F32))?
        .with_point("energy", PointAddress::input_register(4, DataType::U64))?
        .with_point("setpoint", PointAddress::holding_register(0, DataType::I32))?;
    println!("  Polling {} points\n", spec.len());

    // =========================================================================
    // Part 3: Start the master
    // =========================================================================
    let (events, mut event_rx) = EventSink::channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                LinkEvent::Connected => {}
                LinkEvent::LinkBroken => warn!("Remote link reported down"),
                other => info!("Link event: {:?}", other),
            }
        }
    });

    let transport = TcpTransport::from_config(&config);
    let master = ModbusMaster::start(
        config,
        transport,
        spec,
        |result: &BatchResult| {
            let mut points: Vec<_> = result.iter().collect();
            points.sort_by(|a, b| a.0.cmp(b.0));
            for (name, value) in points {
                println!("    {:<10} = {}", name, value);
            }
        },
        events,
    )
    .await?;

    let mut state = master.subscribe_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            println!("  State: {}", current);
        }
    });

    // =========================================================================
    // Part 4: On-demand commands
    // =========================================================================
    tokio::time::sleep(Duration::from_secs(3)).await;

    let response = master
        .write(TableKind::HoldingRegister, 0, -1200i32, DataType::I32)
        .await;
    match response.error_description() {
        None => println!("  Setpoint written"),
        Some(e) => error!("Setpoint write failed: {}", e),
    }

    let commands = [
        WriteCommand::from_point_name("00001", true, DataType::Bit)?,
        WriteCommand::from_point_name("40003", 7u16, DataType::U16)?,
    ];
    match master.write_batch(&commands).await {
        Ok(_) => println!("  Batch write applied"),
        Err(e) => error!("Batch write failed: {}", e),
    }

    match master.read_floats(TableKind::InputRegister, 0, 2).await {
        Ok(floats) => println!("  Voltage/current: {:?}", floats),
        Err(e) => error!("Float read failed: {}", e),
    }

    match master.write_coils(8, &[true, false, true]).await {
        Ok(_) => println!("  Coils 8..11 written"),
        Err(e) => error!("Coil write failed: {}", e),
    }
    match master.read_bits(TableKind::Coil, 8, 3).await {
        Ok(bits) => println!("  Coils 8..11: {:?}", bits),
        Err(e) => error!("Coil read failed: {}", e),
    }
    // clear the low nibble of holding register 1, keep the rest
    if let Err(e) = master.mask_write_register(1, 0xFFF0, 0x0000).await {
        error!("Mask write failed: {}", e);
    }

    // =========================================================================
    // Part 5: Run until ctrl-c
    // =========================================================================
    println!("\n  Polling, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    let stats = master.poller_stats();
    println!("\n  Cycles: {} ({} ok, {} failed, {} link down)",
        stats.cycles, stats.successful, stats.failed, stats.link_broken_cycles);
    master.shutdown().await;
    println!("  Demo completed");
    Ok(())
}
