//! # Voltage Link - Supervised Modbus Master Connection
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! Keeps one live Modbus connection to one remote device, polls a batch of
//! points in the background and lets on-demand reads and writes cut in line
//! ahead of the next poll cycle.
//!
//! ## Features
//!
//! - **Supervised connection**: bounded or unbounded reconnection with a fixed delay
//! - **Background polling**: one batch read per cycle, results pushed to a listener
//! - **Write priority**: on-demand commands are served before the next poll cycle
//! - **Offline detection**: a designated heartbeat point reports the remote link state
//! - **Typed values**: bool, 16/32/64-bit integers, f32/f64 and word-swapped variants
//! - **Transport-agnostic**: the engine talks to a [`Transport`] trait; Modbus TCP ships
//!   behind the `tcp` feature
//!
//! ## Architecture
//!
//! ```text
//!  ModbusMaster ──┬── ConnectionSupervisor ── Transport / TransportHandle
//!                 ├── Coordinator (poll/write handoff)
//!                 ├── Poller ── ResultListener
//!                 └── CommandExecutor ── codec
//!  EventSink <── supervisor, poller, on-demand failures
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_link::{
//!     BatchResult, BatchSpec, ConnectionConfig, DataType, EventSink, ModbusMaster,
//!     ModbusResult, PointAddress, TcpTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = ConnectionConfig::new("127.0.0.1", 502)
//!         .with_device_id("pcs-01")
//!         .with_heartbeat_point("link_down");
//!
//!     let spec = BatchSpec::new()
//!         .with_point("link_down", PointAddress::discrete_input(0))?
//!         .with_point("voltage", PointAddress::input_register(0, DataType::F32))?;
//!
//!     let transport = TcpTransport::from_config(&config);
//!     let master = ModbusMaster::start(
//!         config,
//!         transport,
//!         spec,
//!         |result: &BatchResult| println!("voltage = {:?}", result.get("voltage")),
//!         EventSink::disabled(),
//!     )
//!     .await?;
//!
//!     let response = master.write_point("00001", true, DataType::Bit).await;
//!     println!("write returned {}", response.code());
//!
//!     master.shutdown().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants and engine defaults
pub mod constants;

/// Request/response model for the supported function codes
pub mod protocol;

/// Typed values carried by points
pub mod value;

/// Tables, data types, addresses and command responses
pub mod types;

/// Conversion between raw register/coil payloads and typed values
pub mod codec;

/// Batch specifications, block planning and batch results
pub mod batch;

/// Transport interface consumed by the engine
pub mod transport;

/// Modbus TCP transport
#[cfg(feature = "tcp")]
pub mod tcp;

// ============================================================================
// Engine modules
// ============================================================================

/// Connection configuration
pub mod config;

/// Link events for observers
pub mod events;

/// Connection ownership and reconnection
pub mod supervisor;

/// Single-exchange command dispatch
pub mod executor;

/// Poll/write handoff
pub mod coordinator;

/// Background batch poller
pub mod poller;

/// Command surface
pub mod master;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_link::tokio) ===
pub use tokio;
pub use tokio_util::sync::CancellationToken;

// === Command surface ===
pub use master::ModbusMaster;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use batch::{BatchOutcome, BatchResult, BatchSpec};
pub use codec::WordOrder;
pub use protocol::{ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
pub use types::{DataType, PointAddress, Response, ResponseStatus, TableKind, WriteCommand};
pub use value::ModbusValue;

// === Engine ===
pub use config::{ConnectionConfig, OfflineResultPolicy};
pub use coordinator::{Coordinator, Turn};
pub use events::{EventSink, LinkEvent};
pub use executor::CommandExecutor;
pub use poller::{Poller, PollerStats, ResultListener};
pub use supervisor::{ConnectionState, ConnectionSupervisor};

// === Transport ===
pub use transport::{Transport, TransportHandle, TransportStats};

#[cfg(feature = "tcp")]
pub use tcp::{TcpHandle, TcpTransport};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    DEFAULT_TCP_PORT, MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
    MAX_WRITE_REGISTERS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage Link v{} - Supervised Modbus master connection by Evan Liu",
        VERSION
    )
}
