//! Command surface
//!
//! [`ModbusMaster`] ties the pieces together for one remote device: it owns
//! the supervisor, starts the poller and serves on-demand commands ahead of
//! the next poll cycle.
//!
//! Single-point commands never return `Err`. Every failure is converted into
//! a [`Response`] with status `Error` and logged with its category. Batch and
//! range commands return [`ModbusResult`] directly.
//!
//! ```rust,no_run
//! use voltage_link::{
//!     BatchResult, BatchSpec, ConnectionConfig, DataType, EventSink, ModbusMaster,
//!     PointAddress, TableKind, TcpTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> voltage_link::ModbusResult<()> {
//!     let config = ConnectionConfig::new("127.0.0.1", 502).with_heartbeat_point("hb");
//!     let spec = BatchSpec::new()
//!         .with_point("hb", PointAddress::discrete_input(0))?
//!         .with_point("power", PointAddress::holding_register(0, DataType::F32))?;
//!
//!     let master = ModbusMaster::start(
//!         config,
//!         TcpTransport::default(),
//!         spec,
//!         |result: &BatchResult| println!("{} values", result.len()),
//!         EventSink::disabled(),
//!     )
//!     .await?;
//!
//!     let response = master.write(TableKind::HoldingRegister, 0, 12.5f32, DataType::F32).await;
//!     println!("write: {}", response.code());
//!
//!     master.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::batch::{BatchOutcome, BatchResult, BatchSpec};
use crate::config::ConnectionConfig;
use crate::coordinator::{Coordinator, WriteTurn};
use crate::error::{ModbusError, ModbusResult};
use crate::events::{EventSink, LinkEvent};
use crate::executor::CommandExecutor;
use crate::poller::{Poller, PollerStats, ResultListener, SharedPollerStats};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, HandleLease};
use crate::transport::Transport;
use crate::types::{DataType, PointAddress, Response, TableKind, WriteCommand};
use crate::value::ModbusValue;

/// Master-side engine for one device
pub struct ModbusMaster<T: Transport> {
    config: Arc<ConnectionConfig>,
    supervisor: Arc<ConnectionSupervisor<T>>,
    coordinator: Arc<Coordinator>,
    executor: CommandExecutor,
    events: EventSink,
    cancel: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
    stats: SharedPollerStats,
    span: Span,
}

/// Connection lease taken ahead of the poller. The lease is released before
/// the turn goes back.
struct Exclusive<'a, H> {
    lease: HandleLease<'a, H>,
    _turn: WriteTurn<'a>,
}

impl<T: Transport> ModbusMaster<T> {
    /// Validate the setup, connect and start polling.
    ///
    /// A failed first connect is not an error: the reconnect loop takes over
    /// and the poller skips cycles until a handle exists. Only configuration
    /// problems fail here.
    pub async fn start(
        config: ConnectionConfig,
        transport: T,
        spec: BatchSpec,
        listener: impl ResultListener,
        events: EventSink,
    ) -> ModbusResult<Self> {
        config.validate()?;
        match spec.get(&config.heartbeat_point) {
            Some(address) if address.data_type == DataType::Bit => {}
            Some(address) => {
                return Err(ModbusError::configuration(format!(
                    "Heartbeat point {} must be a bit, found {}",
                    config.heartbeat_point, address
                )))
            }
            None => {
                return Err(ModbusError::configuration(format!(
                    "Heartbeat point {} is not part of the batch",
                    config.heartbeat_point
                )))
            }
        }

        let config = Arc::new(config);
        let span = info_span!("modbus", device = %config.device_id);
        let cancel = CancellationToken::new();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            transport,
            Arc::clone(&config),
            events.clone(),
        ));
        let coordinator = Arc::new(Coordinator::new());

        let connected = supervisor.connect().instrument(span.clone()).await;
        if !connected {
            span.in_scope(|| warn!("Initial connect failed, starting reconnect loop"));
            supervisor.spawn_reconnect(cancel.clone());
        }

        let poller = Poller::new(
            Arc::clone(&supervisor),
            Arc::clone(&coordinator),
            Arc::new(spec),
            Arc::new(listener),
            events.clone(),
        );
        let stats = poller.stats_handle();
        let task = poller.spawn(cancel.clone());

        span.in_scope(|| info!("Master started for {}:{}", config.host, config.port));
        Ok(Self {
            executor: CommandExecutor::new(config.slave_id),
            config,
            supervisor,
            coordinator,
            events,
            cancel,
            poller: Mutex::new(Some(task)),
            stats,
            span,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    /// Whether a transport handle is currently held
    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn poller_stats(&self) -> PollerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ------------------------------------------------------------------
    // Single-point commands
    // ------------------------------------------------------------------

    pub async fn read(&self, table: TableKind, offset: u16, data_type: DataType) -> Response {
        let address = PointAddress::new(table, offset, data_type);
        self.respond("read", async { self.read_address(&address).await.map(Some) })
            .await
    }

    /// Write one point. A successful response carries `Bool(true)`.
    pub async fn write(
        &self,
        table: TableKind,
        offset: u16,
        value: impl Into<ModbusValue>,
        data_type: DataType,
    ) -> Response {
        let address = PointAddress::new(table, offset, data_type);
        let value = value.into();
        self.respond("write", async {
            self.write_address(&address, value)
                .await
                .map(|written| Some(ModbusValue::Bool(written)))
        })
        .await
    }

    /// Read by point name, e.g. `"40001"` for the first holding register
    pub async fn read_point(&self, name: &str, data_type: DataType) -> Response {
        self.respond("read", async {
            let address = PointAddress::from_point_name(name, data_type)?;
            self.read_address(&address).await.map(Some)
        })
        .await
    }

    pub async fn write_point(
        &self,
        name: &str,
        value: impl Into<ModbusValue>,
        data_type: DataType,
    ) -> Response {
        let value = value.into();
        self.respond("write", async {
            let address = PointAddress::from_point_name(name, data_type)?;
            self.write_address(&address, value)
                .await
                .map(|written| Some(ModbusValue::Bool(written)))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Batch commands
    // ------------------------------------------------------------------

    /// Apply the commands in order under one turn, stopping at the first
    /// failure
    pub async fn write_batch(&self, commands: &[WriteCommand]) -> ModbusResult<bool> {
        async {
            for command in commands {
                command.address.validate_for_write()?;
            }
            let result = async {
                let mut exclusive = self.exclusive().await?;
                self.executor.write_all(&mut *exclusive.lease, commands).await
            }
            .await;
            self.observe(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Read an ad hoc batch ahead of the poller; `None` when nothing came back
    pub async fn read_batch(&self, spec: &BatchSpec) -> ModbusResult<Option<BatchResult>> {
        async {
            let result = async {
                let mut exclusive = self.exclusive().await?;
                self.executor.batch_read(&mut *exclusive.lease, spec).await
            }
            .await;
            match self.observe(result)? {
                BatchOutcome::Populated(result) => Ok(Some(result)),
                BatchOutcome::Empty => {
                    debug!("Ad hoc batch read returned nothing");
                    Ok(None)
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Read `count` consecutive f32 values from a register table
    pub async fn read_floats(
        &self,
        table: TableKind,
        offset: u16,
        count: u16,
    ) -> ModbusResult<Vec<f32>> {
        async {
            let result = async {
                let mut exclusive = self.exclusive().await?;
                self.executor
                    .read_floats(&mut *exclusive.lease, table, offset, count)
                    .await
            }
            .await;
            self.observe(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Read `count` consecutive coils or discrete inputs
    pub async fn read_bits(
        &self,
        table: TableKind,
        offset: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>> {
        async {
            let result = async {
                let mut exclusive = self.exclusive().await?;
                self.executor
                    .read_bits(&mut *exclusive.lease, table, offset, count)
                    .await
            }
            .await;
            self.observe(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Write consecutive coils starting at `offset` in one request
    pub async fn write_coils(&self, offset: u16, values: &[bool]) -> ModbusResult<bool> {
        async {
            let result = async {
                let mut exclusive = self.exclusive().await?;
                self.executor
                    .write_coils(&mut *exclusive.lease, offset, values)
                    .await
            }
            .await;
            self.observe(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Keep the holding register bits selected by `and_mask` and take the
    /// others from `or_mask`
    pub async fn mask_write_register(
        &self,
        offset: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<bool> {
        async {
            let result = async {
                let mut exclusive = self.exclusive().await?;
                self.executor
                    .mask_write_register(&mut *exclusive.lease, offset, and_mask, or_mask)
                    .await
            }
            .await;
            self.observe(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Stop the poller and any reconnect loop, then close the connection
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                self.span
                    .in_scope(|| error!("Poller task ended abnormally: {}", e));
            }
        }
        self.supervisor.invalidate().instrument(self.span.clone()).await;
        self.supervisor.set_state(ConnectionState::Disconnected);
        self.span.in_scope(|| info!("Master shut down"));
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn read_address(&self, address: &PointAddress) -> ModbusResult<ModbusValue> {
        address.validate_for_read()?;
        let result = async {
            let mut exclusive = self.exclusive().await?;
            self.executor.read(&mut *exclusive.lease, address).await
        }
        .await;
        self.observe(result)
    }

    async fn write_address(&self, address: &PointAddress, value: ModbusValue) -> ModbusResult<bool> {
        address.validate_for_write()?;
        let result = async {
            let mut exclusive = self.exclusive().await?;
            self.executor.write(&mut *exclusive.lease, address, &value).await
        }
        .await;
        self.observe(result)
    }

    /// Take the turn from the poller, refuse while offline, then lease
    async fn exclusive(&self) -> ModbusResult<Exclusive<'_, T::Handle>> {
        let turn = self
            .coordinator
            .acquire_write_turn(self.config.handoff_timeout())
            .await?;
        if self.supervisor.state() == ConnectionState::Offline {
            return Err(ModbusError::Offline);
        }
        let lease = self.supervisor.lease().await?;
        Ok(Exclusive { lease, _turn: turn })
    }

    /// Record link-level consequences of an on-demand failure. The handle is
    /// kept; the poller's next cycle decides whether to reconnect.
    fn observe<V>(&self, result: ModbusResult<V>) -> ModbusResult<V> {
        if let Err(e) = &result {
            if e.is_transport_failure() && *e != ModbusError::NotConnected {
                self.supervisor.set_state(ConnectionState::Offline);
                self.events.emit(LinkEvent::from_error(e));
            } else if e.is_protocol_failure() {
                self.events.emit(LinkEvent::from_error(e));
            }
        }
        result
    }

    async fn respond(
        &self,
        operation: &str,
        command: impl Future<Output = ModbusResult<Option<ModbusValue>>>,
    ) -> Response {
        match command.instrument(self.span.clone()).await {
            Ok(result) => Response::success(result),
            Err(e) => {
                self.span.in_scope(|| log_failure(operation, &e));
                Response::failure(e)
            }
        }
    }
}

impl<T: Transport> Drop for ModbusMaster<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn log_failure(operation: &str, e: &ModbusError) {
    if e.is_transport_failure() {
        error!("Communication error during {}: {}", operation, e);
    } else if e.is_protocol_failure() || matches!(e, ModbusError::Offline) {
        warn!("Error response to {}: {}", operation, e);
    } else if e.is_configuration_error() {
        warn!("Invalid {} request: {}", operation, e);
    } else {
        error!("Unexpected error during {}: {}", operation, e);
    }
}
