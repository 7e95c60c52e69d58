//! Background batch poller
//!
//! One poller task runs per link for as long as the master lives. Each cycle:
//!
//! 1. let pending writers go first ([`Coordinator::yield_to_writers`])
//! 2. lease the handle and read the whole batch
//! 3. an empty read is a failure, never an empty success
//! 4. check the heartbeat point: `true` means the remote link is down
//!    (state `Offline`, `LinkBroken` event, listener skipped unless the
//!    offline policy forwards), `false` means healthy (state `Connected`,
//!    listener invoked, `Connected` event)
//!
//! Failures never stop the loop. They mark the link `Offline`, emit a
//! diagnostic event plus `LinkBroken`, and back off. A transport-level
//! failure also drops the handle and starts the reconnect loop.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::batch::{BatchOutcome, BatchResult, BatchSpec};
use crate::config::{ConnectionConfig, OfflineResultPolicy};
use crate::coordinator::Coordinator;
use crate::error::{ModbusError, ModbusResult};
use crate::events::{EventSink, LinkEvent};
use crate::executor::CommandExecutor;
use crate::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::transport::Transport;

/// Receives every batch result the poller accepts.
///
/// Called on the poller task; a slow listener delays the next cycle.
pub trait ResultListener: Send + Sync + 'static {
    fn on_result(&self, result: &BatchResult);
}

impl<F> ResultListener for F
where
    F: Fn(&BatchResult) + Send + Sync + 'static,
{
    fn on_result(&self, result: &BatchResult) {
        self(result)
    }
}

/// Running totals for one poller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollerStats {
    pub cycles: u64,
    /// Cycles with a healthy heartbeat
    pub successful: u64,
    pub failed: u64,
    /// Cycles whose heartbeat reported the remote link down
    pub link_broken_cycles: u64,
    /// Times the poller let a writer go first
    pub handoffs: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub(crate) type SharedPollerStats = Arc<Mutex<PollerStats>>;

pub struct Poller<T: Transport> {
    supervisor: Arc<ConnectionSupervisor<T>>,
    coordinator: Arc<Coordinator>,
    executor: CommandExecutor,
    spec: Arc<BatchSpec>,
    listener: Arc<dyn ResultListener>,
    events: EventSink,
    config: Arc<ConnectionConfig>,
    stats: SharedPollerStats,
}

impl<T: Transport> Poller<T> {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor<T>>,
        coordinator: Arc<Coordinator>,
        spec: Arc<BatchSpec>,
        listener: Arc<dyn ResultListener>,
        events: EventSink,
    ) -> Self {
        let config = Arc::clone(supervisor.config());
        Self {
            executor: CommandExecutor::new(config.slave_id),
            supervisor,
            coordinator,
            spec,
            listener,
            events,
            config,
            stats: Arc::default(),
        }
    }

    pub(crate) fn stats_handle(&self) -> SharedPollerStats {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> PollerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_stats(&self, f: impl FnOnce(&mut PollerStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Run on a dedicated task until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let span = info_span!("modbus", device = %self.config.device_id);
        tokio::spawn(self.run(cancel).instrument(span))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let _presence = self.coordinator.register_poller();
        info!("Poller started with {} points", self.spec.len());

        let mut pause = self.config.initial_poll_delay();
        loop {
            if self
                .coordinator
                .wait_between_cycles(pause, &cancel)
                .await
                .is_err()
            {
                break;
            }

            pause = match self.cycle(&cancel).await {
                Ok(()) => self.config.poll_interval(),
                Err(ModbusError::Cancelled) => break,
                Err(e) => {
                    self.on_failure(e, &cancel).await;
                    self.config.failure_backoff()
                }
            };
        }

        info!("Poller stopped");
    }

    async fn cycle(&self, cancel: &CancellationToken) -> ModbusResult<()> {
        let handoffs = self.coordinator.yield_to_writers(cancel).await?;
        self.update_stats(|s| {
            s.cycles += 1;
            s.handoffs += u64::from(handoffs);
        });

        let outcome = {
            let mut lease = self.supervisor.lease().await?;
            self.executor.batch_read(&mut *lease, &self.spec).await?
        };
        let mut result = match outcome {
            BatchOutcome::Populated(result) => result,
            BatchOutcome::Empty => return Err(ModbusError::EmptyResult),
        };

        let link_broken = result
            .get_bool(&self.config.heartbeat_point)
            .ok_or_else(|| {
                ModbusError::protocol(format!(
                    "Heartbeat point {} missing from batch result",
                    self.config.heartbeat_point
                ))
            })?;

        if link_broken {
            warn!("Heartbeat {} reports the remote link down", self.config.heartbeat_point);
            self.update_stats(|s| s.link_broken_cycles += 1);
            self.supervisor.set_state(ConnectionState::Offline);
            self.events.emit(LinkEvent::LinkBroken);
            if self.config.offline_results == OfflineResultPolicy::Forward {
                result.set_link_broken(true);
                self.listener.on_result(&result);
            }
        } else {
            debug!("Poll cycle completed with {} values", result.len());
            self.update_stats(|s| {
                s.successful += 1;
                s.last_success = Some(Utc::now());
            });
            self.supervisor.set_state(ConnectionState::Connected);
            self.listener.on_result(&result);
            self.events.emit(LinkEvent::Connected);
        }
        Ok(())
    }

    async fn on_failure(&self, error: ModbusError, cancel: &CancellationToken) {
        self.update_stats(|s| {
            s.failed += 1;
            s.last_error = Some(error.to_string());
        });

        // no handle: the reconnect loop owns the state until it finishes
        if error == ModbusError::NotConnected {
            debug!("Skipping poll cycle, not connected");
            return;
        }

        warn!("Poll cycle failed: {}", error);
        self.supervisor.set_state(ConnectionState::Offline);
        self.events.emit(LinkEvent::from_error(&error));
        self.events.emit(LinkEvent::LinkBroken);

        if error.is_transport_failure() {
            self.supervisor.invalidate().await;
            self.supervisor.spawn_reconnect(cancel.clone());
        }
    }
}
