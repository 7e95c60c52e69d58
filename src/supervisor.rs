//! Connection ownership and reconnection
//!
//! The supervisor is the only owner of the transport handle. Everyone else
//! leases it for exactly one exchange through [`ConnectionSupervisor::lease`];
//! the lease is a mutex guard, so it cannot outlive the exchange.
//!
//! State transitions published here:
//!
//! ```text
//! Disconnected --connect ok--> Connected
//! Disconnected --reconnect loop--> Connecting --ok--> Connected
//!                                            \--bound exhausted--> Disconnected
//! Connected <--heartbeat / failures (poller)--> Offline
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, MappedMutexGuard, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ConnectionConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::events::{EventSink, LinkEvent};
use crate::transport::{Transport, TransportHandle};

/// Health of the link as seen by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the heartbeat point reports the remote link as down
    /// or the last exchange failed
    Offline,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Exclusive handle lease for one exchange
pub type HandleLease<'a, H> = MappedMutexGuard<'a, H>;

pub struct ConnectionSupervisor<T: Transport> {
    transport: T,
    config: Arc<ConnectionConfig>,
    handle: Mutex<Option<T::Handle>>,
    has_handle: AtomicBool,
    state: watch::Sender<ConnectionState>,
    events: EventSink,
    reconnecting: AtomicBool,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(transport: T, config: Arc<ConnectionConfig>, events: EventSink) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            config,
            handle: Mutex::new(None),
            has_handle: AtomicBool::new(false),
            state,
            events,
            reconnecting: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("Link state {} -> {}", current, next);
            *current = next;
            true
        });
    }

    /// Whether a transport handle is currently held
    pub fn is_connected(&self) -> bool {
        self.has_handle.load(Ordering::Acquire)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Acquire)
    }

    /// One connection attempt. Never fails; `false` means no handle.
    pub async fn connect(&self) -> bool {
        self.attempt(1).await
    }

    async fn attempt(&self, attempt: u32) -> bool {
        let (host, port) = (self.config.host.as_str(), self.config.port);
        match self.transport.open(host, port).await {
            Ok(handle) => {
                *self.handle.lock().await = Some(handle);
                self.has_handle.store(true, Ordering::Release);
                info!("Connected to {}:{} (attempt {})", host, port, attempt);
                self.set_state(ConnectionState::Connected);
                true
            }
            Err(e) => {
                warn!("Connect attempt {} to {}:{} failed: {}", attempt, host, port, e);
                self.events.emit(LinkEvent::ConnectFailed {
                    attempt,
                    message: e.to_string(),
                });
                false
            }
        }
    }

    /// Retry until connected, the attempt bound is reached, or `cancel` fires.
    ///
    /// There is no delay after the last failed attempt. Returns whether a
    /// handle was established.
    pub async fn reconnect_loop(&self, cancel: &CancellationToken) -> bool {
        let limit = self.config.attempt_limit();
        if limit == Some(0) {
            self.give_up(0);
            return false;
        }

        self.set_state(ConnectionState::Connecting);
        let delay = self.config.reconnect_delay();
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abandon(),
                connected = self.attempt(attempt) => connected,
            };
            if connected {
                return true;
            }

            if limit.is_some_and(|max| attempt >= max) {
                self.give_up(attempt);
                return false;
            }

            debug!("Retrying connection in {}ms", delay.as_millis());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abandon(),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn give_up(&self, attempts: u32) {
        warn!("Giving up after {} reconnect attempts", attempts);
        self.set_state(ConnectionState::Disconnected);
        self.events.emit(LinkEvent::ReconnectExhausted { attempts });
    }

    fn abandon(&self) -> bool {
        debug!("Reconnect cancelled");
        if !self.is_connected() {
            self.set_state(ConnectionState::Disconnected);
        }
        false
    }

    /// Run the reconnect loop on its own task. At most one loop runs at a
    /// time; `None` when one is already running.
    pub fn spawn_reconnect(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<bool>> {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            debug!("Reconnect loop already running");
            return None;
        }

        let this = Arc::clone(self);
        let span = info_span!("modbus", device = %self.config.device_id);
        Some(tokio::spawn(
            async move {
                let _running = RunningFlag(&this.reconnecting);
                this.reconnect_loop(&cancel).await
            }
            .instrument(span),
        ))
    }

    /// Borrow the handle for one exchange
    pub async fn lease(&self) -> ModbusResult<HandleLease<'_, T::Handle>> {
        let guard = self.handle.lock().await;
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| ModbusError::NotConnected)
    }

    /// Drop the handle after a transport failure. Must not be called while
    /// holding a lease.
    pub async fn invalidate(&self) {
        let stale = self.handle.lock().await.take();
        self.has_handle.store(false, Ordering::Release);
        if let Some(mut handle) = stale {
            if let Err(e) = handle.close().await {
                debug!("Closing stale handle failed: {}", e);
            }
            info!("Transport handle invalidated");
        }
    }
}

/// Clears the single-flight flag when the reconnect task ends, also on panic
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
