//! Poll/write handoff
//!
//! The poller and on-demand callers share one connection. The coordinator
//! gives on-demand callers ("writers", reads included) priority over the
//! next poll cycle with an explicit two-state handshake:
//!
//! ```text
//!            writer registers (pending += 1)
//!                         |
//!   poller, between cycles: pending > 0 ?
//!        yes: turn = Write, wake writer, wait for turn == Poll, recheck
//!        no:  run the next cycle
//!
//!   writer: wait for turn == Write, exchange,
//!           drop guard: pending -= 1, turn = Poll, wake poller
//! ```
//!
//! The poller always rechecks `pending` after being handed the turn back, so
//! a writer arriving during a handoff is served before the next cycle.
//! Writers are serialised among themselves by a FIFO async mutex; only the
//! writer holding it waits for the turn.
//!
//! Writers never wait forever: without a running poller they fail at once,
//! and a poller that does not hand over within the wait bound yields
//! [`ModbusError::PollerUnavailable`]. A writer that gives up never leaves
//! the poller waiting for a turn nobody will return.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ModbusError, ModbusResult};

/// Who may use the connection next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Poll,
    Write,
}

#[derive(Debug)]
struct Handoff {
    pending_writers: usize,
    turn: Turn,
}

pub struct Coordinator {
    handoff: Mutex<Handoff>,
    /// Signalled by the poller when the turn becomes `Write`
    write_turn: Notify,
    /// Signalled by writers when the turn returns to `Poll`
    poll_turn: Notify,
    /// Wakes a poller sleeping between cycles
    writer_arrived: Notify,
    writers: tokio::sync::Mutex<()>,
    poller_running: AtomicBool,
    handoffs: AtomicU64,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            handoff: Mutex::new(Handoff {
                pending_writers: 0,
                turn: Turn::Poll,
            }),
            write_turn: Notify::new(),
            poll_turn: Notify::new(),
            writer_arrived: Notify::new(),
            writers: tokio::sync::Mutex::new(()),
            poller_running: AtomicBool::new(false),
            handoffs: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, Handoff> {
        self.handoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending_writers(&self) -> usize {
        self.state().pending_writers
    }

    pub fn turn(&self) -> Turn {
        self.state().turn
    }

    /// Total number of times the poller handed the connection to a writer
    pub fn handoffs(&self) -> u64 {
        self.handoffs.load(Ordering::Relaxed)
    }

    pub fn is_poller_running(&self) -> bool {
        self.poller_running.load(Ordering::Acquire)
    }

    /// Mark the poller as running until the returned guard is dropped
    pub fn register_poller(&self) -> PollerPresence<'_> {
        self.poller_running.store(true, Ordering::Release);
        PollerPresence { coordinator: self }
    }

    // ------------------------------------------------------------------
    // Writer side
    // ------------------------------------------------------------------

    /// Wait until the poller hands over the connection.
    ///
    /// Holding the returned guard gives exclusive use of the connection;
    /// dropping it hands the turn back to the poller.
    pub async fn acquire_write_turn(&self, wait: Duration) -> ModbusResult<WriteTurn<'_>> {
        let unavailable = || ModbusError::poller_unavailable(wait.as_millis() as u64);
        if !self.is_poller_running() {
            debug!("Write requested with no poller running");
            return Err(ModbusError::poller_unavailable(0));
        }

        let deadline = Instant::now() + wait;
        let mut ticket = Ticket::register(self);

        let serial = timeout_at(deadline, self.writers.lock())
            .await
            .map_err(|_| unavailable())?;
        ticket.serial = Some(serial);

        loop {
            let granted = self.write_turn.notified();
            tokio::pin!(granted);
            granted.as_mut().enable();

            if self.state().turn == Turn::Write {
                break;
            }
            if !self.is_poller_running() {
                return Err(unavailable());
            }
            if timeout_at(deadline, granted).await.is_err() {
                if self.state().turn == Turn::Write {
                    break;
                }
                debug!("No handoff within {}ms", wait.as_millis());
                return Err(unavailable());
            }
        }

        trace!("Write turn granted");
        Ok(WriteTurn { _ticket: ticket })
    }

    /// Withdraw one pending writer. Hands the turn back when nobody else
    /// will: the withdrawing writer was the one allowed to wait for it, or
    /// it was the last one pending.
    fn withdraw(&self, held_serial: bool) {
        let hand_back = {
            let mut state = self.state();
            state.pending_writers = state.pending_writers.saturating_sub(1);
            let hand_back =
                state.turn == Turn::Write && (held_serial || state.pending_writers == 0);
            if hand_back {
                state.turn = Turn::Poll;
            }
            hand_back
        };
        if hand_back {
            self.poll_turn.notify_one();
        }
    }

    // ------------------------------------------------------------------
    // Poller side
    // ------------------------------------------------------------------

    /// Let every pending writer go first. Returns once no writer is pending
    /// and the turn is back with the poller, with the number of handoffs
    /// made.
    pub async fn yield_to_writers(&self, cancel: &CancellationToken) -> ModbusResult<u32> {
        let mut handoffs = 0;
        loop {
            let returned = self.poll_turn.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            let handed_over = {
                let mut state = self.state();
                match state.turn {
                    // a writer still holds the turn
                    Turn::Write => false,
                    Turn::Poll if state.pending_writers == 0 => return Ok(handoffs),
                    Turn::Poll => {
                        state.turn = Turn::Write;
                        true
                    }
                }
            };
            if handed_over {
                handoffs += 1;
                self.handoffs.fetch_add(1, Ordering::Relaxed);
                trace!("Handing connection to writer");
                self.write_turn.notify_one();
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ModbusError::Cancelled),
                _ = &mut returned => {}
            }
        }
    }

    /// Sleep between poll cycles, waking early when a writer arrives.
    /// A zero duration only yields to the scheduler.
    pub async fn wait_between_cycles(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> ModbusResult<()> {
        if cancel.is_cancelled() {
            return Err(ModbusError::Cancelled);
        }
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return Ok(());
        }

        let arrived = self.writer_arrived.notified();
        tokio::pin!(arrived);
        arrived.as_mut().enable();
        if self.pending_writers() > 0 {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ModbusError::Cancelled),
            _ = &mut arrived => Ok(()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Registration of a writer, from arrival until it finishes or gives up
struct Ticket<'a> {
    coordinator: &'a Coordinator,
    serial: Option<tokio::sync::MutexGuard<'a, ()>>,
}

impl<'a> Ticket<'a> {
    fn register(coordinator: &'a Coordinator) -> Self {
        coordinator.state().pending_writers += 1;
        coordinator.writer_arrived.notify_waiters();
        Self {
            coordinator,
            serial: None,
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        // runs before `serial` is released, so the next writer never sees
        // this writer's turn
        self.coordinator.withdraw(self.serial.is_some());
    }
}

/// Exclusive use of the connection ahead of the poller
pub struct WriteTurn<'a> {
    _ticket: Ticket<'a>,
}

/// Keeps the coordinator's poller-running flag set
pub struct PollerPresence<'a> {
    coordinator: &'a Coordinator,
}

impl Drop for PollerPresence<'_> {
    fn drop(&mut self) {
        self.coordinator
            .poller_running
            .store(false, Ordering::Release);
        // writers waiting for a turn re-check and fail fast
        self.coordinator.write_turn.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    const WAIT: Duration = Duration::from_secs(5);

    /// Poller stand-in: keeps yielding until cancelled
    fn spawn_yielder(
        coordinator: Arc<Coordinator>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<u32> {
        tokio::spawn(async move {
            let _presence = coordinator.register_poller();
            let mut total = 0;
            while let Ok(n) = coordinator.yield_to_writers(&cancel).await {
                total += n;
                if coordinator
                    .wait_between_cycles(Duration::from_millis(10), &cancel)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            total
        })
    }

    #[tokio::test]
    async fn test_no_poller_fails_fast() {
        let coordinator = Coordinator::new();
        let err = coordinator.acquire_write_turn(WAIT).await.err().unwrap();
        assert_eq!(err, ModbusError::PollerUnavailable { waited_ms: 0 });
        assert_eq!(coordinator.pending_writers(), 0);
    }

    #[tokio::test]
    async fn test_yield_without_writers_returns_immediately() {
        let coordinator = Coordinator::new();
        let _presence = coordinator.register_poller();
        let n = assert_ok!(coordinator.yield_to_writers(&CancellationToken::new()).await);
        assert_eq!(n, 0);
        assert_eq!(coordinator.turn(), Turn::Poll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_gets_turn_and_hands_back() {
        let coordinator = Arc::new(Coordinator::new());
        let cancel = CancellationToken::new();
        let poller = spawn_yielder(coordinator.clone(), cancel.clone());
        while !coordinator.is_poller_running() {
            tokio::task::yield_now().await;
        }

        {
            let _turn = assert_ok!(coordinator.acquire_write_turn(WAIT).await);
            assert_eq!(coordinator.turn(), Turn::Write);
        }
        assert_eq!(coordinator.pending_writers(), 0);
        assert_eq!(coordinator.turn(), Turn::Poll);

        {
            let _turn = assert_ok!(coordinator.acquire_write_turn(WAIT).await);
        }

        cancel.cancel();
        assert_eq!(poller.await.unwrap(), 2);
        assert_eq!(coordinator.handoffs(), 2);
        assert!(!coordinator.is_poller_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_poller_times_out() {
        let coordinator = Coordinator::new();
        // registered but never yields
        let _presence = coordinator.register_poller();

        let err = coordinator
            .acquire_write_turn(Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert_eq!(err, ModbusError::PollerUnavailable { waited_ms: 50 });
        assert_eq!(coordinator.pending_writers(), 0);
        assert_eq!(coordinator.turn(), Turn::Poll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_writer_timeout_does_not_strand_poller() {
        let coordinator = Arc::new(Coordinator::new());
        let cancel = CancellationToken::new();
        let _presence = coordinator.register_poller();

        let poller = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.yield_to_writers(&cancel).await })
        };

        let first = assert_ok!(coordinator.acquire_write_turn(WAIT).await);

        // queued behind `first`, gives up while it still holds the turn
        let second = coordinator.acquire_write_turn(Duration::from_millis(20)).await;
        assert!(matches!(second, Err(ModbusError::PollerUnavailable { .. })));
        assert_eq!(coordinator.pending_writers(), 1);

        drop(first);
        assert_eq!(assert_ok!(poller.await.unwrap()), 1);
        assert_eq!(coordinator.turn(), Turn::Poll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_exit_fails_waiting_writer() {
        let coordinator = Arc::new(Coordinator::new());
        let presence = coordinator.register_poller();

        let writer = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .acquire_write_turn(WAIT)
                    .await
                    .map(|_turn| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.pending_writers(), 1);

        drop(presence);
        let result = writer.await.unwrap();
        assert!(matches!(result, Err(ModbusError::PollerUnavailable { .. })));
        assert_eq!(coordinator.pending_writers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_yield() {
        let coordinator = Arc::new(Coordinator::new());
        let cancel = CancellationToken::new();
        let _presence = coordinator.register_poller();

        let poller = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.yield_to_writers(&cancel).await })
        };

        // the poller is parked waiting for the turn to come back
        let turn = assert_ok!(coordinator.acquire_write_turn(WAIT).await);
        cancel.cancel();
        assert_eq!(poller.await.unwrap(), Err(ModbusError::Cancelled));

        drop(turn);
        assert_eq!(coordinator.turn(), Turn::Poll);
        assert_eq!(coordinator.pending_writers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_arrival_cuts_sleep_short() {
        let coordinator = Arc::new(Coordinator::new());
        let cancel = CancellationToken::new();
        let _presence = coordinator.register_poller();

        let sleeper = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                coordinator
                    .wait_between_cycles(Duration::from_secs(60), &cancel)
                    .await
                    .unwrap();
                start.elapsed()
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let writer = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .acquire_write_turn(Duration::from_millis(100))
                    .await
                    .map(|_| ())
            })
        };

        let slept = sleeper.await.unwrap();
        assert!(slept < Duration::from_secs(1));

        // nobody yields here, so the writer eventually times out
        assert!(writer.await.unwrap().is_err());
    }
}
