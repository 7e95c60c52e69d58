//! Shared fixtures for the integration tests
//!
//! [`MockDevice`] is an in-memory register image behind a scripted
//! transport. Every exchange is recorded, can be delayed, and can be made to
//! fail, so tests can observe ordering and overlap of exchanges.

#![allow(dead_code)]
// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use voltage_link::{
    codec, BatchResult, BatchSpec, ConnectionConfig, DataType, LinkEvent, ModbusError,
    ModbusFunction, ModbusRequest, ModbusResponse, ModbusResult, PointAddress, ResultListener,
    SlaveId, TableKind, Transport, TransportHandle,
};

pub const HEARTBEAT: &str = "hb";

#[derive(Default)]
pub struct MockDevice {
    bits: Mutex<HashMap<(TableKind, u16), bool>>,
    words: Mutex<HashMap<(TableKind, u16), u16>>,
    requests: Mutex<Vec<ModbusRequest>>,
    opens: Mutex<Vec<Instant>>,
    refuse_opens: AtomicUsize,
    failures: Mutex<VecDeque<ModbusError>>,
    empty_batches: AtomicUsize,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDevice {
    pub fn set_bit(&self, table: TableKind, offset: u16, value: bool) {
        self.bits.lock().unwrap().insert((table, offset), value);
    }

    pub fn bit(&self, table: TableKind, offset: u16) -> bool {
        self.bits
            .lock()
            .unwrap()
            .get(&(table, offset))
            .copied()
            .unwrap_or(false)
    }

    pub fn set_word(&self, table: TableKind, offset: u16, value: u16) {
        self.words.lock().unwrap().insert((table, offset), value);
    }

    pub fn word(&self, table: TableKind, offset: u16) -> u16 {
        self.words
            .lock()
            .unwrap()
            .get(&(table, offset))
            .copied()
            .unwrap_or(0)
    }

    /// Heartbeat lives at discrete input 0; `true` means the remote link is down
    pub fn set_link_down(&self, down: bool) {
        self.set_bit(TableKind::DiscreteInput, 0, down);
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_opens(&self, count: usize) {
        self.refuse_opens.store(count, Ordering::SeqCst);
    }

    pub fn refuse_all_opens(&self) {
        self.refuse_opens(usize::MAX);
    }

    /// Fail the next exchange with `error`
    pub fn fail_next(&self, error: ModbusError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Answer the next `count` batch reads with no values at all
    pub fn return_empty_batches(&self, count: usize) {
        self.empty_batches.store(count, Ordering::SeqCst);
    }

    fn take_empty_batch(&self) -> bool {
        self.empty_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn requests(&self) -> Vec<ModbusRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn writes(&self) -> Vec<ModbusRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !r.function.is_read())
            .collect()
    }

    pub fn opens(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Record a connection attempt, refusing it while refusals are pending
    pub fn open(&self) -> ModbusResult<()> {
        self.opens.lock().unwrap().push(Instant::now());
        let refused = self
            .refuse_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if refused {
            Err(ModbusError::connection("connection refused"))
        } else {
            Ok(())
        }
    }

    /// Serve one request against the register image
    pub fn apply(&self, request: &ModbusRequest) -> ModbusResponse {
        let slave = request.slave_id;
        let function = request.function;
        let start = request.address;
        let offsets = (0..request.quantity).map(|i| start.wrapping_add(i));

        match function {
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                let table = if function == ModbusFunction::ReadCoils {
                    TableKind::Coil
                } else {
                    TableKind::DiscreteInput
                };
                let bits: Vec<bool> = offsets.map(|o| self.bit(table, o)).collect();
                ModbusResponse::from_bits(slave, function, &bits)
            }
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                let table = if function == ModbusFunction::ReadHoldingRegisters {
                    TableKind::HoldingRegister
                } else {
                    TableKind::InputRegister
                };
                let words: Vec<u16> = offsets.map(|o| self.word(table, o)).collect();
                ModbusResponse::from_registers(slave, function, &words)
            }
            ModbusFunction::WriteSingleCoil => {
                self.set_bit(TableKind::Coil, start, request.data == [0xFF, 0x00]);
                echo(request)
            }
            ModbusFunction::WriteSingleRegister => {
                let value = u16::from_be_bytes([request.data[0], request.data[1]]);
                self.set_word(TableKind::HoldingRegister, start, value);
                echo(request)
            }
            ModbusFunction::WriteMultipleCoils => {
                let bits =
                    codec::bools_from_bytes(&request.data, usize::from(request.quantity)).unwrap();
                for (offset, bit) in offsets.zip(bits) {
                    self.set_bit(TableKind::Coil, offset, bit);
                }
                echo(request)
            }
            ModbusFunction::WriteMultipleRegisters => {
                let words = codec::words_from_bytes(&request.data).unwrap();
                for (offset, word) in offsets.zip(words) {
                    self.set_word(TableKind::HoldingRegister, offset, word);
                }
                echo(request)
            }
            ModbusFunction::MaskWriteRegister => {
                let masks = codec::words_from_bytes(&request.data).unwrap();
                let (and_mask, or_mask) = (masks[0], masks[1]);
                let current = self.word(TableKind::HoldingRegister, start);
                let value = (current & and_mask) | (or_mask & !and_mask);
                self.set_word(TableKind::HoldingRegister, start, value);
                let pdu = request.to_pdu();
                ModbusResponse::new(slave, function, pdu[1..].to_vec())
            }
        }
    }
}

fn echo(request: &ModbusRequest) -> ModbusResponse {
    let pdu = request.to_pdu();
    ModbusResponse::new(request.slave_id, request.function, pdu[1..5].to_vec())
}

#[derive(Clone)]
pub struct MockTransport {
    device: Arc<MockDevice>,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<MockDevice>) {
        let device = Arc::new(MockDevice::default());
        (
            Self {
                device: Arc::clone(&device),
            },
            device,
        )
    }
}

pub struct MockHandle {
    device: Arc<MockDevice>,
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    async fn open(&self, _host: &str, _port: u16) -> ModbusResult<MockHandle> {
        self.device.open()?;
        Ok(MockHandle {
            device: Arc::clone(&self.device),
        })
    }
}

impl TransportHandle for MockHandle {
    async fn send(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let device = &self.device;
        let current = device.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        device.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = *device.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        device.in_flight.fetch_sub(1, Ordering::SeqCst);
        device.requests.lock().unwrap().push(request.clone());
        let failure = device.failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(device.apply(request)),
        }
    }

    async fn batch_read(&mut self, slave_id: SlaveId, spec: &BatchSpec) -> ModbusResult<BatchResult> {
        if self.device.take_empty_batch() {
            return Ok(BatchResult::new());
        }
        let mut result = BatchResult::new();
        for block in spec.read_blocks() {
            let response = self.send(&block.request(slave_id)).await?;
            block.decode_into(spec, &response, &mut result)?;
        }
        Ok(result)
    }
}

/// Fast timings, heartbeat at discrete input 0
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("127.0.0.1", 502)
        .with_device_id("test")
        .with_heartbeat_point(HEARTBEAT)
        .with_reconnect(10, -1)
        .with_initial_poll_delay_ms(0)
        .with_poll_interval_ms(5)
        .with_failure_backoff_ms(5)
        .with_handoff_timeout_ms(1000)
}

/// Heartbeat plus one float, two read blocks per cycle
pub fn test_spec() -> BatchSpec {
    BatchSpec::new()
        .with_point(HEARTBEAT, PointAddress::discrete_input(0))
        .unwrap()
        .with_point("power", PointAddress::input_register(0, DataType::F32))
        .unwrap()
}

pub type Results = Arc<Mutex<Vec<BatchResult>>>;

pub fn recording_listener() -> (impl ResultListener, Results) {
    let results: Results = Arc::default();
    let sink = Arc::clone(&results);
    let listener = move |result: &BatchResult| sink.lock().unwrap().push(result.clone());
    (listener, results)
}

pub fn drain(rx: &mut UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `condition` until it holds, failing the test after five seconds of
/// (possibly paused) time
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
