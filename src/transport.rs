//! Transport abstraction
//!
//! The link engine never touches sockets. It opens handles through a
//! [`Transport`] and performs exactly one exchange at a time on a
//! [`TransportHandle`]. Framing and the byte stream are the implementation's
//! business, so RTU or ASCII variants can be plugged in without changing
//! the engine.

use std::future::Future;

use crate::batch::{BatchResult, BatchSpec};
use crate::error::ModbusResult;
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId};

/// Counters kept by a transport handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Factory for connection handles
pub trait Transport: Send + Sync + 'static {
    type Handle: TransportHandle;

    /// Establish a new connection
    fn open(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = ModbusResult<Self::Handle>> + Send;
}

/// A live connection to one remote device
pub trait TransportHandle: Send + 'static {
    /// Perform one request/response exchange.
    ///
    /// Exception responses must be reported as
    /// [`ModbusError::Exception`](crate::ModbusError::Exception).
    fn send(
        &mut self,
        request: &ModbusRequest,
    ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send;

    /// Read every point of `spec`, one request per planned block.
    ///
    /// Fails on the first block that fails; a partial result is never
    /// returned.
    fn batch_read(
        &mut self,
        slave_id: SlaveId,
        spec: &BatchSpec,
    ) -> impl Future<Output = ModbusResult<BatchResult>> + Send
    where
        Self: Sized,
    {
        async move {
            let mut result = BatchResult::new();
            for block in spec.read_blocks() {
                let response = self.send(&block.request(slave_id)).await?;
                block.decode_into(spec, &response, &mut result)?;
            }
            Ok(result)
        }
    }

    /// Release the connection
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send {
        async { Ok(()) }
    }

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}
