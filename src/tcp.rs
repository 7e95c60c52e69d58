//! Modbus TCP transport
//!
//! Frames requests with the MBAP header and matches responses by
//! transaction id. One request is outstanding at a time, which is all the
//! link engine ever asks for.
//!
//! A timed-out exchange or a malformed header leaves the byte stream at an
//! unknown position. The handle is then desynchronized: every later exchange
//! fails with an I/O error without touching the stream, so the owner drops
//! the handle and opens a new one.
//!
//! ```text
//! | tid (2) | protocol 0 (2) | length (2) | unit (1) | PDU ... |
//! ```

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::constants::{
    DEFAULT_REQUEST_TIMEOUT_MS, EXCEPTION_FLAG, MAX_MBAP_LENGTH, MBAP_HEADER_LEN,
};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse};
use crate::transport::{Transport, TransportHandle, TransportStats};

/// Opens [`TcpHandle`]s to a Modbus TCP server
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
    }
}

impl TcpTransport {
    /// Use the same timeout for connecting and for each exchange
    pub fn new(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            request_timeout: timeout,
        }
    }

    /// Connect and exchange timeouts from `request_timeout_ms`
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.request_timeout())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Transport for TcpTransport {
    type Handle = TcpHandle<TcpStream>;

    async fn open(&self, host: &str, port: u16) -> ModbusResult<Self::Handle> {
        let connect = TcpStream::connect((host, port));
        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ModbusError::connection(format!(
                    "Failed to connect to {}:{}: {}",
                    host, port, e
                )))
            }
            Err(_) => {
                return Err(ModbusError::connection(format!(
                    "Connection to {}:{} timed out after {}ms",
                    host,
                    port,
                    self.connect_timeout.as_millis()
                )))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        debug!("Connected to {}:{}", host, port);
        Ok(TcpHandle::new(stream, self.request_timeout))
    }
}

/// A Modbus TCP connection over any byte stream
#[derive(Debug)]
pub struct TcpHandle<S = TcpStream> {
    stream: S,
    transaction_id: u16,
    request_timeout: Duration,
    desynced: bool,
    stats: TransportStats,
}

impl<S> TcpHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, request_timeout: Duration) -> Self {
        Self {
            stream,
            transaction_id: 0,
            request_timeout,
            desynced: false,
            stats: TransportStats::default(),
        }
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    fn encode_frame(transaction_id: u16, request: &ModbusRequest) -> BytesMut {
        let pdu = request.to_pdu();
        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
        frame.put_u16(transaction_id);
        frame.put_u16(0);
        frame.put_u16((pdu.len() + 1) as u16);
        frame.put_u8(request.slave_id);
        frame.put_slice(&pdu);
        frame
    }

    async fn exchange(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let transaction_id = self.next_transaction_id();
        let frame = Self::encode_frame(transaction_id, request);
        trace!("TX {}", hex(&frame));

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        let mut header = [0u8; MBAP_HEADER_LEN + 1];
        self.stream.read_exact(&mut header).await?;

        let rx_tid = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        if protocol_id != 0 {
            return Err(ModbusError::io(format!(
                "Unexpected protocol id {}",
                protocol_id
            )));
        }
        if !(2..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(ModbusError::io(format!("Invalid MBAP length {}", length)));
        }

        let mut pdu = vec![0u8; length - 1];
        self.stream.read_exact(&mut pdu).await?;
        self.stats.bytes_received += (header.len() + pdu.len()) as u64;
        trace!("RX {} {}", hex(&header), hex(&pdu));

        if rx_tid != transaction_id {
            return Err(ModbusError::io(format!(
                "Transaction id mismatch: sent {}, received {}",
                transaction_id, rx_tid
            )));
        }

        let function_code = pdu[0];
        let expected = request.function.to_u8();
        if function_code == expected | EXCEPTION_FLAG {
            let code = pdu.get(1).copied().unwrap_or_default();
            return Err(ModbusError::exception(expected, code));
        }
        if function_code != expected {
            return Err(ModbusError::protocol(format!(
                "Function code mismatch: sent 0x{:02X}, received 0x{:02X}",
                expected, function_code
            )));
        }

        self.stats.responses_received += 1;
        Ok(ModbusResponse::new(
            header[6],
            ModbusFunction::from_u8(function_code)?,
            pdu[1..].to_vec(),
        ))
    }
}

impl<S> TransportHandle for TcpHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        if self.desynced {
            self.stats.errors += 1;
            return Err(ModbusError::io(
                "Stream out of sync after an abandoned exchange",
            ));
        }

        let timeout = self.request_timeout;
        match tokio::time::timeout(timeout, self.exchange(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.stats.errors += 1;
                if e.is_transport_failure() {
                    warn!("Stream out of sync after {}", e);
                    self.desynced = true;
                }
                Err(e)
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.desynced = true;
                Err(ModbusError::timeout(
                    format!("{:?}", request.function),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
