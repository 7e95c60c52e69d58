//! Error types for the Modbus link
//!
//! Every failure the link can observe is one `ModbusError` variant. The
//! variants are grouped into the categories the rest of the crate reacts to:
//!
//! | Category | Variants | Reaction |
//! |----------|----------|----------|
//! | Connection | `Connection` | absorbed by the reconnect loop |
//! | Transport | `Io`, `Timeout`, `NotConnected`, `EmptyResult` | link marked offline |
//! | Protocol | `Protocol`, `Exception` | diagnostic event; the handle is kept |
//! | Link state | `Offline`, `PollerUnavailable`, `Cancelled` | reported to the caller |
//! | Configuration | `Configuration`, `InvalidData` | operation aborted, never retried |
//! | Other | `Unknown` | converted to a failed `Response` |
//!
//! The type is `Clone` so that a failed [`Response`](crate::types::Response)
//! can carry the error that produced it.

use thiserror::Error;

/// Result type used throughout the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus link error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// Establishing a transport handle failed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// I/O failure during an exchange
    #[error("I/O error: {message}")]
    Io { message: String },

    /// An exchange did not complete in time
    #[error("Timeout: {operation} did not complete within {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed or unexpected response
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The remote device answered with a Modbus exception
    #[error("Modbus exception: function={function:#04X}, code={code:#04X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// The heartbeat point reports the remote link as down
    #[error("Device is offline")]
    Offline,

    /// No transport handle is currently held
    #[error("Not connected to the device")]
    NotConnected,

    /// A batch read returned no data at all
    #[error("Batch read returned no data")]
    EmptyResult,

    /// The poller did not hand over the connection in time
    #[error("Poller unavailable: no handoff within {waited_ms}ms")]
    PollerUnavailable { waited_ms: u64 },

    /// The operation was stopped by a cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Unsupported table/data-type combination or invalid settings
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Value could not be encoded or decoded
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Anything not covered above
    #[error("Unexpected error: {message}")]
    Unknown { message: String },
}

impl ModbusError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an exception error from a Modbus exception response
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function,
            code,
            message: exception_name(code).to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a poller-unavailable error
    pub fn poller_unavailable(waited_ms: u64) -> Self {
        Self::PollerUnavailable { waited_ms }
    }

    /// Create an unknown error
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Failures that mean the connection itself can no longer be trusted.
    ///
    /// A transport failure on a live handle invalidates it; protocol and
    /// configuration failures leave the handle usable.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Io { .. }
                | Self::Timeout { .. }
                | Self::NotConnected
                | Self::EmptyResult
        )
    }

    /// The remote device answered, but with an error or garbage
    pub fn is_protocol_failure(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Exception { .. })
    }

    /// Programming or configuration mistakes
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::InvalidData { .. })
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(err.to_string(), 0),
            _ => Self::io(err.to_string()),
        }
    }
}

/// Human readable name of a Modbus exception code
pub fn exception_name(code: u8) -> &'static str {
    use crate::constants::*;

    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "Illegal function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal data address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal data value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "Server device failure",
        EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "Server device busy",
        EXCEPTION_MEMORY_PARITY_ERROR => "Memory parity error",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway path unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway target device failed to respond",
        _ => "Unknown exception",
    }
}
