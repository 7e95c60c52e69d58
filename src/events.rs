//! Link events
//!
//! State transitions and diagnostics are published as [`LinkEvent`]s over a
//! single unbounded channel. Emitting never blocks and never fails: with no
//! receiver attached, or after the receiver is dropped, events are discarded.

use tokio::sync::mpsc;

use crate::error::ModbusError;

/// Something the link wants an observer to know about
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A poll cycle completed with a healthy heartbeat
    Connected,
    /// The heartbeat reported the remote link as down, or a poll cycle failed
    LinkBroken,
    /// I/O failure during an exchange
    IoError { message: String },
    /// An exchange timed out
    Timeout { operation: String, timeout_ms: u64 },
    /// The request could not be delivered or no usable response came back
    SendFailed { message: String },
    /// The device answered with an exception or a malformed response
    ResponseFailed {
        function: Option<u8>,
        code: Option<u8>,
        message: String,
    },
    /// A connect attempt failed
    ConnectFailed { attempt: u32, message: String },
    /// The reconnect loop gave up
    ReconnectExhausted { attempts: u32 },
}

impl LinkEvent {
    /// Diagnostic event for a failed exchange
    pub fn from_error(error: &ModbusError) -> Self {
        match error {
            ModbusError::Io { message } => LinkEvent::IoError {
                message: message.clone(),
            },
            ModbusError::Timeout {
                operation,
                timeout_ms,
            } => LinkEvent::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            ModbusError::Exception {
                function,
                code,
                message,
            } => LinkEvent::ResponseFailed {
                function: Some(*function),
                code: Some(*code),
                message: message.clone(),
            },
            ModbusError::Protocol { message } | ModbusError::InvalidData { message } => {
                LinkEvent::ResponseFailed {
                    function: None,
                    code: None,
                    message: message.clone(),
                }
            }
            other => LinkEvent::SendFailed {
                message: other.to_string(),
            },
        }
    }
}

/// Best-effort publisher of [`LinkEvent`]s
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<LinkEvent>>,
}

impl EventSink {
    /// Create a sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: LinkEvent) {
        if let Some(tx) = &self.tx {
            // receiver gone: nobody is listening any more
            let _ = tx.send(event);
        }
    }
}
