//! Protocol limits, function codes and link defaults
//!
//! Request limits follow the Modbus application protocol: every PDU must fit
//! in 253 bytes. The link defaults are the timings the supervisor, poller and
//! coordinator fall back to when a [`ConnectionConfig`](crate::config::ConnectionConfig)
//! leaves them unset.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header bytes preceding the Length field's payload:
/// Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size (RS485 ADU 256 - address 1 - CRC 2)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP Length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

// ============================================================================
// Request Limits
// ============================================================================

/// Registers per FC03/FC04 request: 1 + 1 + 2N <= 253
pub const MAX_READ_REGISTERS: usize = 125;

/// Registers per FC16 request: 1 + 2 + 2 + 1 + 2N <= 253
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Bits per FC01/FC02 request
pub const MAX_READ_COILS: usize = 2000;

/// Bits per FC15 request
pub const MAX_WRITE_COILS: usize = 1968;

// ============================================================================
// Function Codes
// ============================================================================

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FC_MASK_WRITE_REGISTER: u8 = 0x16;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// FC05 payload for ON
pub const COIL_ON: u16 = 0xFF00;

/// FC05 payload for OFF
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Exception Codes
// ============================================================================

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Link Defaults
// ============================================================================

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default unit identifier
pub const DEFAULT_SLAVE_ID: u8 = 1;

/// Per-exchange timeout
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Pause before the poller's first cycle
pub const DEFAULT_INITIAL_POLL_DELAY_MS: u64 = 1000;

/// Pause after a failed poll cycle
pub const DEFAULT_FAILURE_BACKOFF_MS: u64 = 500;

/// How long a writer waits for the poller to hand over the connection
pub const DEFAULT_HANDOFF_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Response Codes
// ============================================================================

/// Status code of a successful [`Response`](crate::types::Response)
pub const RESPONSE_CODE_SUCCESS: i32 = 200;

/// Status code of a failed [`Response`](crate::types::Response)
pub const RESPONSE_CODE_ERROR: i32 = -1;
