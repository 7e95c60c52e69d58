//! Point addressing and the single-point command result
//!
//! A point is a `(table, offset, data type)` triple. The table picks the
//! function-code family, the data type picks the word count and word order.
//! Point names follow the classic Modicon convention: the leading digit is
//! the table (`0` coil, `1` discrete input, `3` input register, `4` holding
//! register) and the remaining digits are a 1-based offset.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::codec::WordOrder;
use crate::constants::{RESPONSE_CODE_ERROR, RESPONSE_CODE_SUCCESS};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusFunction;
use crate::value::ModbusValue;

// ============================================================================
// Tables
// ============================================================================

/// The four Modbus data tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl TableKind {
    /// Table selected by the leading digit of a point name
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '0' => Some(Self::Coil),
            '1' => Some(Self::DiscreteInput),
            '3' => Some(Self::InputRegister),
            '4' => Some(Self::HoldingRegister),
            _ => None,
        }
    }

    /// Coils and holding registers accept writes
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }

    /// Bit tables are addressed per bit, register tables per 16-bit word
    pub fn is_bit_table(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    pub fn read_function(self) -> ModbusFunction {
        match self {
            Self::Coil => ModbusFunction::ReadCoils,
            Self::DiscreteInput => ModbusFunction::ReadDiscreteInputs,
            Self::InputRegister => ModbusFunction::ReadInputRegisters,
            Self::HoldingRegister => ModbusFunction::ReadHoldingRegisters,
        }
    }

    /// Largest quantity a single read of this table may request
    pub fn max_read_quantity(self) -> usize {
        if self.is_bit_table() {
            crate::constants::MAX_READ_COILS
        } else {
            crate::constants::MAX_READ_REGISTERS
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete-input",
            Self::InputRegister => "input-register",
            Self::HoldingRegister => "holding-register",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Data types
// ============================================================================

/// Wire representation of a point's value.
///
/// | Tag | Words | Order | Aliases |
/// |-----|-------|-------|---------|
/// | Bit | - | - | bool, boolean, coil |
/// | I16 / U16 | 1 | - | int16, short / uint16, word |
/// | I32 / U32 | 2 | high first | int32, long / uint32, dword |
/// | I32Swapped / U32Swapped | 2 | low first | int32_swapped / uint32_swapped |
/// | F32 / F32Swapped | 2 | high / low first | float32, float, real |
/// | I64 / U64 | 4 | high first | int64 / uint64, qword |
/// | I64Swapped / U64Swapped | 4 | low first | int64_swapped / uint64_swapped |
/// | F64 / F64Swapped | 4 | high / low first | float64, double, lreal |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum DataType {
    Bit,
    I16,
    U16,
    I32,
    U32,
    I32Swapped,
    U32Swapped,
    F32,
    F32Swapped,
    I64,
    U64,
    I64Swapped,
    U64Swapped,
    F64,
    F64Swapped,
}

impl DataType {
    /// Number of 16-bit registers the value occupies. `Bit` occupies one bit.
    pub fn word_count(self) -> u16 {
        match self {
            Self::Bit | Self::I16 | Self::U16 => 1,
            Self::I32
            | Self::U32
            | Self::I32Swapped
            | Self::U32Swapped
            | Self::F32
            | Self::F32Swapped => 2,
            Self::I64
            | Self::U64
            | Self::I64Swapped
            | Self::U64Swapped
            | Self::F64
            | Self::F64Swapped => 4,
        }
    }

    pub fn word_order(self) -> WordOrder {
        match self {
            Self::I32Swapped
            | Self::U32Swapped
            | Self::F32Swapped
            | Self::I64Swapped
            | Self::U64Swapped
            | Self::F64Swapped => WordOrder::LowFirst,
            _ => WordOrder::HighFirst,
        }
    }

    pub fn is_bit(self) -> bool {
        self == Self::Bit
    }
}

impl FromStr for DataType {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data_type = match s.to_ascii_lowercase().as_str() {
            "bit" | "bool" | "boolean" | "coil" => Self::Bit,
            "i16" | "int16" | "short" => Self::I16,
            "u16" | "uint16" | "word" => Self::U16,
            "i32" | "int32" | "long" => Self::I32,
            "u32" | "uint32" | "dword" => Self::U32,
            "i32_swapped" | "int32_swapped" => Self::I32Swapped,
            "u32_swapped" | "uint32_swapped" => Self::U32Swapped,
            "f32" | "float32" | "float" | "real" => Self::F32,
            "f32_swapped" | "float32_swapped" | "float_swapped" => Self::F32Swapped,
            "i64" | "int64" | "longlong" => Self::I64,
            "u64" | "uint64" | "qword" => Self::U64,
            "i64_swapped" | "int64_swapped" => Self::I64Swapped,
            "u64_swapped" | "uint64_swapped" => Self::U64Swapped,
            "f64" | "float64" | "double" | "lreal" => Self::F64,
            "f64_swapped" | "float64_swapped" | "double_swapped" => Self::F64Swapped,
            _ => {
                return Err(ModbusError::configuration(format!(
                    "Unsupported data type: {}",
                    s
                )))
            }
        };
        Ok(data_type)
    }
}

impl TryFrom<String> for DataType {
    type Error = ModbusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Point address
// ============================================================================

/// Location and representation of one point on the remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointAddress {
    pub table: TableKind,
    /// Zero-based offset within the table
    pub offset: u16,
    pub data_type: DataType,
}

impl PointAddress {
    pub fn new(table: TableKind, offset: u16, data_type: DataType) -> Self {
        Self {
            table,
            offset,
            data_type,
        }
    }

    pub fn coil(offset: u16) -> Self {
        Self::new(TableKind::Coil, offset, DataType::Bit)
    }

    pub fn discrete_input(offset: u16) -> Self {
        Self::new(TableKind::DiscreteInput, offset, DataType::Bit)
    }

    pub fn holding_register(offset: u16, data_type: DataType) -> Self {
        Self::new(TableKind::HoldingRegister, offset, data_type)
    }

    pub fn input_register(offset: u16, data_type: DataType) -> Self {
        Self::new(TableKind::InputRegister, offset, data_type)
    }

    /// Parse a point name such as `"40001"` (holding register, offset 0).
    ///
    /// The data type must suit the table: `DataType::Bit` for the `0` and `1`
    /// prefixes, a register type for `3` and `4`.
    pub fn from_point_name(name: &str, data_type: DataType) -> ModbusResult<Self> {
        let mut chars = name.chars();
        let table = chars
            .next()
            .and_then(TableKind::from_prefix)
            .ok_or_else(|| ModbusError::configuration(format!("Invalid point name: {}", name)))?;

        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ModbusError::configuration(format!(
                "Invalid point offset in name: {}",
                name
            )));
        }
        let number: u32 = digits.parse().map_err(|_| {
            ModbusError::configuration(format!("Invalid point offset in name: {}", name))
        })?;
        if number == 0 || number > 65536 {
            return Err(ModbusError::configuration(format!(
                "Point offset out of range in name: {}",
                name
            )));
        }

        // 1-based on the name, 0-based on the wire
        let address = Self::new(table, (number - 1) as u16, data_type);
        address.validate_for_read()?;
        Ok(address)
    }

    /// Bits for bit tables, registers for register tables
    pub fn quantity(&self) -> u16 {
        if self.table.is_bit_table() {
            1
        } else {
            self.data_type.word_count()
        }
    }

    /// One past the last address occupied by the point
    pub fn end(&self) -> u32 {
        u32::from(self.offset) + u32::from(self.quantity())
    }

    /// Reject (table, data type) pairs that have no read mapping
    pub fn validate_for_read(&self) -> ModbusResult<()> {
        if self.table.is_bit_table() != self.data_type.is_bit() {
            return Err(ModbusError::configuration(format!(
                "Unsupported data type {:?} for {} table",
                self.data_type, self.table
            )));
        }
        if self.end() > 65536 {
            return Err(ModbusError::configuration(format!(
                "Point {} spans past the end of the address space",
                self
            )));
        }
        Ok(())
    }

    /// Reject read-only tables on top of the read checks
    pub fn validate_for_write(&self) -> ModbusResult<()> {
        if !self.table.is_writable() {
            return Err(ModbusError::configuration(format!(
                "The {} table is read-only",
                self.table
            )));
        }
        self.validate_for_read()
    }
}

impl fmt::Display for PointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]:{:?}", self.table, self.offset, self.data_type)
    }
}

/// One element of a batch write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCommand {
    pub address: PointAddress,
    pub value: ModbusValue,
}

impl WriteCommand {
    pub fn new(address: PointAddress, value: impl Into<ModbusValue>) -> Self {
        Self {
            address,
            value: value.into(),
        }
    }

    pub fn from_point_name(
        name: &str,
        value: impl Into<ModbusValue>,
        data_type: DataType,
    ) -> ModbusResult<Self> {
        Ok(Self::new(
            PointAddress::from_point_name(name, data_type)?,
            value,
        ))
    }
}

// ============================================================================
// Response
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => RESPONSE_CODE_SUCCESS,
            Self::Error => RESPONSE_CODE_ERROR,
        }
    }
}

/// Outcome of a single-point command. The command surface never returns
/// `Err`; failures are carried here.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: ResponseStatus,
    pub result: Option<ModbusValue>,
    pub error: Option<ModbusError>,
}

impl Response {
    pub fn success(result: Option<ModbusValue>) -> Self {
        Self {
            status: ResponseStatus::Success,
            result,
            error: None,
        }
    }

    pub fn failure(error: ModbusError) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn code(&self) -> i32 {
        self.status.code()
    }

    pub fn error_description(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}
