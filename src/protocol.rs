//! Modbus request/response messages exchanged with a transport
//!
//! These are transport-independent PDUs: the function code, the addressing
//! fields and the raw payload. Framing (MBAP, RTU CRC, ...) is the
//! transport's job.

use crate::codec;
use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

/// Unit identifier of the remote device
pub type SlaveId = u8;

/// Function codes used by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    MaskWriteRegister,
}

impl ModbusFunction {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ReadCoils => FC_READ_COILS,
            Self::ReadDiscreteInputs => FC_READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
            Self::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils => FC_WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters => FC_WRITE_MULTIPLE_REGISTERS,
            Self::MaskWriteRegister => FC_MASK_WRITE_REGISTER,
        }
    }

    pub fn from_u8(code: u8) -> ModbusResult<Self> {
        match code {
            FC_READ_COILS => Ok(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Ok(Self::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Ok(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Ok(Self::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(Self::WriteMultipleRegisters),
            FC_MASK_WRITE_REGISTER => Ok(Self::MaskWriteRegister),
            _ => Err(ModbusError::protocol(format!(
                "Unsupported function code: 0x{:02X}",
                code
            ))),
        }
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }
}

/// A request PDU.
///
/// `data` carries the write payload: the 2-byte value for FC05/FC06, the
/// packed coils or register bytes (without byte count) for FC15/FC16, the
/// AND and OR masks for FC22, and nothing for reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: u16,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    pub fn read(slave_id: SlaveId, function: ModbusFunction, address: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    pub fn write_single_coil(slave_id: SlaveId, address: u16, value: bool) -> Self {
        let raw = if value { COIL_ON } else { COIL_OFF };
        Self {
            slave_id,
            function: ModbusFunction::WriteSingleCoil,
            address,
            quantity: 1,
            data: raw.to_be_bytes().to_vec(),
        }
    }

    pub fn write_single_register(slave_id: SlaveId, address: u16, value: u16) -> Self {
        Self {
            slave_id,
            function: ModbusFunction::WriteSingleRegister,
            address,
            quantity: 1,
            data: value.to_be_bytes().to_vec(),
        }
    }

    pub fn write_multiple_coils(
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<Self> {
        if values.is_empty() || values.len() > MAX_WRITE_COILS {
            return Err(ModbusError::invalid_data(format!(
                "Coil count {} outside 1..={}",
                values.len(),
                MAX_WRITE_COILS
            )));
        }
        Ok(Self {
            slave_id,
            function: ModbusFunction::WriteMultipleCoils,
            address,
            quantity: values.len() as u16,
            data: codec::bytes_from_bools(values),
        })
    }

    pub fn write_multiple_registers(
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<Self> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
            return Err(ModbusError::invalid_data(format!(
                "Register count {} outside 1..={}",
                values.len(),
                MAX_WRITE_REGISTERS
            )));
        }
        Ok(Self {
            slave_id,
            function: ModbusFunction::WriteMultipleRegisters,
            address,
            quantity: values.len() as u16,
            data: codec::bytes_from_words(values),
        })
    }

    /// FC22: the device stores `(current & and_mask) | (or_mask & !and_mask)`
    pub fn mask_write_register(
        slave_id: SlaveId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Self {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&and_mask.to_be_bytes());
        data.extend_from_slice(&or_mask.to_be_bytes());
        Self {
            slave_id,
            function: ModbusFunction::MaskWriteRegister,
            address,
            quantity: 1,
            data,
        }
    }

    /// Serialize to PDU bytes (function code first)
    pub fn to_pdu(&self) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(6 + self.data.len());
        pdu.push(self.function.to_u8());
        pdu.extend_from_slice(&self.address.to_be_bytes());
        match self.function {
            ModbusFunction::WriteSingleCoil
            | ModbusFunction::WriteSingleRegister
            | ModbusFunction::MaskWriteRegister => {
                pdu.extend_from_slice(&self.data);
            }
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                pdu.extend_from_slice(&self.quantity.to_be_bytes());
                pdu.push(self.data.len() as u8);
                pdu.extend_from_slice(&self.data);
            }
            _ => pdu.extend_from_slice(&self.quantity.to_be_bytes()),
        }
        pdu
    }
}

/// A successful response PDU. Exception responses are turned into
/// [`ModbusError::Exception`] by the transport.
///
/// For reads, `data` starts with the byte count; for writes it is the echoed
/// address/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
}

impl ModbusResponse {
    pub fn new(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
        }
    }

    /// Build a read response from register values (byte count prefixed)
    pub fn from_registers(slave_id: SlaveId, function: ModbusFunction, values: &[u16]) -> Self {
        let mut data = Vec::with_capacity(1 + values.len() * 2);
        data.push((values.len() * 2) as u8);
        data.extend(codec::bytes_from_words(values));
        Self::new(slave_id, function, data)
    }

    /// Build a read response from bit values (byte count prefixed)
    pub fn from_bits(slave_id: SlaveId, function: ModbusFunction, values: &[bool]) -> Self {
        let packed = codec::bytes_from_bools(values);
        let mut data = Vec::with_capacity(1 + packed.len());
        data.push(packed.len() as u8);
        data.extend(packed);
        Self::new(slave_id, function, data)
    }

    /// Payload after the byte count, checked against the declared length
    fn read_payload(&self) -> ModbusResult<&[u8]> {
        let (count, payload) = self
            .data
            .split_first()
            .ok_or_else(|| ModbusError::protocol("Empty read response"))?;
        if payload.len() != usize::from(*count) {
            return Err(ModbusError::protocol(format!(
                "Byte count {} does not match payload length {}",
                count,
                payload.len()
            )));
        }
        Ok(payload)
    }

    /// Decode `quantity` bits from a FC01/FC02 response
    pub fn parse_bits(&self, quantity: u16) -> ModbusResult<Vec<bool>> {
        let payload = self.read_payload()?;
        codec::bools_from_bytes(payload, usize::from(quantity))
            .map_err(|e| ModbusError::protocol(e.to_string()))
    }

    /// Decode the registers of a FC03/FC04 response
    pub fn parse_registers(&self) -> ModbusResult<Vec<u16>> {
        let payload = self.read_payload()?;
        codec::words_from_bytes(payload).map_err(|e| ModbusError::protocol(e.to_string()))
    }

    /// Raw register bytes of a FC03/FC04 response
    pub fn register_bytes(&self) -> ModbusResult<&[u8]> {
        self.read_payload()
    }
}
