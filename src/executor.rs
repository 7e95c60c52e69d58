//! Single-exchange command dispatch
//!
//! Dispatch is two-level: the table picks the function-code family and the
//! data type picks the word count and codec.
//!
//! | Table | Read | Write |
//! |-------|------|-------|
//! | Coil | FC01 | FC05, FC15 (bit ranges) |
//! | Discrete input | FC02 | - |
//! | Input register | FC04 | - |
//! | Holding register | FC03 | FC06 (1 word), FC16 (2 or 4 words), FC22 (masks) |
//!
//! Unsupported combinations are rejected before anything reaches the
//! transport. The executor never retries; transport failures propagate
//! unchanged.

use tracing::debug;

use crate::batch::{BatchOutcome, BatchSpec};
use crate::codec;
use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId};
use crate::transport::TransportHandle;
use crate::types::{DataType, PointAddress, TableKind, WriteCommand};
use crate::value::ModbusValue;

#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor {
    slave_id: SlaveId,
}

impl CommandExecutor {
    pub fn new(slave_id: SlaveId) -> Self {
        Self { slave_id }
    }

    pub fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    pub async fn read<H: TransportHandle>(
        &self,
        handle: &mut H,
        address: &PointAddress,
    ) -> ModbusResult<ModbusValue> {
        address.validate_for_read()?;
        let request = ModbusRequest::read(
            self.slave_id,
            address.table.read_function(),
            address.offset,
            address.quantity(),
        );
        debug!("Read {}", address);
        let response = handle.send(&request).await?;
        decode_point(address, &response)
    }

    pub async fn write<H: TransportHandle>(
        &self,
        handle: &mut H,
        address: &PointAddress,
        value: &ModbusValue,
    ) -> ModbusResult<bool> {
        let request = self.write_request(address, value)?;
        debug!("Write {} = {}", address, value);
        handle.send(&request).await?;
        Ok(true)
    }

    /// Apply the commands in order, stopping at the first failure.
    ///
    /// Every command is encoded before the first one is sent, so a
    /// configuration error never leaves the batch half applied.
    pub async fn write_all<H: TransportHandle>(
        &self,
        handle: &mut H,
        commands: &[WriteCommand],
    ) -> ModbusResult<bool> {
        let requests = commands
            .iter()
            .map(|command| self.write_request(&command.address, &command.value))
            .collect::<ModbusResult<Vec<_>>>()?;

        for (request, command) in requests.iter().zip(commands) {
            debug!("Write {} = {}", command.address, command.value);
            handle.send(request).await?;
        }
        Ok(true)
    }

    pub async fn batch_read<H: TransportHandle>(
        &self,
        handle: &mut H,
        spec: &BatchSpec,
    ) -> ModbusResult<BatchOutcome> {
        let result = handle.batch_read(self.slave_id, spec).await?;
        debug!("Batch read returned {} of {} points", result.len(), spec.len());
        Ok(result.into())
    }

    /// Read `count` consecutive big-endian f32 values starting at `offset`
    pub async fn read_floats<H: TransportHandle>(
        &self,
        handle: &mut H,
        table: TableKind,
        offset: u16,
        count: u16,
    ) -> ModbusResult<Vec<f32>> {
        if table.is_bit_table() {
            return Err(ModbusError::configuration(format!(
                "Cannot read floats from the {} table",
                table
            )));
        }
        let quantity = usize::from(count) * 2;
        if count == 0 || quantity > MAX_READ_REGISTERS {
            return Err(ModbusError::configuration(format!(
                "Float count {} outside 1..={}",
                count,
                MAX_READ_REGISTERS / 2
            )));
        }
        if usize::from(offset) + quantity > 65536 {
            return Err(ModbusError::configuration(format!(
                "{} floats at {} span past the end of the address space",
                count, offset
            )));
        }

        let request = ModbusRequest::read(
            self.slave_id,
            table.read_function(),
            offset,
            quantity as u16,
        );
        let response = handle.send(&request).await?;
        let bytes = response.register_bytes()?;
        if bytes.len() != quantity * 2 {
            return Err(ModbusError::protocol(format!(
                "Expected {} bytes of floats, got {}",
                quantity * 2,
                bytes.len()
            )));
        }
        codec::floats_from_bytes(bytes)
    }

    /// Read `count` consecutive bits from the coil or discrete input table
    pub async fn read_bits<H: TransportHandle>(
        &self,
        handle: &mut H,
        table: TableKind,
        offset: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>> {
        if !table.is_bit_table() {
            return Err(ModbusError::configuration(format!(
                "Cannot read bits from the {} table",
                table
            )));
        }
        check_span(offset, usize::from(count), MAX_READ_COILS, "Bit")?;

        let request = ModbusRequest::read(self.slave_id, table.read_function(), offset, count);
        debug!("Read {} bits from {} at {}", count, table, offset);
        let response = handle.send(&request).await?;
        response.parse_bits(count)
    }

    /// Write consecutive coils with one FC15 request
    pub async fn write_coils<H: TransportHandle>(
        &self,
        handle: &mut H,
        offset: u16,
        values: &[bool],
    ) -> ModbusResult<bool> {
        check_span(offset, values.len(), MAX_WRITE_COILS, "Coil")?;
        let request = ModbusRequest::write_multiple_coils(self.slave_id, offset, values)?;
        debug!("Write {} coils at {}", values.len(), offset);
        handle.send(&request).await?;
        Ok(true)
    }

    /// Modify a holding register in place with FC22
    pub async fn mask_write_register<H: TransportHandle>(
        &self,
        handle: &mut H,
        offset: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<bool> {
        let request =
            ModbusRequest::mask_write_register(self.slave_id, offset, and_mask, or_mask);
        debug!(
            "Mask write holding register {}: and=0x{:04X} or=0x{:04X}",
            offset, and_mask, or_mask
        );
        handle.send(&request).await?;
        Ok(true)
    }

    fn write_request(
        &self,
        address: &PointAddress,
        value: &ModbusValue,
    ) -> ModbusResult<ModbusRequest> {
        address.validate_for_write()?;
        match (address.table, address.data_type) {
            (TableKind::Coil, DataType::Bit) => Ok(ModbusRequest::write_single_coil(
                self.slave_id,
                address.offset,
                value.as_bool(),
            )),
            (TableKind::HoldingRegister, data_type) => {
                let words = codec::encode_value(value, data_type)?;
                match words.as_slice() {
                    [word] => Ok(ModbusRequest::write_single_register(
                        self.slave_id,
                        address.offset,
                        *word,
                    )),
                    _ => ModbusRequest::write_multiple_registers(
                        self.slave_id,
                        address.offset,
                        &words,
                    ),
                }
            }
            (table, data_type) => Err(ModbusError::configuration(format!(
                "Unsupported write of {:?} to the {} table",
                data_type, table
            ))),
        }
    }
}

/// Reject empty, oversized or out-of-range runs of `count` items at `offset`
fn check_span(offset: u16, count: usize, max: usize, what: &str) -> ModbusResult<()> {
    if count == 0 || count > max {
        return Err(ModbusError::configuration(format!(
            "{} count {} outside 1..={}",
            what, count, max
        )));
    }
    if usize::from(offset) + count > 65536 {
        return Err(ModbusError::configuration(format!(
            "{} items at {} span past the end of the address space",
            count, offset
        )));
    }
    Ok(())
}

fn decode_point(address: &PointAddress, response: &ModbusResponse) -> ModbusResult<ModbusValue> {
    if address.table.is_bit_table() {
        let bits = response.parse_bits(1)?;
        return Ok(ModbusValue::Bool(bits[0]));
    }

    let words = response.parse_registers()?;
    if words.len() != usize::from(address.quantity()) {
        return Err(ModbusError::protocol(format!(
            "Expected {} registers for {}, got {}",
            address.quantity(),
            address,
            words.len()
        )));
    }
    codec::decode_words(&words, address.data_type)
}
