//! Batch read specification, block planning and results
//!
//! A [`BatchSpec`] is built once and read every poll cycle. Before each read
//! the points are planned into [`ReadBlock`]s: points of the same table whose
//! ranges touch or overlap are merged into one request, as long as the request
//! stays within the protocol limit for that table (125 registers, 2000 bits).

use std::collections::HashMap;

use crate::codec;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId};
use crate::types::{PointAddress, TableKind};
use crate::value::ModbusValue;

/// Ordered set of named points read together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSpec {
    points: Vec<(String, PointAddress)>,
}

impl BatchSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a point. Names must be unique and the address must be readable.
    pub fn add(&mut self, name: impl Into<String>, address: PointAddress) -> ModbusResult<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(ModbusError::configuration(format!(
                "Duplicate point name in batch: {}",
                name
            )));
        }
        address.validate_for_read()?;
        self.points.push((name, address));
        Ok(())
    }

    /// Builder form of [`add`](Self::add)
    pub fn with_point(
        mut self,
        name: impl Into<String>,
        address: PointAddress,
    ) -> ModbusResult<Self> {
        self.add(name, address)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&PointAddress> {
        self.points
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, address)| address)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PointAddress)> {
        self.points.iter().map(|(n, a)| (n.as_str(), a))
    }

    /// Group the points into as few requests as the limits allow.
    ///
    /// Blocks come out ordered by table, then start address.
    pub fn read_blocks(&self) -> Vec<ReadBlock> {
        let mut order: Vec<usize> = (0..self.points.len()).collect();
        order.sort_by_key(|&i| {
            let address = &self.points[i].1;
            (address.table, address.offset)
        });

        let mut blocks: Vec<ReadBlock> = Vec::new();
        for index in order {
            let address = self.points[index].1;
            let merged = blocks
                .last_mut()
                .is_some_and(|block| block.try_extend(index, &address));
            if !merged {
                blocks.push(ReadBlock::starting_at(index, &address));
            }
        }
        blocks
    }
}

/// One read request covering a contiguous range of a single table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlock {
    pub table: TableKind,
    pub start: u16,
    pub quantity: u16,
    /// Indices into the owning spec's points
    members: Vec<usize>,
}

impl ReadBlock {
    fn starting_at(index: usize, address: &PointAddress) -> Self {
        Self {
            table: address.table,
            start: address.offset,
            quantity: address.quantity(),
            members: vec![index],
        }
    }

    fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.quantity)
    }

    fn try_extend(&mut self, index: usize, address: &PointAddress) -> bool {
        if address.table != self.table || u32::from(address.offset) > self.end() {
            return false;
        }
        let new_end = self.end().max(address.end());
        let span = new_end - u32::from(self.start);
        if span as usize > self.table.max_read_quantity() {
            return false;
        }
        self.quantity = span as u16;
        self.members.push(index);
        true
    }

    pub fn request(&self, slave_id: SlaveId) -> ModbusRequest {
        ModbusRequest::read(
            slave_id,
            self.table.read_function(),
            self.start,
            self.quantity,
        )
    }

    /// Decode every member of this block from its response into `result`
    pub fn decode_into(
        &self,
        spec: &BatchSpec,
        response: &ModbusResponse,
        result: &mut BatchResult,
    ) -> ModbusResult<()> {
        if self.table.is_bit_table() {
            let bits = response.parse_bits(self.quantity)?;
            for &index in &self.members {
                let (name, address) = &spec.points[index];
                let bit = bits[usize::from(address.offset - self.start)];
                result.insert(name.clone(), ModbusValue::Bool(bit));
            }
            return Ok(());
        }

        let words = response.parse_registers()?;
        if words.len() < usize::from(self.quantity) {
            return Err(ModbusError::protocol(format!(
                "Expected {} registers from {}, got {}",
                self.quantity,
                self.start,
                words.len()
            )));
        }
        for &index in &self.members {
            let (name, address) = &spec.points[index];
            let from = usize::from(address.offset - self.start);
            let to = from + usize::from(address.data_type.word_count());
            let value = codec::decode_words(&words[from..to], address.data_type)?;
            result.insert(name.clone(), value);
        }
        Ok(())
    }
}

/// Values of one batch read keyed by point name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    values: HashMap<String, ModbusValue>,
    link_broken: bool,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ModbusValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ModbusValue> {
        self.values.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).map(ModbusValue::as_bool)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModbusValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Set on results forwarded from a cycle whose heartbeat reported the
    /// remote link as down
    pub fn link_broken(&self) -> bool {
        self.link_broken
    }

    pub fn set_link_broken(&mut self, link_broken: bool) {
        self.link_broken = link_broken;
    }
}

impl<N: Into<String>> FromIterator<(N, ModbusValue)> for BatchResult {
    fn from_iter<I: IntoIterator<Item = (N, ModbusValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(n, v)| (n.into(), v)).collect(),
            link_broken: false,
        }
    }
}

/// A batch read either produced values or nothing at all. `Empty` is a
/// failure for the poller, never a valid empty success.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Populated(BatchResult),
    Empty,
}

impl From<BatchResult> for BatchOutcome {
    fn from(result: BatchResult) -> Self {
        if result.is_empty() {
            BatchOutcome::Empty
        } else {
            BatchOutcome::Populated(result)
        }
    }
}
