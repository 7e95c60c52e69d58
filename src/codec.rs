//! # Value codec
//!
//! Pure conversions between raw Modbus payloads and typed values. Nothing
//! here does I/O or keeps state; malformed input is rejected with
//! [`ModbusError::InvalidData`] instead of being truncated.
//!
//! Multi-register values are assembled from big-endian bytes split into
//! 16-bit words. [`WordOrder::HighFirst`] sends the most significant word
//! first; [`WordOrder::LowFirst`] reverses the word sequence, which is what
//! the `*Swapped` data types use. The same table drives reads and writes.

use crate::error::{ModbusError, ModbusResult};
use crate::types::DataType;
use crate::value::ModbusValue;

/// Order of 16-bit words inside a multi-register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordOrder {
    /// Most significant word at the lowest address (ABCD)
    #[default]
    HighFirst,
    /// Least significant word at the lowest address (CDAB)
    LowFirst,
}

impl WordOrder {
    /// Reorder words between wire order and big-endian order. The operation
    /// is its own inverse.
    fn arrange(self, words: &mut [u16]) {
        if self == WordOrder::LowFirst {
            words.reverse();
        }
    }
}

// ============================================================================
// Bits
// ============================================================================

/// Unpack `len` bits, LSB first within each byte.
pub fn bools_from_bytes(bytes: &[u8], len: usize) -> ModbusResult<Vec<bool>> {
    let needed = len.div_ceil(8);
    if bytes.len() < needed {
        return Err(ModbusError::invalid_data(format!(
            "Need {} bytes for {} bits, got {}",
            needed,
            len,
            bytes.len()
        )));
    }

    Ok((0..len).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect())
}

/// Pack bits LSB first; the last byte is zero padded.
pub fn bytes_from_bools(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        bytes[i / 8] |= 1 << (i % 8);
    }
    bytes
}

// ============================================================================
// Words
// ============================================================================

/// Split a register payload into big-endian words.
pub fn words_from_bytes(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
    if bytes.len() % 2 != 0 {
        return Err(ModbusError::invalid_data(format!(
            "Register payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn bytes_from_words(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

// ============================================================================
// Floats
// ============================================================================

/// Interpret each 4-byte group as a big-endian IEEE-754 single.
pub fn floats_from_bytes(bytes: &[u8]) -> ModbusResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(ModbusError::invalid_data(format!(
            "Float payload length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|group| f32::from_be_bytes([group[0], group[1], group[2], group[3]]))
        .collect())
}

/// Split the IEEE-754 bit pattern into two words, high word first.
#[inline]
pub fn register_pair_from_f32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

#[inline]
pub fn f32_from_register_pair(pair: [u16; 2]) -> f32 {
    f32::from_bits((u32::from(pair[0]) << 16) | u32::from(pair[1]))
}

/// Narrow any numeric value to single precision, then split it.
#[inline]
pub fn register_pair_from_value(value: f64) -> [u16; 2] {
    register_pair_from_f32(value as f32)
}

// ============================================================================
// Typed decode / encode
// ============================================================================

/// Decode the words of one register point.
///
/// `words` must hold exactly `data_type.word_count()` registers in wire order.
pub fn decode_words(words: &[u16], data_type: DataType) -> ModbusResult<ModbusValue> {
    let expected = usize::from(data_type.word_count());
    if words.len() != expected {
        return Err(ModbusError::invalid_data(format!(
            "{:?} needs {} registers, got {}",
            data_type,
            expected,
            words.len()
        )));
    }

    let mut ordered = words.to_vec();
    data_type.word_order().arrange(&mut ordered);
    let bytes = bytes_from_words(&ordered);

    let value = match data_type {
        DataType::U16 => ModbusValue::U16(ordered[0]),
        DataType::I16 => ModbusValue::I16(ordered[0] as i16),
        DataType::U32 | DataType::U32Swapped => ModbusValue::U32(u32::from_be_bytes(be4(&bytes))),
        DataType::I32 | DataType::I32Swapped => ModbusValue::I32(i32::from_be_bytes(be4(&bytes))),
        DataType::F32 | DataType::F32Swapped => ModbusValue::F32(f32::from_be_bytes(be4(&bytes))),
        DataType::U64 | DataType::U64Swapped => ModbusValue::U64(u64::from_be_bytes(be8(&bytes))),
        DataType::I64 | DataType::I64Swapped => ModbusValue::I64(i64::from_be_bytes(be8(&bytes))),
        DataType::F64 | DataType::F64Swapped => ModbusValue::F64(f64::from_be_bytes(be8(&bytes))),
        DataType::Bit => {
            return Err(ModbusError::invalid_data(
                "Bit values are not stored in registers",
            ))
        }
    };
    Ok(value)
}

/// Encode a value into the wire words of a register point.
///
/// Floats written to integer types are rounded first. A value outside the
/// target type's range is rejected, never saturated.
pub fn encode_value(value: &ModbusValue, data_type: DataType) -> ModbusResult<Vec<u16>> {
    let bytes: Vec<u8> = match data_type {
        DataType::Bit => {
            return Err(ModbusError::invalid_data(
                "Bit values are not stored in registers",
            ))
        }
        DataType::U16 => (integer_in_range(value, data_type, 0, u16::MAX.into())? as u16)
            .to_be_bytes()
            .to_vec(),
        DataType::I16 => {
            (integer_in_range(value, data_type, i16::MIN.into(), i16::MAX.into())? as i16)
                .to_be_bytes()
                .to_vec()
        }
        DataType::U32 | DataType::U32Swapped => {
            (integer_in_range(value, data_type, 0, u32::MAX.into())? as u32)
                .to_be_bytes()
                .to_vec()
        }
        DataType::I32 | DataType::I32Swapped => {
            (integer_in_range(value, data_type, i32::MIN.into(), i32::MAX.into())? as i32)
                .to_be_bytes()
                .to_vec()
        }
        DataType::U64 | DataType::U64Swapped => {
            (integer_in_range(value, data_type, 0, u64::MAX.into())? as u64)
                .to_be_bytes()
                .to_vec()
        }
        DataType::I64 | DataType::I64Swapped => {
            (integer_in_range(value, data_type, i64::MIN.into(), i64::MAX.into())? as i64)
                .to_be_bytes()
                .to_vec()
        }
        DataType::F32 | DataType::F32Swapped => {
            let v = match *value {
                ModbusValue::F32(f) => f,
                other => {
                    let wide = other.as_f64();
                    if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
                        return Err(out_of_range(value, data_type));
                    }
                    wide as f32
                }
            };
            v.to_be_bytes().to_vec()
        }
        DataType::F64 | DataType::F64Swapped => value.as_f64().to_be_bytes().to_vec(),
    };

    let mut words = words_from_bytes(&bytes)?;
    data_type.word_order().arrange(&mut words);
    Ok(words)
}

/// Integer view of `value`, which must lie in `[min, max]`. Integers stay
/// exact; floats are rounded and must be finite.
fn integer_in_range(
    value: &ModbusValue,
    data_type: DataType,
    min: i128,
    max: i128,
) -> ModbusResult<i128> {
    let exact = match *value {
        ModbusValue::Bool(b) => Some(i128::from(b)),
        ModbusValue::U16(v) => Some(i128::from(v)),
        ModbusValue::I16(v) => Some(i128::from(v)),
        ModbusValue::U32(v) => Some(i128::from(v)),
        ModbusValue::I32(v) => Some(i128::from(v)),
        ModbusValue::U64(v) => Some(i128::from(v)),
        ModbusValue::I64(v) => Some(i128::from(v)),
        ModbusValue::F32(f) => float_to_i128(f64::from(f)),
        ModbusValue::F64(f) => float_to_i128(f),
    };
    exact
        .filter(|v| (min..=max).contains(v))
        .ok_or_else(|| out_of_range(value, data_type))
}

fn float_to_i128(f: f64) -> Option<i128> {
    // every finite f64 beyond the i128 range is also beyond any target range
    f.is_finite().then(|| f.round() as i128)
}

fn out_of_range(value: &ModbusValue, data_type: DataType) -> ModbusError {
    ModbusError::invalid_data(format!(
        "Value {} does not fit a {:?} point",
        value, data_type
    ))
}

fn be4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn be8(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bools_from_bytes_lsb_first() {
        let bits = bools_from_bytes(&[0b0000_0101, 0b0000_0001], 9).unwrap();
        assert_eq!(
            bits,
            vec![true, false, true, false, false, false, false, false, true]
        );
    }

    #[test]
    fn test_bools_from_bytes_rejects_short_buffer() {
        assert!(matches!(
            bools_from_bytes(&[0xFF], 9),
            Err(ModbusError::InvalidData { .. })
        ));
        assert_eq!(bools_from_bytes(&[], 0).unwrap(), Vec::<bool>::new());
    }

    #[test]
    fn test_bytes_from_bools_pads_last_byte() {
        assert_eq!(bytes_from_bools(&[true, true, false, true]), vec![0b0000_1011]);
        assert_eq!(bytes_from_bools(&[false; 9]), vec![0, 0]);
    }

    #[test]
    fn test_floats_from_bytes() {
        let mut bytes = 25.5f32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(-1.0f32).to_be_bytes());
        assert_eq!(floats_from_bytes(&bytes).unwrap(), vec![25.5, -1.0]);
        assert!(floats_from_bytes(&bytes[..7]).is_err());
    }

    #[test]
    fn test_register_pair_high_word_first() {
        // 3.25 = 0x40500000
        assert_eq!(register_pair_from_f32(3.25), [0x4050, 0x0000]);
        assert_eq!(f32_from_register_pair([0x4050, 0x0000]), 3.25);
        assert_eq!(register_pair_from_value(3.25), [0x4050, 0x0000]);
    }

    #[test]
    fn test_decode_word_orders() {
        assert_eq!(
            decode_words(&[0x1234, 0x5678], DataType::U32).unwrap(),
            ModbusValue::U32(0x1234_5678)
        );
        assert_eq!(
            decode_words(&[0x5678, 0x1234], DataType::U32Swapped).unwrap(),
            ModbusValue::U32(0x1234_5678)
        );
        assert_eq!(
            decode_words(&[0x0000, 0x4050], DataType::F32Swapped).unwrap(),
            ModbusValue::F32(3.25)
        );
        assert_eq!(
            decode_words(&[0x0004, 0x0003, 0x0002, 0x0001], DataType::U64Swapped).unwrap(),
            ModbusValue::U64(0x0001_0002_0003_0004)
        );
        assert_eq!(
            decode_words(&[0xFFFF], DataType::I16).unwrap(),
            ModbusValue::I16(-1)
        );
    }

    #[test]
    fn test_decode_rejects_wrong_word_count() {
        assert!(decode_words(&[0x1234], DataType::F32).is_err());
        assert!(decode_words(&[1, 2, 3], DataType::I64).is_err());
        assert!(decode_words(&[1], DataType::Bit).is_err());
    }

    #[test]
    fn test_encode_mirrors_decode() {
        for data_type in [
            DataType::I32,
            DataType::I32Swapped,
            DataType::I64,
            DataType::I64Swapped,
        ] {
            let words = encode_value(&ModbusValue::I64(-123_456), data_type).unwrap();
            assert_eq!(words.len(), usize::from(data_type.word_count()));
            assert_eq!(decode_words(&words, data_type).unwrap().as_i64(), -123_456);
        }

        let words = encode_value(&ModbusValue::F64(1.5), DataType::F64Swapped).unwrap();
        assert_eq!(
            decode_words(&words, DataType::F64Swapped).unwrap(),
            ModbusValue::F64(1.5)
        );
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        for (value, data_type) in [
            (ModbusValue::U32(70_000), DataType::U16),
            (ModbusValue::I32(-5), DataType::U16),
            (ModbusValue::F32(-40_000.4), DataType::I16),
            (ModbusValue::I64(-1), DataType::U64Swapped),
            (ModbusValue::U64(u64::MAX), DataType::I64),
            (ModbusValue::F64(f64::NAN), DataType::I32),
            (ModbusValue::F64(f64::INFINITY), DataType::U32),
            (ModbusValue::F64(1e300), DataType::F32),
        ] {
            let err = encode_value(&value, data_type).unwrap_err();
            assert!(matches!(err, ModbusError::InvalidData { .. }), "{:?}", err);
        }
    }

    #[test]
    fn test_encode_in_range_values() {
        assert_eq!(
            encode_value(&ModbusValue::U32(65_535), DataType::U16).unwrap(),
            vec![0xFFFF]
        );
        assert_eq!(
            encode_value(&ModbusValue::I32(-32_768), DataType::I16).unwrap(),
            vec![0x8000]
        );
        assert_eq!(
            encode_value(&ModbusValue::F64(12.6), DataType::U16).unwrap(),
            vec![13]
        );
        assert_eq!(
            encode_value(&ModbusValue::F64(-0.4), DataType::U16).unwrap(),
            vec![0]
        );
        assert_eq!(
            encode_value(&ModbusValue::F32(3.25), DataType::F32).unwrap(),
            vec![0x4050, 0x0000]
        );
        assert_eq!(
            encode_value(&ModbusValue::U64(u64::MAX), DataType::U64).unwrap(),
            vec![0xFFFF; 4]
        );
    }
}
