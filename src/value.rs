//! # Typed point values
//!
//! `ModbusValue` is what callers hand to writes and what reads, batch reads
//! and listeners get back. The wire representation is decided by the
//! [`DataType`](crate::types::DataType) of the point, not by the variant:
//! writing `F64(12.6)` to an `I16` point rounds to `13`, while `U32(70_000)`
//! is rejected because it does not fit.

use std::fmt;

/// A typed value read from or written to a point.
///
/// | Variant | Produced by |
/// |---------|-------------|
/// | Bool | coils, discrete inputs |
/// | U16/I16 | single-register types |
/// | U32/I32/F32 | two-register types, plain or swapped |
/// | U64/I64/F64 | four-register types, plain or swapped |
///
/// ```rust
/// use voltage_link::ModbusValue;
///
/// let setpoint = ModbusValue::F32(25.5);
/// assert!((setpoint.as_f64() - 25.5).abs() < 1e-6);
/// assert!(setpoint.as_bool());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModbusValue {
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl ModbusValue {
    /// Numeric view used by the encoder before the target type's range check.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match *self {
            ModbusValue::Bool(b) => f64::from(u8::from(b)),
            ModbusValue::U16(v) => f64::from(v),
            ModbusValue::I16(v) => f64::from(v),
            ModbusValue::U32(v) => f64::from(v),
            ModbusValue::I32(v) => f64::from(v),
            ModbusValue::F32(v) => f64::from(v),
            ModbusValue::U64(v) => v as f64,
            ModbusValue::I64(v) => v as f64,
            ModbusValue::F64(v) => v,
        }
    }

    /// Integer view. Floats are rounded, out-of-range values saturate.
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match *self {
            ModbusValue::Bool(b) => i64::from(b),
            ModbusValue::U16(v) => i64::from(v),
            ModbusValue::I16(v) => i64::from(v),
            ModbusValue::U32(v) => i64::from(v),
            ModbusValue::I32(v) => i64::from(v),
            ModbusValue::F32(v) => v.round() as i64,
            ModbusValue::U64(v) => i64::try_from(v).unwrap_or(i64::MAX),
            ModbusValue::I64(v) => v,
            ModbusValue::F64(v) => v.round() as i64,
        }
    }

    /// Truthiness for coil writes and heartbeat checks: anything non-zero is on.
    #[inline]
    pub fn as_bool(&self) -> bool {
        match *self {
            ModbusValue::Bool(b) => b,
            ModbusValue::F32(v) => v != 0.0,
            ModbusValue::F64(v) => v != 0.0,
            ModbusValue::U64(v) => v != 0,
            other => other.as_i64() != 0,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ModbusValue::Bool(_) => "bool",
            ModbusValue::U16(_) => "u16",
            ModbusValue::I16(_) => "i16",
            ModbusValue::U32(_) => "u32",
            ModbusValue::I32(_) => "i32",
            ModbusValue::F32(_) => "f32",
            ModbusValue::U64(_) => "u64",
            ModbusValue::I64(_) => "i64",
            ModbusValue::F64(_) => "f64",
        }
    }
}

impl fmt::Display for ModbusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModbusValue::Bool(v) => write!(f, "{}", v),
            ModbusValue::U16(v) => write!(f, "{}", v),
            ModbusValue::I16(v) => write!(f, "{}", v),
            ModbusValue::U32(v) => write!(f, "{}", v),
            ModbusValue::I32(v) => write!(f, "{}", v),
            ModbusValue::F32(v) => write!(f, "{}", v),
            ModbusValue::U64(v) => write!(f, "{}", v),
            ModbusValue::I64(v) => write!(f, "{}", v),
            ModbusValue::F64(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ModbusValue {
                fn from(v: $ty) -> Self {
                    ModbusValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_primitive! {
    bool => Bool,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    f32 => F32,
    u64 => U64,
    i64 => I64,
    f64 => F64,
}
