//! Configuration key namespace: the closed `CONF_*` key set, the measurement
//! quantity/flag enumerations, and the typed variant value that flows
//! through every get/set/list call (spec §4.C).

pub mod keys;
pub mod quantity;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use keys::{ConfigKey, ConfigKeyInfo};
pub use quantity::{MeasuredQuantity, QuantityFlags};

use crate::error::{Error, ErrorKind, Result};
use crate::rational::Rational;

bitflags! {
    /// Per-call capability bits a driver publishes for a key in its
    /// options list, and the bit a caller asserts when dispatching.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capability: u32 {
        /// Value can be read.
        const GET = 1 << 0;
        /// Value can be written.
        const SET = 1 << 1;
        /// Possible values can be enumerated.
        const LIST = 1 << 2;
    }
}

/// The declared value type of a configuration key. This is the single
/// source of truth `variant_type_check` validates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// `u32`
    Uint32,
    /// `i32`
    Int32,
    /// `u64`
    Uint64,
    /// UTF-8 string
    String,
    /// `bool`
    Bool,
    /// IEEE-754 double
    Float,
    /// Rational value read/written as a period (seconds)
    RationalPeriod,
    /// Rational value read/written as volts
    RationalVolt,
    /// An ordered list of `(String, String)` pairs
    KeyValueMap,
    /// A `(u64, u64)` inclusive range
    Uint64Range,
    /// A `(f64, f64)` inclusive range
    DoubleRange,
    /// `(MeasuredQuantity, QuantityFlags)`
    MeasuredQuantity,
}

/// A typed configuration value. Every variant here corresponds 1:1 to a
/// `ValueType`; `variant_type_check` is the only place the two are compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    /// See [`ValueType::Uint32`]
    Uint32(u32),
    /// See [`ValueType::Int32`]
    Int32(i32),
    /// See [`ValueType::Uint64`]
    Uint64(u64),
    /// See [`ValueType::String`]
    String(String),
    /// See [`ValueType::Bool`]
    Bool(bool),
    /// See [`ValueType::Float`]
    Float(f64),
    /// See [`ValueType::RationalPeriod`]
    RationalPeriod(Rational),
    /// See [`ValueType::RationalVolt`]
    RationalVolt(Rational),
    /// See [`ValueType::KeyValueMap`]
    KeyValueMap(Vec<(String, String)>),
    /// See [`ValueType::Uint64Range`]
    Uint64Range(u64, u64),
    /// See [`ValueType::DoubleRange`]
    DoubleRange(f64, f64),
    /// See [`ValueType::MeasuredQuantity`]
    MeasuredQuantity(MeasuredQuantity, QuantityFlags),
}

impl Variant {
    /// The `ValueType` this value's shape corresponds to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Variant::Uint32(_) => ValueType::Uint32,
            Variant::Int32(_) => ValueType::Int32,
            Variant::Uint64(_) => ValueType::Uint64,
            Variant::String(_) => ValueType::String,
            Variant::Bool(_) => ValueType::Bool,
            Variant::Float(_) => ValueType::Float,
            Variant::RationalPeriod(_) => ValueType::RationalPeriod,
            Variant::RationalVolt(_) => ValueType::RationalVolt,
            Variant::KeyValueMap(_) => ValueType::KeyValueMap,
            Variant::Uint64Range(_, _) => ValueType::Uint64Range,
            Variant::DoubleRange(_, _) => ValueType::DoubleRange,
            Variant::MeasuredQuantity(_, _) => ValueType::MeasuredQuantity,
        }
    }
}

/// Verify `value`'s declared kind matches `key`'s declared type.
///
/// No configuration call reaches a driver before this check passes (spec
/// §4.C, testable property in §8).
pub fn variant_type_check(key: ConfigKey, value: &Variant) -> Result<()> {
    let info = keys::lookup(key)
        .ok_or_else(|| Error::new(ErrorKind::Arg, format!("unknown configuration key {:?}", key)))?;
    if value.value_type() != info.value_type {
        return Err(Error::new(
            ErrorKind::Arg,
            format!(
                "key {} expects {:?}, got {:?}",
                info.id,
                info.value_type,
                value.value_type()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_check_rejects_mismatch() {
        let err = variant_type_check(ConfigKey::Samplerate, &Variant::Bool(true)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arg);
    }

    #[test]
    fn type_check_accepts_match() {
        assert!(variant_type_check(ConfigKey::Samplerate, &Variant::Uint64(1_000_000)).is_ok());
    }
}
