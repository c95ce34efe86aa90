//! Big-endian register encode/decode, generalized from the teacher's
//! `words_to_protocol_value!`/`protocol_value_to_words!` macros
//! (`protocol.rs`) from a per-register-type macro into functions
//! dispatched on the runtime [`DataType`] enum.

use crate::error::{Error, Result};
use crate::registers::{DataType, RegisterDescriptor};

/// A decoded register value. `Null` stands for "read attempted and
/// failed, or register unsupported" per the Snapshot data model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Value {
    Int(i64),
    Real(f64),
    Str(String),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Decodes a raw register vector as `descriptor`'s declared type, using
/// big-endian byte order and big-endian word order for multi-register
/// types. Never fails on out-of-range bits: implausible values are a job
/// for the Support Validator, not the codec.
pub fn decode(descriptor: &RegisterDescriptor, words: &[u16]) -> Result<Value> {
    if words.len() != descriptor.count() as usize {
        return Err(Error::DecodeError(descriptor.name));
    }

    if let DataType::String { .. } = descriptor.data_type {
        let mut bytes = Vec::with_capacity(words.len() * 2);
        for w in words {
            bytes.push((w >> 8) as u8);
            bytes.push((*w & 0xFF) as u8);
        }
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        let s = String::from_utf8_lossy(&bytes).into_owned();
        return Ok(Value::Str(s));
    }

    let mut bytes = Vec::with_capacity(words.len() * 2);
    for w in words {
        bytes.extend_from_slice(&w.to_be_bytes());
    }

    let raw: i128 = match descriptor.data_type {
        DataType::U16 => u16::from_be_bytes(bytes[..2].try_into().unwrap()) as i128,
        DataType::S16 => i16::from_be_bytes(bytes[..2].try_into().unwrap()) as i128,
        DataType::U32 => u32::from_be_bytes(bytes[..4].try_into().unwrap()) as i128,
        DataType::S32 => i32::from_be_bytes(bytes[..4].try_into().unwrap()) as i128,
        DataType::U64 => u64::from_be_bytes(bytes[..8].try_into().unwrap()) as i128,
        DataType::String { .. } => unreachable!("handled above"),
    };

    if (descriptor.gain - 1.0).abs() < f64::EPSILON {
        Ok(Value::Int(raw as i64))
    } else {
        Ok(Value::Real(raw as f64 / descriptor.gain))
    }
}

/// Encodes a user-supplied value into the big-endian word vector for
/// `descriptor`, applying gain by multiplying and truncating to an
/// integer. Single-register `U16` values in `[0, 255]` are emitted
/// directly, bypassing the general byte-split path: a workaround for
/// devices that mis-parse the generic builder output for tiny values.
pub fn encode(descriptor: &RegisterDescriptor, value: f64) -> Result<Vec<u16>> {
    let scaled = (value * descriptor.gain).round();

    if let DataType::U16 = descriptor.data_type {
        if (0.0..=255.0).contains(&scaled) {
            return Ok(vec![scaled as u16]);
        }
    }

    let bytes: Vec<u8> = match descriptor.data_type {
        DataType::U16 => (scaled as i64 as u16).to_be_bytes().to_vec(),
        DataType::S16 => (scaled as i64 as i16).to_be_bytes().to_vec(),
        DataType::U32 => (scaled as i64 as u32).to_be_bytes().to_vec(),
        DataType::S32 => (scaled as i64 as i32).to_be_bytes().to_vec(),
        DataType::U64 => (scaled as i64 as u64).to_be_bytes().to_vec(),
        DataType::String { .. } => return Err(Error::DecodeError(descriptor.name)),
    };

    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{Access, RegisterBank, Unit};

    fn u16_reg(gain: f64) -> RegisterDescriptor {
        RegisterDescriptor::new(
            "t",
            100,
            DataType::U16,
            gain,
            Unit::None,
            Access::ReadWrite,
            RegisterBank::Holding,
        )
    }

    fn s32_reg(gain: f64) -> RegisterDescriptor {
        RegisterDescriptor::new(
            "t",
            100,
            DataType::S32,
            gain,
            Unit::None,
            Access::ReadWrite,
            RegisterBank::Holding,
        )
    }

    #[test]
    fn u16_roundtrip_in_0_255_uses_direct_path() {
        let d = u16_reg(1.0);
        for v in [0u16, 1, 255] {
            let words = encode(&d, v as f64).unwrap();
            assert_eq!(words, vec![v]);
            assert_eq!(decode(&d, &words).unwrap(), Value::Int(v as i64));
        }
    }

    #[test]
    fn s32_roundtrip_with_gain_within_one_quantization_step() {
        let d = s32_reg(100.0);
        let original = 12.34;
        let words = encode(&d, original).unwrap();
        let decoded = decode(&d, &words).unwrap();
        let back = decoded.as_f64().unwrap();
        assert!((back - original).abs() <= 1.0 / d.gain);
    }

    #[test]
    fn negative_s32_roundtrips() {
        let d = s32_reg(1000.0);
        let words = encode(&d, -1.5).unwrap();
        assert_eq!(decode(&d, &words).unwrap(), Value::Real(-1.5));
    }

    #[test]
    fn string_decode_strips_trailing_zero_bytes_but_keeps_all_zero_as_valid() {
        let d = RegisterDescriptor::new(
            "s",
            1,
            DataType::String { len_registers: 2 },
            1.0,
            Unit::None,
            Access::ReadOnly,
            RegisterBank::Input,
        );
        let words = [0x4142, 0x0000];
        assert_eq!(decode(&d, &words).unwrap(), Value::Str("AB".to_string()));

        let all_zero = [0x0000, 0x0000];
        assert_eq!(decode(&d, &all_zero).unwrap(), Value::Str(String::new()));
    }
}
