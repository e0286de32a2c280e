//! Register value codec
//!
//! Pure conversions between typed scalar values and sequences of 16-bit
//! register words, parameterized by data type, scale factor and byte order.
//! No state, no I/O - the polling client and the simulator store both go
//! through these functions so the two sides stay wire-compatible.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RegTraceError, Result};

/// Supported register data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Uint64,
    Int64,
    Float64,
}

impl DataType {
    /// Number of consecutive 16-bit registers a value of this type occupies
    pub fn count(&self) -> u16 {
        match self {
            Self::Bool | Self::Uint16 | Self::Int16 => 1,
            Self::Uint32 | Self::Int32 | Self::Float32 => 2,
            Self::Uint64 | Self::Int64 | Self::Float64 => 4,
        }
    }

    /// Whether decoded values stay floating-point after scaling
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Uint64 => "uint64",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
        }
    }
}

impl Default for DataType {
    fn default() -> Self {
        Self::Uint16
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Byte/word order for multi-register values
///
/// Naming follows the register map document: `big` is standard Modbus
/// (most significant word first), `little` reverses the word sequence,
/// the `_swap` variants swap adjacent word pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    Big,
    Little,
    BigSwap,
    LittleSwap,
}

impl ByteOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Big => "big",
            Self::Little => "little",
            Self::BigSwap => "big_swap",
            Self::LittleSwap => "little_swap",
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::Big
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded register value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl Value {
    /// Boolean interpretation (nonzero test for numeric variants)
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Uint(u) => *u != 0,
            Self::Float(f) => *f != 0.0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int(i) => *i as f64,
            Self::Uint(u) => *u as f64,
            Self::Float(f) => *f,
        }
    }

    /// Truncating signed integer interpretation
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Bool(b) => i64::from(*b),
            Self::Int(i) => *i,
            Self::Uint(u) => i64::try_from(*u).unwrap_or(i64::MAX),
            Self::Float(f) => *f as i64,
        }
    }

    /// Truncating unsigned integer interpretation (negative values clamp to 0)
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Bool(b) => u64::from(*b),
            Self::Int(i) => u64::try_from(*i).unwrap_or(0),
            Self::Uint(u) => *u,
            Self::Float(f) => *f as u64,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Uint(u) => serializer.serialize_u64(*u),
            Self::Float(f) => serializer.serialize_f64(*f),
        }
    }
}

// Word reorder permutations, indexed by (sequence length, byte order).
// For 2-word values `big_swap` and `little_swap` collapse to the same
// swap as `little`; deployed devices depend on this exact mapping.
const SWAP_PAIR_2: [usize; 2] = [1, 0];
const REVERSE_4: [usize; 4] = [3, 2, 1, 0];
const SWAP_PAIRS_4: [usize; 4] = [1, 0, 3, 2];

fn word_permutation(len: usize, order: ByteOrder) -> Option<&'static [usize]> {
    match (len, order) {
        (2, ByteOrder::Little | ByteOrder::BigSwap | ByteOrder::LittleSwap) => Some(&SWAP_PAIR_2),
        (4, ByteOrder::Little | ByteOrder::LittleSwap) => Some(&REVERSE_4),
        (4, ByteOrder::BigSwap) => Some(&SWAP_PAIRS_4),
        _ => None,
    }
}

/// Reorder a register word sequence according to byte order.
///
/// The permutation is its own inverse for every supported order, so the
/// same call is used before decoding and after encoding.
pub fn reorder_words(words: &[u16], order: ByteOrder) -> Vec<u16> {
    match word_permutation(words.len(), order) {
        Some(perm) => perm.iter().map(|&i| words[i]).collect(),
        None => words.to_vec(),
    }
}

fn scaled_int(raw: i64, scale: f64) -> Value {
    if scale == 1.0 {
        Value::Int(raw)
    } else {
        // Multiply then truncate, never round
        Value::Int((raw as f64 * scale) as i64)
    }
}

fn scaled_uint(raw: u64, scale: f64) -> Value {
    if scale == 1.0 {
        Value::Uint(raw)
    } else {
        Value::Uint((raw as f64 * scale) as u64)
    }
}

fn words_to_u32(words: &[u16]) -> u32 {
    (u32::from(words[0]) << 16) | u32::from(words[1])
}

fn words_to_u64(words: &[u16]) -> u64 {
    (u64::from(words[0]) << 48)
        | (u64::from(words[1]) << 32)
        | (u64::from(words[2]) << 16)
        | u64::from(words[3])
}

fn u32_to_words(value: u32) -> Vec<u16> {
    vec![(value >> 16) as u16, value as u16]
}

fn u64_to_words(value: u64) -> Vec<u16> {
    vec![
        (value >> 48) as u16,
        (value >> 32) as u16,
        (value >> 16) as u16,
        value as u16,
    ]
}

/// Decode raw register words into a typed, scaled value.
///
/// Words are reordered per `byte_order` first, then interpreted as a
/// big-endian byte sequence. Integer results are scaled by multiplying
/// and truncating; float results stay floating-point; booleans ignore
/// the scale entirely.
pub fn decode_value(
    words: &[u16],
    datatype: DataType,
    scale: f64,
    byte_order: ByteOrder,
) -> Result<Value> {
    let needed = datatype.count() as usize;
    if words.len() < needed {
        return Err(RegTraceError::CodecError(format!(
            "insufficient registers for {datatype}: need {needed}, got {}",
            words.len()
        )));
    }
    let regs = reorder_words(&words[..needed], byte_order);

    let value = match datatype {
        DataType::Bool => Value::Bool(regs[0] != 0),
        DataType::Uint16 => scaled_int(i64::from(regs[0]), scale),
        DataType::Int16 => scaled_int(i64::from(regs[0] as i16), scale),
        DataType::Uint32 => scaled_int(i64::from(words_to_u32(&regs)), scale),
        DataType::Int32 => scaled_int(i64::from(words_to_u32(&regs) as i32), scale),
        DataType::Float32 => Value::Float(f64::from(f32::from_bits(words_to_u32(&regs))) * scale),
        DataType::Uint64 => scaled_uint(words_to_u64(&regs), scale),
        DataType::Int64 => scaled_int(words_to_u64(&regs) as i64, scale),
        DataType::Float64 => Value::Float(f64::from_bits(words_to_u64(&regs)) * scale),
    };
    Ok(value)
}

fn encode_scaled_i64(value: &Value, scale: f64) -> i64 {
    if scale == 0.0 || scale == 1.0 {
        // Scale of zero would divide by zero; encode the unscaled value
        value.as_i64()
    } else {
        (value.as_f64() / scale) as i64
    }
}

fn encode_scaled_u64(value: &Value, scale: f64) -> u64 {
    if scale == 0.0 || scale == 1.0 {
        value.as_u64()
    } else {
        (value.as_f64() / scale) as u64
    }
}

fn encode_scaled_f64(value: &Value, scale: f64) -> f64 {
    if scale == 0.0 {
        value.as_f64()
    } else {
        value.as_f64() / scale
    }
}

/// Encode a typed value into raw register words.
///
/// The inverse of [`decode_value`]: divide by scale (skipped when the
/// scale is exactly zero), truncate/cast to the target width, pack
/// big-endian, then apply the byte-order reordering.
pub fn encode_value(value: &Value, datatype: DataType, scale: f64, byte_order: ByteOrder) -> Vec<u16> {
    let regs = match datatype {
        DataType::Bool => vec![u16::from(value.is_truthy())],
        DataType::Uint16 => vec![(encode_scaled_i64(value, scale) & 0xFFFF) as u16],
        DataType::Int16 => vec![encode_scaled_i64(value, scale) as i16 as u16],
        DataType::Uint32 => u32_to_words(encode_scaled_i64(value, scale) as u32),
        DataType::Int32 => u32_to_words(encode_scaled_i64(value, scale) as i32 as u32),
        DataType::Float32 => u32_to_words((encode_scaled_f64(value, scale) as f32).to_bits()),
        DataType::Uint64 => u64_to_words(encode_scaled_u64(value, scale)),
        DataType::Int64 => u64_to_words(encode_scaled_i64(value, scale) as u64),
        DataType::Float64 => u64_to_words(encode_scaled_f64(value, scale).to_bits()),
    };
    reorder_words(&regs, byte_order)
}
