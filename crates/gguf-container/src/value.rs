//! Typed metadata values and their wire encoding.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::GgufValueType;
use crate::error::{GgufError, Result};
use crate::wire::{
    MAX_KEY_LEN, MAX_STR_LEN, read_array, read_string, read_u8, read_u32_le, read_u64_le,
    string_len, write_string, write_u32_le, write_u64_le,
};

/// Upper bound on array lengths accepted from a file.
const MAX_ARRAY_LEN: u64 = 1 << 28;

/// A parsed GGUF metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum GgufValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    /// Homogeneous array; the element type is kept so that empty arrays
    /// serialize back to identical bytes.
    Array(GgufValueType, Vec<Self>),
    Uint64(u64),
    Int64(i64),
    Float64(f64),
}

impl GgufValue {
    pub fn value_type(&self) -> GgufValueType {
        match self {
            Self::Uint8(_) => GgufValueType::Uint8,
            Self::Int8(_) => GgufValueType::Int8,
            Self::Uint16(_) => GgufValueType::Uint16,
            Self::Int16(_) => GgufValueType::Int16,
            Self::Uint32(_) => GgufValueType::Uint32,
            Self::Int32(_) => GgufValueType::Int32,
            Self::Float32(_) => GgufValueType::Float32,
            Self::Bool(_) => GgufValueType::Bool,
            Self::String(_) => GgufValueType::String,
            Self::Array(..) => GgufValueType::Array,
            Self::Uint64(_) => GgufValueType::Uint64,
            Self::Int64(_) => GgufValueType::Int64,
            Self::Float64(_) => GgufValueType::Float64,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match *self {
            Self::Uint16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::Uint32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Number of bytes the value payload occupies on disk (type tag excluded).
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::String(s) => string_len(s),
            // element type + count + elements
            Self::Array(_, items) => 4 + 8 + items.iter().map(Self::encoded_len).sum::<usize>(),
            other => other.value_type().scalar_size().unwrap_or(0),
        }
    }

    /// Read a value payload of type `ty`.
    pub(crate) fn read<R: Read>(r: &mut R, ty: GgufValueType) -> Result<Self> {
        Ok(match ty {
            GgufValueType::Uint8 => Self::Uint8(read_u8(r)?),
            GgufValueType::Int8 => Self::Int8(read_u8(r)? as i8),
            GgufValueType::Uint16 => Self::Uint16(u16::from_le_bytes(read_array(r)?)),
            GgufValueType::Int16 => Self::Int16(i16::from_le_bytes(read_array(r)?)),
            GgufValueType::Uint32 => Self::Uint32(read_u32_le(r)?),
            GgufValueType::Int32 => Self::Int32(i32::from_le_bytes(read_array(r)?)),
            GgufValueType::Float32 => Self::Float32(f32::from_le_bytes(read_array(r)?)),
            GgufValueType::Bool => Self::Bool(read_u8(r)? != 0),
            GgufValueType::String => Self::String(read_string(r, MAX_STR_LEN)?),
            GgufValueType::Array => Self::read_array_value(r)?,
            GgufValueType::Uint64 => Self::Uint64(read_u64_le(r)?),
            GgufValueType::Int64 => Self::Int64(i64::from_le_bytes(read_array(r)?)),
            GgufValueType::Float64 => Self::Float64(f64::from_le_bytes(read_array(r)?)),
        })
    }

    fn read_array_value<R: Read>(r: &mut R) -> Result<Self> {
        let raw_ty = read_u32_le(r)?;
        let elem_ty = GgufValueType::from_u32(raw_ty).ok_or(GgufError::InvalidKvType(raw_ty))?;
        if elem_ty == GgufValueType::Array {
            return Err(GgufError::malformed("nested arrays are not supported"));
        }
        let len = read_u64_le(r)?;
        if len > MAX_ARRAY_LEN {
            return Err(GgufError::malformed(format!("array length {len} exceeds limit")));
        }

        // Grow as elements arrive rather than trusting `len` for the allocation.
        let mut items = Vec::with_capacity((len as usize).min(4096));
        for _ in 0..len {
            items.push(Self::read(r, elem_ty)?);
        }
        Ok(Self::Array(elem_ty, items))
    }

    /// Write the value payload (type tag excluded).
    pub(crate) fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Self::Uint8(v) => w.write_all(&[*v]),
            Self::Int8(v) => w.write_all(&v.to_le_bytes()),
            Self::Uint16(v) => w.write_all(&v.to_le_bytes()),
            Self::Int16(v) => w.write_all(&v.to_le_bytes()),
            Self::Uint32(v) => w.write_all(&v.to_le_bytes()),
            Self::Int32(v) => w.write_all(&v.to_le_bytes()),
            Self::Float32(v) => w.write_all(&v.to_le_bytes()),
            Self::Bool(v) => w.write_all(&[u8::from(*v)]),
            Self::String(s) => write_string(w, s),
            Self::Array(elem_ty, items) => {
                write_u32_le(w, *elem_ty as u32)?;
                write_u64_le(w, items.len() as u64)?;
                for item in items {
                    item.write(w)?;
                }
                Ok(())
            }
            Self::Uint64(v) => w.write_all(&v.to_le_bytes()),
            Self::Int64(v) => w.write_all(&v.to_le_bytes()),
            Self::Float64(v) => w.write_all(&v.to_le_bytes()),
        }
    }
}

/// A single key-value metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GgufKv {
    pub key: String,
    pub value: GgufValue,
}

impl GgufKv {
    pub fn new(key: impl Into<String>, value: GgufValue) -> Self {
        Self { key: key.into(), value }
    }

    /// On-disk size: key string, `u32` type tag, payload.
    pub fn encoded_len(&self) -> usize {
        string_len(&self.key) + 4 + self.value.encoded_len()
    }

    pub(crate) fn read<R: Read>(r: &mut R) -> Result<Self> {
        let key = read_string(r, MAX_KEY_LEN)?;
        let raw_ty = read_u32_le(r)?;
        let ty = GgufValueType::from_u32(raw_ty).ok_or(GgufError::InvalidKvType(raw_ty))?;
        let value = GgufValue::read(r, ty)?;
        Ok(Self { key, value })
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_string(w, &self.key)?;
        write_u32_le(w, self.value.value_type() as u32)?;
        self.value.write(w)
    }
}
