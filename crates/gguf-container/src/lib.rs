//! GGUF container codec.
//!
//! Reads and writes the self-describing part of a GGUF file: the fixed
//! header, the ordered key-value metadata and the tensor index. Tensor
//! payloads stay on disk; a [`GgufContainer`] only records their sizes and
//! offsets so that callers can stream them.
//!
//! # Example
//!
//! ```no_run
//! use gguf_container::{GgufContainer, parse_header};
//! use std::fs;
//!
//! let data = fs::read("model.gguf").unwrap();
//! let header = parse_header(&data).unwrap();
//! println!("GGUF v{} with {} tensors", header.version, header.tensor_count);
//!
//! let container = GgufContainer::open("model.gguf").unwrap();
//! for t in container.tensors() {
//!     println!("{} {:?} {} bytes @ {}", t.name, t.dtype, t.size, t.offset);
//! }
//! ```

use serde::{Deserialize, Serialize};

mod container;
mod error;
mod tensor;
mod value;
mod wire;

pub use container::GgufContainer;
pub use error::{GgufError, Result};
pub use tensor::{GgmlType, MAX_DIMS, TensorInfo};
pub use value::{GgufKv, GgufValue};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The four-byte magic that every GGUF file starts with.
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";
/// Minimum supported GGUF version.
pub const GGUF_VERSION_MIN: u32 = 2;
/// Maximum supported GGUF version (inclusive); new containers are written with it.
pub const GGUF_VERSION_MAX: u32 = 3;
/// Length of the fixed header: magic, version, tensor count, KV count.
pub const GGUF_HEADER_LEN: usize = 24;
/// Data alignment used when the file does not carry `general.alignment`.
pub const GGUF_DEFAULT_ALIGNMENT: u64 = 32;
/// Metadata key overriding the data alignment.
pub const KEY_GENERAL_ALIGNMENT: &str = "general.alignment";

/// Round `off` up to the next multiple of `align` (a power of two).
#[inline]
pub const fn align_up(off: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two(), "alignment should be power-of-two");
    (off + align - 1) & !(align - 1)
}

/// [`align_up`] that returns `None` instead of overflowing.
#[inline]
pub const fn checked_align_up(off: u64, align: u64) -> Option<u64> {
    match off.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

// ---------------------------------------------------------------------------
// Value-type discriminant
// ---------------------------------------------------------------------------

/// Discriminant tag for GGUF metadata values.
///
/// Numeric values are the on-disk type ids of the GGUF format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
#[non_exhaustive]
pub enum GgufValueType {
    Uint8 = 0,
    Int8 = 1,
    Uint16 = 2,
    Int16 = 3,
    Uint32 = 4,
    Int32 = 5,
    Float32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    Uint64 = 10,
    Int64 = 11,
    Float64 = 12,
}

impl GgufValueType {
    /// Convert from the raw u32 discriminant in the file.
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Uint8),
            1 => Some(Self::Int8),
            2 => Some(Self::Uint16),
            3 => Some(Self::Int16),
            4 => Some(Self::Uint32),
            5 => Some(Self::Int32),
            6 => Some(Self::Float32),
            7 => Some(Self::Bool),
            8 => Some(Self::String),
            9 => Some(Self::Array),
            10 => Some(Self::Uint64),
            11 => Some(Self::Int64),
            12 => Some(Self::Float64),
            _ => None,
        }
    }

    /// Width of a fixed-size scalar; `None` for strings and arrays.
    pub const fn scalar_size(self) -> Option<usize> {
        match self {
            Self::Uint8 | Self::Int8 | Self::Bool => Some(1),
            Self::Uint16 | Self::Int16 => Some(2),
            Self::Uint32 | Self::Int32 | Self::Float32 => Some(4),
            Self::Uint64 | Self::Int64 | Self::Float64 => Some(8),
            Self::String | Self::Array => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Parsed GGUF file header (magic + version + counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GgufFileInfo {
    /// GGUF format version (2 or 3).
    pub version: u32,
    /// Number of tensors described in the index.
    pub tensor_count: u64,
    /// Number of metadata key-value entries.
    pub metadata_count: u64,
}

/// Parse the fixed 24-byte header at the start of `data`.
///
/// [`GgufContainer::read_from`] starts here, so a file that fails this check
/// never reaches the metadata reader.
pub fn parse_header(data: &[u8]) -> Result<GgufFileInfo> {
    let Some(fixed) = data.get(..GGUF_HEADER_LEN) else {
        return Err(GgufError::ShortHeader(data.len()));
    };
    let magic = [fixed[0], fixed[1], fixed[2], fixed[3]];
    if magic != GGUF_MAGIC {
        return Err(GgufError::BadMagic(magic));
    }

    let version = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
    if !(GGUF_VERSION_MIN..=GGUF_VERSION_MAX).contains(&version) {
        return Err(GgufError::UnsupportedVersion(version));
    }

    let mut count = [0u8; 8];
    count.copy_from_slice(&fixed[8..16]);
    let tensor_count = u64::from_le_bytes(count);
    count.copy_from_slice(&fixed[16..24]);
    let metadata_count = u64::from_le_bytes(count);

    Ok(GgufFileInfo { version, tensor_count, metadata_count })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
