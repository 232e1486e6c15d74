//! Tensor descriptors from the GGUF tensor index.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::error::{GgufError, Result};
use crate::wire::{MAX_KEY_LEN, read_string, read_u32_le, read_u64_le, string_len, write_string,
    write_u32_le, write_u64_le};

/// GGML supports at most four dimensions.
pub const MAX_DIMS: u32 = 4;

/// GGML element types that can appear in a tensor descriptor.
///
/// Numeric values match the `ggml_type` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
#[repr(u32)]
#[non_exhaustive]
pub enum GgmlType {
    F32 = 0,
    F16 = 1,
    Q4_0 = 2,
    Q4_1 = 3,
    Q5_0 = 6,
    Q5_1 = 7,
    Q8_0 = 8,
    Q8_1 = 9,
    Q2_K = 10,
    Q3_K = 11,
    Q4_K = 12,
    Q5_K = 13,
    Q6_K = 14,
    Q8_K = 15,
    IQ2_XXS = 16,
    IQ2_XS = 17,
    IQ3_XXS = 18,
    IQ1_S = 19,
    IQ4_NL = 20,
    IQ3_S = 21,
    IQ2_S = 22,
    IQ4_XS = 23,
    I8 = 24,
    I16 = 25,
    I32 = 26,
    I64 = 27,
    F64 = 28,
    IQ1_M = 29,
    BF16 = 30,
}

impl GgmlType {
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::F32,
            1 => Self::F16,
            2 => Self::Q4_0,
            3 => Self::Q4_1,
            6 => Self::Q5_0,
            7 => Self::Q5_1,
            8 => Self::Q8_0,
            9 => Self::Q8_1,
            10 => Self::Q2_K,
            11 => Self::Q3_K,
            12 => Self::Q4_K,
            13 => Self::Q5_K,
            14 => Self::Q6_K,
            15 => Self::Q8_K,
            16 => Self::IQ2_XXS,
            17 => Self::IQ2_XS,
            18 => Self::IQ3_XXS,
            19 => Self::IQ1_S,
            20 => Self::IQ4_NL,
            21 => Self::IQ3_S,
            22 => Self::IQ2_S,
            23 => Self::IQ4_XS,
            24 => Self::I8,
            25 => Self::I16,
            26 => Self::I32,
            27 => Self::I64,
            28 => Self::F64,
            29 => Self::IQ1_M,
            30 => Self::BF16,
            _ => return None,
        })
    }

    /// Elements per block (1 for plain element types).
    pub const fn block_size(self) -> u64 {
        match self {
            Self::F32
            | Self::F16
            | Self::BF16
            | Self::F64
            | Self::I8
            | Self::I16
            | Self::I32
            | Self::I64 => 1,
            Self::Q4_0
            | Self::Q4_1
            | Self::Q5_0
            | Self::Q5_1
            | Self::Q8_0
            | Self::Q8_1
            | Self::IQ4_NL => 32,
            _ => 256,
        }
    }

    /// Bytes per block.
    pub const fn type_size(self) -> u64 {
        match self {
            Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
            Self::F64 => 8,
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 => 4,
            Self::I64 => 8,
            Self::Q4_0 => 18,
            Self::Q4_1 => 20,
            Self::Q5_0 => 22,
            Self::Q5_1 => 24,
            Self::Q8_0 => 34,
            Self::Q8_1 => 36,
            Self::Q2_K => 84,
            Self::Q3_K => 110,
            Self::Q4_K => 144,
            Self::Q5_K => 176,
            Self::Q6_K => 210,
            Self::Q8_K => 292,
            Self::IQ2_XXS => 66,
            Self::IQ2_XS => 74,
            Self::IQ3_XXS => 98,
            Self::IQ1_S => 50,
            Self::IQ4_NL => 18,
            Self::IQ3_S => 110,
            Self::IQ2_S => 82,
            Self::IQ4_XS => 136,
            Self::IQ1_M => 56,
        }
    }
}

/// Tensor descriptor from the GGUF tensor index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    /// Dimensions, innermost first.
    pub dims: Vec<u64>,
    pub dtype: GgmlType,
    /// Byte offset into the tensor-data section of the owning file.
    pub offset: u64,
    /// Payload size in bytes, derived from `dims` and `dtype`.
    pub size: u64,
}

impl TensorInfo {
    /// Build a descriptor, computing the payload size from shape and type.
    ///
    /// The offset is assigned when the descriptor is added to a container.
    pub fn new(name: impl Into<String>, dims: Vec<u64>, dtype: GgmlType) -> Result<Self> {
        let name = name.into();
        let size = Self::byte_size(&name, &dims, dtype)?;
        Ok(Self { name, dims, dtype, offset: 0, size })
    }

    pub fn n_elements(&self) -> u64 {
        self.dims.iter().product()
    }

    fn byte_size(name: &str, dims: &[u64], dtype: GgmlType) -> Result<u64> {
        if dims.len() > MAX_DIMS as usize {
            return Err(GgufError::malformed(format!(
                "tensor '{name}' has {} dimensions (max {MAX_DIMS})",
                dims.len()
            )));
        }
        let n_elements = dims
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| GgufError::malformed(format!("tensor '{name}' element count overflows")))?;
        let block = dtype.block_size();
        if dims.first().is_some_and(|&d0| d0 % block != 0) {
            return Err(GgufError::malformed(format!(
                "tensor '{name}': row length is not a multiple of the {dtype:?} block size {block}"
            )));
        }
        (n_elements / block)
            .checked_mul(dtype.type_size())
            .ok_or_else(|| GgufError::malformed(format!("tensor '{name}' byte size overflows")))
    }

    /// On-disk size of this descriptor in the tensor index.
    pub fn encoded_len(&self) -> usize {
        // name + n_dims + dims + type + offset
        string_len(&self.name) + 4 + 8 * self.dims.len() + 4 + 8
    }

    pub(crate) fn read<R: Read>(r: &mut R) -> Result<Self> {
        let name = read_string(r, MAX_KEY_LEN)?;
        let n_dims = read_u32_le(r)?;
        if n_dims > MAX_DIMS {
            return Err(GgufError::malformed(format!(
                "tensor '{name}' has {n_dims} dimensions (max {MAX_DIMS})"
            )));
        }
        let mut dims = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            dims.push(read_u64_le(r)?);
        }
        let raw_ty = read_u32_le(r)?;
        let dtype = GgmlType::from_u32(raw_ty)
            .ok_or_else(|| GgufError::InvalidTensorType { name: name.clone(), ty: raw_ty })?;
        let offset = read_u64_le(r)?;
        let size = Self::byte_size(&name, &dims, dtype)?;
        Ok(Self { name, dims, dtype, offset, size })
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_string(w, &self.name)?;
        write_u32_le(w, self.dims.len() as u32)?;
        for &d in &self.dims {
            write_u64_le(w, d)?;
        }
        write_u32_le(w, self.dtype as u32)?;
        write_u64_le(w, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn plain_types_size_is_elements_times_width() {
        let t = TensorInfo::new("w", vec![25, 2], GgmlType::F16).unwrap();
        assert_eq!(t.n_elements(), 50);
        assert_eq!(t.size, 100);
    }

    #[test]
    fn quantized_size_uses_blocks() {
        // 2 rows of 64 elements = 4 blocks of 32, 34 bytes each
        let t = TensorInfo::new("q", vec![64, 2], GgmlType::Q8_0).unwrap();
        assert_eq!(t.size, 4 * 34);
    }

    #[test]
    fn row_not_multiple_of_block_is_rejected() {
        assert!(TensorInfo::new("q", vec![33], GgmlType::Q4_0).is_err());
    }

    #[test]
    fn too_many_dims_is_rejected() {
        assert!(TensorInfo::new("t", vec![1, 1, 1, 1, 1], GgmlType::F32).is_err());
    }

    #[test]
    fn descriptor_reads_back_with_same_encoded_len() {
        let mut t = TensorInfo::new("blk.0.attn_q.weight", vec![8, 4], GgmlType::F32).unwrap();
        t.offset = 96;
        let mut buf = Vec::new();
        t.write(&mut buf).unwrap();
        assert_eq!(buf.len(), t.encoded_len());
        assert_eq!(TensorInfo::read(&mut Cursor::new(buf)).unwrap(), t);
    }

    #[test]
    fn unknown_ggml_type_names_the_tensor() {
        let mut buf = Vec::new();
        write_string(&mut buf, "odd").unwrap();
        write_u32_le(&mut buf, 1).unwrap();
        write_u64_le(&mut buf, 4).unwrap();
        write_u32_le(&mut buf, 4).unwrap(); // 4 and 5 were removed from ggml
        write_u64_le(&mut buf, 0).unwrap();
        let err = TensorInfo::read(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, GgufError::InvalidTensorType { ref name, ty: 4 } if name == "odd"));
    }
}
