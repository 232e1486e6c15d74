use std::io;
use thiserror::Error;

/// Errors returned when reading, editing or serializing a GGUF container.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GgufError {
    #[error("bad magic: {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("short header: read {0} bytes, need 24")]
    ShortHeader(usize),
    #[error("malformed container: {0}")]
    Malformed(String),
    #[error("invalid KV type: {0}")]
    InvalidKvType(u32),
    #[error("invalid tensor type {ty} for tensor '{name}'")]
    InvalidTensorType { name: String, ty: u32 },
    #[error("string too large: {0} bytes")]
    StringTooLarge(u64),
    #[error("duplicate tensor name: {0}")]
    DuplicateTensor(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GgufError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// `true` when the error came from the underlying reader or writer rather
    /// than from the container contents.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, GgufError>;
