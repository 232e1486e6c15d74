//! Copies tensor payloads between files, padding each one to the alignment.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use gguf_container::{GgufError, TensorInfo, align_up};
use tracing::trace;

use crate::error::{Result, SplitError};

const ZEROS: [u8; 256] = [0; 256];

/// A readable file plus the start of its data section.
#[derive(Debug)]
pub struct TensorSource<R> {
    reader: R,
    path: PathBuf,
    data_offset: u64,
    /// Length of the underlying file, measured once when the source is opened.
    len: u64,
}

impl TensorSource<File> {
    pub fn open(path: &Path, data_offset: u64) -> Result<Self> {
        let reader = File::open(path).map_err(|e| SplitError::io(path, e))?;
        Self::new(reader, path, data_offset)
    }
}

impl<R: Read + Seek> TensorSource<R> {
    pub fn new(mut reader: R, path: &Path, data_offset: u64) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0)).map_err(|e| SplitError::io(path, e))?;
        Ok(Self { reader, path: path.to_path_buf(), data_offset, len })
    }

    /// Absolute byte range of `tensor`, checked against the file length
    /// before anything is allocated or read.
    fn locate(&self, tensor: &TensorInfo) -> Result<(u64, usize)> {
        let short = |offset| SplitError::ShortRead {
            path: self.path.clone(),
            name: tensor.name.clone(),
            offset,
            wanted: tensor.size,
        };
        let Some(offset) = self.data_offset.checked_add(tensor.offset) else {
            return Err(SplitError::SourceFormat {
                path: self.path.clone(),
                source: GgufError::Malformed(format!(
                    "tensor '{}' offset {} lies past the end of the address space",
                    tensor.name, tensor.offset
                )),
            });
        };
        match offset.checked_add(tensor.size) {
            Some(end) if end <= self.len => {
                usize::try_from(tensor.size).map(|n| (offset, n)).map_err(|_| short(offset))
            }
            _ => Err(short(offset)),
        }
    }
}

/// Owns the reusable read buffer for one split or merge run.
#[derive(Debug, Default)]
pub struct TensorStreamer {
    buf: Vec<u8>,
}

impl TensorStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current buffer capacity; grows to the largest tensor seen, never shrinks.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// Copy one tensor from `src` to the current position of `dst`, followed
    /// by zero padding up to `alignment`. Returns the number of bytes written
    /// including padding.
    pub fn copy_tensor<R, W>(
        &mut self,
        src: &mut TensorSource<R>,
        tensor: &TensorInfo,
        dst: &mut W,
        dst_path: &Path,
        alignment: u64,
    ) -> Result<u64>
    where
        R: Read + Seek,
        W: Write,
    {
        let (offset, n_bytes) = src.locate(tensor)?;
        if self.buf.len() < n_bytes {
            self.buf.resize(n_bytes, 0);
        }

        let src_path = src.path.as_path();
        src.reader.seek(SeekFrom::Start(offset)).map_err(|e| SplitError::io(src_path, e))?;
        src.reader.read_exact(&mut self.buf[..n_bytes]).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                SplitError::ShortRead {
                    path: src_path.to_path_buf(),
                    name: tensor.name.clone(),
                    offset,
                    wanted: tensor.size,
                }
            } else {
                SplitError::io(src_path, e)
            }
        })?;

        dst.write_all(&self.buf[..n_bytes]).map_err(|e| SplitError::io(dst_path, e))?;
        let pad = padding(tensor.size, alignment);
        write_zeros(dst, pad).map_err(|e| SplitError::io(dst_path, e))?;

        trace!(tensor = %tensor.name, offset, n_bytes, pad, "copied tensor");
        Ok(tensor.size + pad)
    }
}

/// Zero bytes that follow a payload of `size` bytes.
pub fn padding(size: u64, alignment: u64) -> u64 {
    align_up(size, alignment) - size
}

/// Write `n` zero bytes.
pub fn write_zeros<W: Write + ?Sized>(w: &mut W, mut n: u64) -> io::Result<()> {
    while n > 0 {
        let chunk = n.min(ZEROS.len() as u64) as usize;
        w.write_all(&ZEROS[..chunk])?;
        n -= chunk as u64;
    }
    Ok(())
}
