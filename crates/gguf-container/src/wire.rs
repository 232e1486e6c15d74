//! Little-endian primitives shared by the value, tensor and container codecs.

use std::io::{self, Read, Write};

use crate::error::{GgufError, Result};

// Helper constants for string reading
pub(crate) const MAX_KEY_LEN: u64 = 1024 * 1024; // 1 MiB
pub(crate) const MAX_STR_LEN: u64 = 64 * 1024 * 1024; // 64 MiB

/// Serialized size of a GGUF string: `u64` length prefix plus the bytes.
#[inline]
pub(crate) fn string_len(s: &str) -> usize {
    8 + s.len()
}

#[inline]
fn eof_as_malformed(e: io::Error) -> GgufError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        GgufError::malformed("unexpected end of data")
    } else {
        GgufError::Io(e)
    }
}

#[inline]
pub(crate) fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut b = [0u8; N];
    r.read_exact(&mut b).map_err(eof_as_malformed)?;
    Ok(b)
}

#[inline]
pub(crate) fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    Ok(read_array::<R, 1>(r)?[0])
}

#[inline]
pub(crate) fn read_u32_le<R: Read>(r: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(r)?))
}

#[inline]
pub(crate) fn read_u64_le<R: Read>(r: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(r)?))
}

/// Read a length-prefixed UTF-8 string, rejecting lengths above `max_len`.
pub(crate) fn read_string<R: Read>(r: &mut R, max_len: u64) -> Result<String> {
    let len = read_u64_le(r)?;
    if len > max_len {
        return Err(GgufError::StringTooLarge(len));
    }
    let mut buf = Vec::new();
    // take() keeps a lying length prefix from allocating more than the input holds
    let n = Read::take(&mut *r, len).read_to_end(&mut buf).map_err(eof_as_malformed)?;
    if n as u64 != len {
        return Err(GgufError::malformed("unexpected end of data"));
    }
    String::from_utf8(buf).map_err(|_| GgufError::malformed("string is not valid UTF-8"))
}

#[inline]
pub(crate) fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
pub(crate) fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_u64_le(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}
