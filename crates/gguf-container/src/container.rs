//! In-memory GGUF container: ordered metadata plus the tensor index.
//!
//! A container is either parsed from an existing file ([`GgufContainer::open`])
//! or built up from scratch ([`GgufContainer::new`]) by copying metadata and
//! appending tensor descriptors. Tensor payloads are never held in memory; the
//! container only describes where they live relative to the data section.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{GgufError, Result};
use crate::tensor::TensorInfo;
use crate::value::{GgufKv, GgufValue};
use crate::wire::{write_u32_le, write_u64_le};
use crate::{
    GGUF_DEFAULT_ALIGNMENT, GGUF_HEADER_LEN, GGUF_MAGIC, GGUF_VERSION_MAX, KEY_GENERAL_ALIGNMENT,
    align_up, checked_align_up, parse_header,
};

/// Upper bound on KV and tensor counts accepted from a file header.
const MAX_ENTRIES: u64 = 1 << 24;

#[derive(Debug, Clone, PartialEq)]
pub struct GgufContainer {
    version: u32,
    alignment: u64,
    kv: Vec<GgufKv>,
    tensors: Vec<TensorInfo>,
    names: HashSet<String>,
    /// Start of the data section for parsed files; `None` for built containers.
    data_offset: Option<u64>,
}

impl Default for GgufContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl GgufContainer {
    /// Empty v3 container with the default alignment.
    pub fn new() -> Self {
        Self {
            version: GGUF_VERSION_MAX,
            alignment: GGUF_DEFAULT_ALIGNMENT,
            kv: Vec::new(),
            tensors: Vec::new(),
            names: HashSet::new(),
            data_offset: None,
        }
    }

    /// Parse the metadata and tensor index of the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path)?;
        let container = Self::read_from(BufReader::new(f))?;
        debug!(
            path = %path.display(),
            n_kv = container.kv.len(),
            n_tensors = container.tensors.len(),
            data_offset = container.data_offset(),
            "parsed GGUF container"
        );
        Ok(container)
    }

    /// Parse a container from any seekable reader positioned at the magic.
    pub fn read_from<R: Read + Seek>(mut r: R) -> Result<Self> {
        let start = r.stream_position()?;

        let mut fixed = Vec::with_capacity(GGUF_HEADER_LEN);
        Read::take(&mut r, GGUF_HEADER_LEN as u64).read_to_end(&mut fixed)?;
        let header = parse_header(&fixed)?;
        let (version, n_tensors, n_kv) = (header.version, header.tensor_count, header.metadata_count);
        if n_tensors > MAX_ENTRIES || n_kv > MAX_ENTRIES {
            return Err(GgufError::malformed(format!(
                "implausible counts: {n_tensors} tensors, {n_kv} KV pairs"
            )));
        }

        let mut container = Self { version, ..Self::new() };
        for _ in 0..n_kv {
            let kv = GgufKv::read(&mut r)?;
            if container.find_key(&kv.key).is_some() {
                return Err(GgufError::malformed(format!("duplicate key '{}'", kv.key)));
            }
            container.set(kv.key, kv.value);
        }

        // furthest aligned payload end, relative to the data section
        let mut data_end = 0u64;
        let mut total = 0u64;
        for _ in 0..n_tensors {
            let info = TensorInfo::read(&mut r)?;
            if !container.names.insert(info.name.clone()) {
                return Err(GgufError::DuplicateTensor(info.name));
            }
            if info.offset % container.alignment != 0 {
                return Err(GgufError::malformed(format!(
                    "tensor '{}' offset {} is not aligned to {}",
                    info.name, info.offset, container.alignment
                )));
            }
            let extent = info
                .offset
                .checked_add(info.size)
                .and_then(|end| checked_align_up(end, container.alignment))
                .zip(total.checked_add(info.size));
            let Some((end, sum)) = extent else {
                return Err(out_of_range(&info));
            };
            data_end = data_end.max(end);
            total = sum;
            container.tensors.push(info);
        }

        let index_end = r.stream_position()? - start;
        let data_offset = align_up(index_end, container.alignment);
        if data_offset.checked_add(data_end).is_none() {
            return Err(GgufError::malformed(format!(
                "data section of {data_end} bytes does not fit after a {data_offset}-byte header"
            )));
        }
        container.data_offset = Some(data_offset);
        Ok(container)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Alignment of the data section and of every tensor offset.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn kv(&self) -> &[GgufKv] {
        &self.kv
    }

    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Sum of unpadded tensor payload sizes. Parsing and [`Self::add_tensor`]
    /// keep every payload end inside `u64`, so the sum cannot overflow.
    pub fn total_tensor_bytes(&self) -> u64 {
        self.tensors.iter().map(|t| t.size).sum()
    }

    /// Index of `key` in metadata order.
    pub fn find_key(&self, key: &str) -> Option<usize> {
        self.kv.iter().position(|kv| kv.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.find_key(key).map(|i| &self.kv[i].value)
    }

    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.get(key).and_then(GgufValue::as_u16)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(GgufValue::as_u32)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(GgufValue::as_i32)
    }

    /// Set `key`, replacing an existing value in place or appending a new entry.
    ///
    /// A power-of-two `general.alignment` also becomes the container alignment.
    pub fn set(&mut self, key: impl Into<String>, value: GgufValue) {
        let key = key.into();
        if key == KEY_GENERAL_ALIGNMENT
            && let Some(a) = value.as_u32()
            && a.is_power_of_two()
        {
            self.alignment = u64::from(a);
        }
        match self.find_key(&key) {
            Some(i) => self.kv[i].value = value,
            None => self.kv.push(GgufKv { key, value }),
        }
    }

    pub fn set_u16(&mut self, key: impl Into<String>, v: u16) {
        self.set(key, GgufValue::Uint16(v));
    }

    pub fn set_i32(&mut self, key: impl Into<String>, v: i32) {
        self.set(key, GgufValue::Int32(v));
    }

    /// Set every key of `src` on `self`, in `src` order.
    pub fn copy_kv_from(&mut self, src: &GgufContainer) {
        for kv in &src.kv {
            self.set(kv.key.clone(), kv.value.clone());
        }
    }

    /// Append a tensor descriptor; its offset becomes the aligned end of the
    /// previous tensor (0 for the first).
    pub fn add_tensor(&mut self, info: &TensorInfo) -> Result<()> {
        if self.names.contains(&info.name) {
            return Err(GgufError::DuplicateTensor(info.name.clone()));
        }
        let offset = match self.tensors.last() {
            Some(prev) => prev
                .offset
                .checked_add(prev.size)
                .and_then(|end| checked_align_up(end, self.alignment)),
            None => Some(0),
        };
        let placed = offset
            .filter(|o| o.checked_add(info.size).is_some())
            .map(|offset| TensorInfo { offset, ..info.clone() })
            .ok_or_else(|| out_of_range(info))?;
        self.names.insert(info.name.clone());
        self.tensors.push(placed);
        Ok(())
    }

    /// Serialized size of header, metadata and tensor index, padded to the
    /// alignment. This is also where the data section starts.
    pub fn meta_size(&self) -> u64 {
        let kv: usize = self.kv.iter().map(GgufKv::encoded_len).sum();
        let ti: usize = self.tensors.iter().map(TensorInfo::encoded_len).sum();
        align_up((GGUF_HEADER_LEN + kv + ti) as u64, self.alignment)
    }

    /// Offset of the data section: as read for parsed files, else [`Self::meta_size`].
    pub fn data_offset(&self) -> u64 {
        self.data_offset.unwrap_or_else(|| self.meta_size())
    }

    /// Write header, metadata, tensor index and trailing padding.
    pub fn write_meta<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut w = CountingWriter { inner: w, count: 0 };

        w.write_all(&GGUF_MAGIC)?;
        write_u32_le(&mut w, self.version)?;
        write_u64_le(&mut w, self.tensors.len() as u64)?;
        write_u64_le(&mut w, self.kv.len() as u64)?;
        for kv in &self.kv {
            kv.write(&mut w)?;
        }
        for t in &self.tensors {
            t.write(&mut w)?;
        }
        let pad = align_up(w.count, self.alignment) - w.count;
        io::copy(&mut io::repeat(0).take(pad), &mut w)?;
        Ok(())
    }

    pub fn meta_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.meta_size() as usize);
        // Writing into a Vec cannot fail.
        let _ = self.write_meta(&mut buf);
        buf
    }
}

fn out_of_range(t: &TensorInfo) -> GgufError {
    GgufError::malformed(format!(
        "tensor '{}' at offset {} with {} bytes overflows the data section",
        t.name, t.offset, t.size
    ))
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
