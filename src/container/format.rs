//! Binary format definitions for particle container files.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

/// Magic bytes identifying a particle container file.
pub const CONTAINER_MAGIC: &[u8; 4] = b"PFCN";

/// Current format version.
pub const CONTAINER_VERSION: u16 = 1;

/// Upper bound on stored names, to reject corrupt length prefixes early.
pub const MAX_NAME_LEN: usize = 64 * 1024;

/// Compression applied to dataset payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression (raw little-endian values).
    #[default]
    None = 0,
    /// LZ4 fast compression.
    Lz4 = 1,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            _ => None,
        }
    }

    /// LZ4 when the `lz4` feature is compiled in, otherwise none.
    pub fn default_for_build() -> Self {
        CompressionType::Lz4.available()
    }

    /// The compression actually applied in this build: `Lz4` degrades to
    /// `None` when the `lz4` feature is off.
    pub fn available(self) -> Self {
        match self {
            CompressionType::Lz4 if !cfg!(feature = "lz4") => CompressionType::None,
            other => other,
        }
    }

    pub fn compress(self, raw: &[u8]) -> Vec<u8> {
        match self.available() {
            CompressionType::None => raw.to_vec(),
            CompressionType::Lz4 => compress_lz4(raw),
        }
    }

    /// Decompress `stored` into exactly `raw_len` bytes.
    pub fn decompress(self, stored: &[u8], raw_len: usize) -> io::Result<Vec<u8>> {
        let raw = match self {
            CompressionType::None => stored.to_vec(),
            CompressionType::Lz4 => decompress_lz4(stored, raw_len)?,
        };
        if raw.len() != raw_len {
            return Err(invalid_data(format!(
                "payload decompressed to {} bytes, expected {raw_len}",
                raw.len()
            )));
        }
        Ok(raw)
    }

    /// Whether `stored_len` payload bytes can expand to `raw_len` bytes.
    pub fn can_expand(self, stored_len: u64, raw_len: u64) -> bool {
        match self {
            CompressionType::None => stored_len == raw_len,
            // LZ4 sequences expand at most 255x.
            CompressionType::Lz4 => raw_len <= stored_len.saturating_mul(255).saturating_add(16),
        }
    }
}

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    /// One byte per value, 0 or 1.
    Bool = 0,
    /// Little-endian `i32`.
    Int32 = 1,
    /// Little-endian `f32`.
    Float32 = 2,
}

impl ElementType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ElementType::Bool),
            1 => Some(ElementType::Int32),
            2 => Some(ElementType::Float32),
            _ => None,
        }
    }

    /// Bytes per value.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            ElementType::Bool => 1,
            ElementType::Int32 | ElementType::Float32 => 4,
        }
    }

    /// XDMF `NumberType` attribute for this element type.
    pub fn xdmf_number_type(self) -> &'static str {
        match self {
            ElementType::Bool => "Char",
            ElementType::Int32 => "Integer",
            ElementType::Float32 => "Float",
        }
    }
}

pub(crate) fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

// ── Primitive writers ───────────────────────────────────────────

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn write_u16_le<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Write a length-prefixed UTF-8 string (u32 length + bytes).
pub fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    if s.len() > MAX_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("name of {} bytes exceeds {MAX_NAME_LEN}", s.len()),
        ));
    }
    write_u32_le(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

// ── Primitive readers ───────────────────────────────────────────

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u16_le<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a length-prefixed UTF-8 string.
pub fn read_str<R: Read>(r: &mut R) -> io::Result<String> {
    let len = read_u32_le(r)? as usize;
    if len > MAX_NAME_LEN {
        return Err(invalid_data(format!("name length {len} exceeds {MAX_NAME_LEN}")));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| invalid_data(format!("invalid UTF-8 name: {e}")))
}

/// Read exactly `len` bytes, refusing lengths beyond `limit`.
pub fn read_bytes<R: Read>(r: &mut R, len: u64, limit: u64) -> io::Result<Vec<u8>> {
    if len > limit {
        return Err(invalid_data(format!(
            "payload of {len} bytes exceeds the {limit}-byte file"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

// ── Value encoding ──────────────────────────────────────────────

/// Encode f32 slice to little-endian bytes.
pub fn encode_f32(data: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * 4);
    for &v in data {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Encode i32 slice to little-endian bytes.
pub fn encode_i32(data: &[i32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * 4);
    for &v in data {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Encode bools as one byte each.
pub fn encode_bool(data: &[bool]) -> Vec<u8> {
    data.iter().map(|&b| u8::from(b)).collect()
}

/// Decode little-endian bytes into an f32 slice.
pub fn decode_f32(bytes: &[u8], output: &mut [f32]) -> io::Result<()> {
    check_decode_len(bytes.len(), output.len(), 4)?;
    for (v, b) in output.iter_mut().zip(bytes.chunks_exact(4)) {
        *v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    }
    Ok(())
}

/// Decode little-endian bytes into an i32 slice.
pub fn decode_i32(bytes: &[u8], output: &mut [i32]) -> io::Result<()> {
    check_decode_len(bytes.len(), output.len(), 4)?;
    for (v, b) in output.iter_mut().zip(bytes.chunks_exact(4)) {
        *v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    }
    Ok(())
}

/// Decode one byte per value into a bool slice. Any non-zero byte is true.
pub fn decode_bool(bytes: &[u8], output: &mut [bool]) -> io::Result<()> {
    check_decode_len(bytes.len(), output.len(), 1)?;
    for (v, &b) in output.iter_mut().zip(bytes) {
        *v = b != 0;
    }
    Ok(())
}

fn check_decode_len(bytes: usize, values: usize, size: usize) -> io::Result<()> {
    if bytes != values * size {
        return Err(invalid_data(format!(
            "Dataset size mismatch: {bytes} bytes vs {values} values of {size} bytes"
        )));
    }
    Ok(())
}

/// Compress data using LZ4 block format.
#[cfg(feature = "lz4")]
pub fn compress_lz4(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress(data)
}

/// Decompress an LZ4 block into a buffer of `raw_len` bytes.
#[cfg(feature = "lz4")]
pub fn decompress_lz4(data: &[u8], raw_len: usize) -> io::Result<Vec<u8>> {
    let mut raw = vec![0u8; raw_len];
    let written = lz4_flex::decompress_into(data, &mut raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    raw.truncate(written);
    Ok(raw)
}

/// Fallback when LZ4 is not available.
#[cfg(not(feature = "lz4"))]
pub fn compress_lz4(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

/// LZ4 payloads cannot be read without the `lz4` feature.
#[cfg(not(feature = "lz4"))]
pub fn decompress_lz4(_data: &[u8], _raw_len: usize) -> io::Result<Vec<u8>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "LZ4 payload in a build without the lz4 feature",
    ))
}
