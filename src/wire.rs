//! # Wire Glue
//!
//! Typed IO shared by all internal RPC. Integers travel little-endian.
//! Names and addresses go in fixed-width NUL-padded fields. Bulk tuple
//! data uses chunked framing: each payload is prefixed with a 32-bit
//! length, a negative length terminates the logical stream and carries no
//! bytes, a zero length is a legal empty frame, and anything over
//! [`MAX_BLOCK`] is a protocol error.

use std::io::{Read, Write};

use crate::error::{WireError, WireResult};
use crate::limits::{MAX_ADDR, MAX_BLOCK, MAX_NAME};
use crate::tuple::TupleBuf;
use crate::value::DataType;

/// Coordinator RPC tags
pub const T_ENTER: i32 = 1;
pub const R_ENTER: i32 = 2;
pub const T_FINISH: i32 = 3;
pub const R_FINISH: i32 = 4;
pub const T_SYNC: i32 = 5;
pub const R_SYNC: i32 = 6;
pub const T_SOURCE: i32 = 7;
pub const R_SOURCE: i32 = 8;

/// Volume RPC tags
pub const T_READ: i32 = 1;
pub const R_READ: i32 = 2;
pub const T_WRITE: i32 = 3;
pub const R_WRITE: i32 = 4;

pub fn write_i32<W: Write>(w: &mut W, v: i32) -> WireResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_i32<R: Read>(r: &mut R) -> WireResult<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_i64<W: Write>(w: &mut W, v: i64) -> WireResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_i64<R: Read>(r: &mut R) -> WireResult<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Expect a specific tag next on the stream
pub fn expect_tag<R: Read>(r: &mut R, expected: i32) -> WireResult<()> {
    let got = read_i32(r)?;
    if got == expected {
        Ok(())
    } else {
        Err(WireError::BadTag { expected, got })
    }
}

pub fn write_fixed<W: Write>(w: &mut W, s: &str, width: usize) -> WireResult<()> {
    let bytes = s.as_bytes();
    if bytes.len() >= width {
        return Err(WireError::Protocol(format!(
            "'{s}' does not fit a {width}-byte field"
        )));
    }
    w.write_all(bytes)?;
    w.write_all(&vec![0u8; width - bytes.len()])?;
    Ok(())
}

pub fn read_fixed<R: Read>(r: &mut R, width: usize) -> WireResult<String> {
    let mut buf = vec![0u8; width];
    r.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8(buf[..end].to_vec())
        .map_err(|_| WireError::Protocol("non-utf8 name field".to_string()))
}

pub fn write_name<W: Write>(w: &mut W, s: &str) -> WireResult<()> {
    write_fixed(w, s, MAX_NAME)
}

pub fn read_name<R: Read>(r: &mut R) -> WireResult<String> {
    read_fixed(r, MAX_NAME)
}

pub fn write_addr<W: Write>(w: &mut W, s: &str) -> WireResult<()> {
    write_fixed(w, s, MAX_ADDR)
}

pub fn read_addr<R: Read>(r: &mut R) -> WireResult<String> {
    read_fixed(r, MAX_ADDR)
}

/// One framed chunk
pub fn write_chunk<W: Write>(w: &mut W, data: &[u8]) -> WireResult<()> {
    if data.len() > MAX_BLOCK {
        return Err(WireError::ChunkTooLarge(data.len()));
    }
    write_i32(w, data.len() as i32)?;
    w.write_all(data)?;
    Ok(())
}

/// The negative-length sentinel ending a chunked stream
pub fn write_chunk_end<W: Write>(w: &mut W) -> WireResult<()> {
    write_i32(w, -1)
}

/// Next chunk, or `None` at the sentinel
pub fn read_chunk<R: Read>(r: &mut R) -> WireResult<Option<Vec<u8>>> {
    let len = read_i32(r)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len > MAX_BLOCK {
        return Err(WireError::ChunkTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(Some(buf))
}

/// Stream a tuple buffer as chunked blocks plus the sentinel
pub fn write_body<W: Write>(w: &mut W, body: &TupleBuf) -> WireResult<()> {
    for block in body.to_blocks() {
        write_chunk(w, &block)?;
    }
    write_chunk_end(w)
}

/// Read a chunked tuple stream up to the sentinel
pub fn read_body<R: Read>(r: &mut R, types: &[DataType]) -> WireResult<TupleBuf> {
    let mut body = TupleBuf::new();
    while let Some(block) = read_chunk(r)? {
        body.decode_block(&block, types)?;
    }
    Ok(body)
}

/// One variable's slot in a wire-transferred set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarSpec {
    pub name: String,
    pub version: i64,
    /// `host:port` of the owning volume; empty until resolved
    pub volume: String,
}

/// The `(name, version, volume)` sets exchanged with the coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarSet {
    pub items: Vec<VarSpec>,
}

impl VarSet {
    pub fn new() -> VarSet {
        VarSet::default()
    }

    pub fn put(&mut self, name: impl Into<String>, version: i64) {
        self.items.push(VarSpec {
            name: name.into(),
            version,
            volume: String::new(),
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of the exact `(name, version)` pair
    pub fn scan(&self, name: &str, version: i64) -> Option<usize> {
        self.items
            .iter()
            .position(|v| v.name == name && v.version == version)
    }

    pub fn write<W: Write>(&self, w: &mut W) -> WireResult<()> {
        write_i32(w, self.items.len() as i32)?;
        for v in &self.items {
            write_name(w, &v.name)?;
        }
        for v in &self.items {
            write_i64(w, v.version)?;
        }
        for v in &self.items {
            write_addr(w, &v.volume)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> WireResult<VarSet> {
        let len = read_i32(r)?;
        if len < 0 {
            return Err(WireError::Protocol("negative var set length".to_string()));
        }
        let len = len as usize;

        let mut names = Vec::with_capacity(len);
        for _ in 0..len {
            names.push(read_name(r)?);
        }
        let mut vers = Vec::with_capacity(len);
        for _ in 0..len {
            vers.push(read_i64(r)?);
        }
        let mut vols = Vec::with_capacity(len);
        for _ in 0..len {
            vols.push(read_addr(r)?);
        }

        Ok(VarSet {
            items: names
                .into_iter()
                .zip(vers)
                .zip(vols)
                .map(|((name, version), volume)| VarSpec { name, version, volume })
                .collect(),
        })
    }
}

/// Render a sid the way filenames and logs carry it: 16 uppercase hex
/// characters
pub fn sid_to_str(sid: i64) -> String {
    format!("{:016X}", sid as u64)
}

/// Parse a 16-character hex sid; `None` on any malformed input
pub fn sid_from_str(s: &str) -> Option<i64> {
    if s.len() != 16 {
        return None;
    }
    u64::from_str_radix(s, 16).ok().map(|v| v as i64)
}
