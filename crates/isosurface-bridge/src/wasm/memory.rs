//! Typed access to guest linear memory.
//!
//! All values are 4 bytes, little-endian, at arbitrary (unaligned) byte
//! offsets. Every access is bounds-checked against the current memory size
//! before touching it; offset arithmetic is done in `u64` so a guest pointer
//! near `u32::MAX` cannot wrap around to a valid address.

use std::ops::Range;

use crate::error::ProtocolError;

/// Size in bytes of one `f32` or `u32` in guest memory.
pub const WORD_SIZE: usize = 4;

/// Validate `count` words starting at `offset` and return the byte range.
fn word_range(memory_size: usize, offset: u32, count: u32) -> Result<Range<usize>, ProtocolError> {
    let start = u64::from(offset);
    let len = u64::from(count) * WORD_SIZE as u64;
    let end = start + len;

    if end > memory_size as u64 {
        return Err(ProtocolError::OutOfBounds {
            offset: start,
            len,
            memory_size: memory_size as u64,
        });
    }

    Ok(start as usize..end as usize)
}

fn read_word(memory: &[u8], offset: u32) -> Result<[u8; WORD_SIZE], ProtocolError> {
    let range = word_range(memory.len(), offset, 1)?;
    let mut bytes = [0u8; WORD_SIZE];
    bytes.copy_from_slice(&memory[range]);
    Ok(bytes)
}

fn write_word(memory: &mut [u8], offset: u32, bytes: [u8; WORD_SIZE]) -> Result<(), ProtocolError> {
    let range = word_range(memory.len(), offset, 1)?;
    memory[range].copy_from_slice(&bytes);
    Ok(())
}

/// Read one little-endian `f32`.
pub fn read_f32(memory: &[u8], offset: u32) -> Result<f32, ProtocolError> {
    read_word(memory, offset).map(f32::from_le_bytes)
}

/// Write one little-endian `f32`.
pub fn write_f32(memory: &mut [u8], offset: u32, value: f32) -> Result<(), ProtocolError> {
    write_word(memory, offset, value.to_le_bytes())
}

/// Read one little-endian `u32`.
pub fn read_u32(memory: &[u8], offset: u32) -> Result<u32, ProtocolError> {
    read_word(memory, offset).map(u32::from_le_bytes)
}

/// Write one little-endian `u32`.
pub fn write_u32(memory: &mut [u8], offset: u32, value: u32) -> Result<(), ProtocolError> {
    write_word(memory, offset, value.to_le_bytes())
}

/// Read a packed `[x, y, z]` point with a single bounds check.
pub fn read_f32x3(memory: &[u8], offset: u32) -> Result<[f32; 3], ProtocolError> {
    let range = word_range(memory.len(), offset, 3)?;
    let b = &memory[range];
    Ok([
        f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        f32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        f32::from_le_bytes([b[8], b[9], b[10], b[11]]),
    ])
}

/// Copy `count` consecutive `f32` values out of guest memory.
///
/// The whole range is validated up front, so a buffer that runs off the end
/// of memory yields an error and no partial data.
pub fn read_f32_slice(memory: &[u8], offset: u32, count: u32) -> Result<Vec<f32>, ProtocolError> {
    let range = word_range(memory.len(), offset, count)?;
    Ok(memory[range]
        .chunks_exact(WORD_SIZE)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Copy `count` consecutive `u32` values out of guest memory.
pub fn read_u32_slice(memory: &[u8], offset: u32, count: u32) -> Result<Vec<u32>, ProtocolError> {
    let range = word_range(memory.len(), offset, count)?;
    Ok(memory[range]
        .chunks_exact(WORD_SIZE)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Write consecutive `f32` values into guest memory.
pub fn write_f32_slice(memory: &mut [u8], offset: u32, values: &[f32]) -> Result<(), ProtocolError> {
    let count = u32::try_from(values.len()).map_err(|_| ProtocolError::OutOfBounds {
        offset: u64::from(offset),
        len: (values.len() * WORD_SIZE) as u64,
        memory_size: memory.len() as u64,
    })?;
    let range = word_range(memory.len(), offset, count)?;
    for (dst, v) in memory[range].chunks_exact_mut(WORD_SIZE).zip(values) {
        dst.copy_from_slice(&v.to_le_bytes());
    }
    Ok(())
}
