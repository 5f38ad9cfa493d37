//! Big-endian integer access on byte buffers.
//!
//! Every accessor reads or writes a fixed-width field at `pos`. Callers
//! validate buffer lengths first; an out-of-range position is a programming
//! error and panics like slice indexing does.

use bytes::{Buf, BufMut};

pub fn get_u32(data: &[u8], pos: usize) -> u32 {
    (&data[pos..pos + 4]).get_u32()
}

pub fn get_u64(data: &[u8], pos: usize) -> u64 {
    (&data[pos..pos + 8]).get_u64()
}

pub fn get_i32(data: &[u8], pos: usize) -> i32 {
    (&data[pos..pos + 4]).get_i32()
}

pub fn set_u32(data: &mut [u8], pos: usize, value: u32) {
    (&mut data[pos..pos + 4]).put_u32(value);
}

pub fn set_u64(data: &mut [u8], pos: usize, value: u64) {
    (&mut data[pos..pos + 8]).put_u64(value);
}

pub fn set_i32(data: &mut [u8], pos: usize, value: i32) {
    (&mut data[pos..pos + 4]).put_i32(value);
}

/// Serialize a u32 as four big-endian bytes.
pub fn u32_bytes(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Serialize a u64 as eight big-endian bytes.
pub fn u64_bytes(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Split a full-box version/flags word into `(version, flags)`.
pub fn version_and_flags(data: &[u8], pos: usize) -> (u8, u32) {
    let word = get_u32(data, pos);
    ((word >> 24) as u8, word & 0x00FF_FFFF)
}
