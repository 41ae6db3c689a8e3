//! Little-endian field access for frame payloads and object storage
//!
//! All CANopen multi-byte values are little-endian on the wire. These helpers read and write
//! integers of 1 to 8 bytes at an offset, which covers the odd sizes (24, 40, 48, 56 bits) that
//! `from_le_bytes` does not.

/// Read `len` bytes (1..=8) starting at `offset` as an unsigned little-endian integer
///
/// Bytes beyond the end of `buf` read as zero.
pub fn get_le(buf: &[u8], offset: usize, len: usize) -> u64 {
    let mut value = 0u64;
    for i in (0..len.min(8)).rev() {
        value <<= 8;
        value |= buf.get(offset + i).copied().unwrap_or(0) as u64;
    }
    value
}

/// Write the low `len` bytes (1..=8) of `value` starting at `offset`
///
/// Bytes which would fall beyond the end of `buf` are dropped.
pub fn put_le(buf: &mut [u8], offset: usize, len: usize, value: u64) {
    for i in 0..len.min(8) {
        if let Some(b) = buf.get_mut(offset + i) {
            *b = (value >> (8 * i)) as u8;
        }
    }
}

/// Read a little-endian u16 at `offset`
pub fn get_u16(buf: &[u8], offset: usize) -> u16 {
    get_le(buf, offset, 2) as u16
}

/// Read a little-endian u32 at `offset`
pub fn get_u32(buf: &[u8], offset: usize) -> u32 {
    get_le(buf, offset, 4) as u32
}

/// Copy `bits` bits from the start of `src` into `dst` beginning at bit `offset`
///
/// Used to pack mapped object values into a PDO payload. Bit order is LSB first within each byte.
pub fn put_bits(dst: &mut [u8], offset: usize, bits: usize, src: &[u8]) {
    for i in 0..bits {
        let bit = (src[i / 8] >> (i % 8)) & 1;
        let pos = offset + i;
        let mask = 1 << (pos % 8);
        if bit != 0 {
            dst[pos / 8] |= mask;
        } else {
            dst[pos / 8] &= !mask;
        }
    }
}

/// Copy `bits` bits from `src` beginning at bit `offset` into the start of `dst`
///
/// The inverse of [`put_bits`], used to unpack received PDO payloads.
pub fn get_bits(src: &[u8], offset: usize, bits: usize, dst: &mut [u8]) {
    for i in 0..bits {
        let pos = offset + i;
        let bit = (src[pos / 8] >> (pos % 8)) & 1;
        let mask = 1 << (i % 8);
        if bit != 0 {
            dst[i / 8] |= mask;
        } else {
            dst[i / 8] &= !mask;
        }
    }
}
