//! Backing storage for dictionary entries

use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use costack_common::AtomicCell;

/// Where the value of an entry lives
///
/// Scalar storage is a slice so that a single ARRAY entry can back a whole run of sub indices;
/// sub index `n` uses element `n - 1`. Every element is accessed with a single atomic load or
/// store, so readers outside the dispatch context never observe a torn value. 64-bit values go
/// through a critical section, as not all targets have native 64-bit atomics.
#[derive(Clone, Copy)]
#[allow(missing_debug_implementations)]
pub enum Storage {
    /// No storage; reads return the entry's constant `value`
    None,
    /// 8-bit values
    U8(&'static [AtomicU8]),
    /// 16-bit values
    U16(&'static [AtomicU16]),
    /// 32-bit values
    U32(&'static [AtomicU32]),
    /// 64-bit values
    U64(&'static [AtomicCell<u64>]),
    /// A byte string, for the string and domain types
    Bytes(&'static [AtomicU8]),
}

impl Storage {
    /// Load element `n`, zero extended
    pub fn load(&self, n: usize) -> Option<u64> {
        match self {
            Storage::None => None,
            Storage::U8(s) => s.get(n).map(|v| v.load(Ordering::Relaxed) as u64),
            Storage::U16(s) => s.get(n).map(|v| v.load(Ordering::Relaxed) as u64),
            Storage::U32(s) => s.get(n).map(|v| v.load(Ordering::Relaxed) as u64),
            Storage::U64(s) => s.get(n).map(|v| v.load()),
            Storage::Bytes(_) => {
                let mut buf = [0u8; 8];
                self.read_bytes(0, &mut buf);
                Some(u64::from_le_bytes(buf))
            }
        }
    }

    /// Store `value` into element `n`, truncated to the element width
    ///
    /// Returns false if the storage has no element `n` or holds a byte string.
    pub fn store(&self, n: usize, value: u64) -> bool {
        match self {
            Storage::U8(s) => s.get(n).map(|v| v.store(value as u8, Ordering::Relaxed)),
            Storage::U16(s) => s.get(n).map(|v| v.store(value as u16, Ordering::Relaxed)),
            Storage::U32(s) => s.get(n).map(|v| v.store(value as u32, Ordering::Relaxed)),
            Storage::U64(s) => s.get(n).map(|v| v.store(value)),
            Storage::None | Storage::Bytes(_) => None,
        }
        .is_some()
    }

    /// Set every element to zero
    pub fn zero(&self) {
        match self {
            Storage::None => (),
            Storage::U8(s) | Storage::Bytes(s) => s.iter().for_each(|v| v.store(0, Ordering::Relaxed)),
            Storage::U16(s) => s.iter().for_each(|v| v.store(0, Ordering::Relaxed)),
            Storage::U32(s) => s.iter().for_each(|v| v.store(0, Ordering::Relaxed)),
            Storage::U64(s) => s.iter().for_each(|v| v.store(0)),
        }
    }

    /// Length of a byte string, or 0 for scalar storage
    pub fn byte_len(&self) -> usize {
        match self {
            Storage::Bytes(s) => s.len(),
            _ => 0,
        }
    }

    /// Copy bytes out of a byte string starting at `offset`
    ///
    /// Returns the number of bytes copied.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> usize {
        let Storage::Bytes(s) = self else {
            return 0;
        };
        let src = s.get(offset..).unwrap_or(&[]);
        let len = src.len().min(buf.len());
        for (dst, b) in buf[..len].iter_mut().zip(src) {
            *dst = b.load(Ordering::Relaxed);
        }
        len
    }

    /// Copy bytes into a byte string starting at `offset`
    ///
    /// Returns false, without writing anything, if the data does not fit.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> bool {
        let Storage::Bytes(s) = self else {
            return false;
        };
        match s.get(offset..offset + data.len()) {
            Some(dst) => {
                for (d, b) in dst.iter().zip(data) {
                    d.store(*b, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_array() {
        static VALUES: [AtomicU16; 3] = [AtomicU16::new(1), AtomicU16::new(2), AtomicU16::new(3)];
        let storage = Storage::U16(&VALUES);
        assert_eq!(Some(2), storage.load(1));
        assert!(storage.store(2, 0x12345));
        assert_eq!(Some(0x2345), storage.load(2));
        assert!(!storage.store(3, 0));
        storage.zero();
        assert_eq!(Some(0), storage.load(0));
    }

    #[test]
    fn test_byte_string() {
        static NAME: [AtomicU8; 10] = [const { AtomicU8::new(0) }; 10];
        let storage = Storage::Bytes(&NAME);
        assert!(storage.write_bytes(0, b"costack"));
        assert_eq!(Some(u64::from_le_bytes(*b"costack\0")), storage.load(0));
        assert!(!storage.write_bytes(8, b"abc"));

        let mut buf = [0u8; 4];
        assert_eq!(3, storage.read_bytes(4, &mut buf[..3]));
        assert_eq!(b"ack", &buf[..3]);
        assert_eq!(2, storage.read_bytes(8, &mut buf));
    }
}
