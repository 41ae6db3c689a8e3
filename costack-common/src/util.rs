//! Timing and identifier helpers

use crate::messages::{COBID_INVALID, EXTID_MASK, ID_MASK};

/// Returns true once at least `timeout` microseconds have elapsed since `timestamp`
///
/// Timestamps are free-running 32-bit microsecond counters, so the comparison is done on the
/// wrapping difference and stays correct across counter overflow.
pub fn is_expired(timestamp: u32, timeout: u32, now: u32) -> bool {
    now.wrapping_sub(timestamp) >= timeout
}

/// Check that a COB-ID does not collide with a predefined identifier
///
/// Extended identifiers are not restricted. For 11-bit identifiers, the NMT, SYNC/EMCY, TIME,
/// default SDO, NMT error control and LSS ranges are rejected.
pub fn validate_cob_id(cob_id: u32) -> bool {
    let masked = cob_id & EXTID_MASK & !COBID_INVALID;
    if masked & crate::messages::EXT_FLAG != 0 {
        return true;
    }
    let id = masked & ID_MASK;
    !matches!(
        id,
        0 | 0x001..=0x07F
            | 0x101..=0x17F
            | 0x581..=0x5FF
            | 0x601..=0x67F
            | 0x6E0..=0x6FF
            | 0x701..=0x77F
            | 0x780..=0x7FF
    )
}

/// Returns true if `index`/`sub` address one of the dummy entries used to pad PDO mappings
///
/// Only the sized integer deftypes are valid padding targets.
pub fn is_padding(index: u16, sub: u8) -> bool {
    sub == 0 && index <= 0x1B && (1u32 << index) & 0x0F7D_00FE != 0
}

/// Number of bytes required to hold `bits` bits
pub const fn byte_length(bits: usize) -> usize {
    bits.div_ceil(8)
}
