//! Sequence number arithmetic modulo 2^32 (RFC 793 section 3.3).

/// Returns true when `lhs` comes strictly before `rhs` in sequence space.
///
/// Equal values are neither before nor after each other.
pub fn lt(lhs: u32, rhs: u32) -> bool {
    let diff = rhs.wrapping_sub(lhs);
    diff != 0 && diff < 0x8000_0000
}

pub fn distance(from: u32, to: u32) -> usize {
    to.wrapping_sub(from) as usize
}

/// Narrows a byte count to a sequence offset. Lengths above 4 GiB wrap, as
/// they would on the wire.
pub fn offset(len: usize) -> u32 {
    len as u32
}
