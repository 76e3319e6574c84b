//! Payload masking (RFC 6455 section 5.3).
//!
//! Masking XORs every payload byte `i` with `mask[i % 4]`, so applying the same key twice
//! restores the original bytes.

/// Masks or unmasks `buf` in place.
///
/// Whole 4-byte groups are XORed as one word against the key; the tail (fewer than four bytes,
/// starting at a multiple of four) takes the key bytewise.
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let key = u32::from_ne_bytes(mask);

    let mut groups = buf.chunks_exact_mut(4);
    for group in &mut groups {
        let word = u32::from_ne_bytes([group[0], group[1], group[2], group[3]]) ^ key;
        group.copy_from_slice(&word.to_ne_bytes());
    }
    for (byte, key) in groups.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}
