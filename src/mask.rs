//! XOR masking of frame payloads with a 4-byte key.
//!
//! Masking is a protocol conformance requirement for client-to-server frames, defending
//! intermediaries against cache poisoning; it is not a security boundary. XOR is its own
//! inverse, so the same routine masks and unmasks.

/// Mask or unmask `buf` in place with `mask`.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    apply_mask_fast32(buf, mask);
}

/// Byte-at-a-time reference implementation.
#[inline]
fn apply_mask_fallback(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Applies the mask in 4-byte words over the aligned middle of the buffer, falling back
/// to byte-wise application for the unaligned prefix and suffix. The mask word is rotated
/// by the prefix length so the key stays in phase across the boundary.
#[inline]
fn apply_mask_fast32(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);

    let (prefix, words, suffix) = unsafe { buf.align_to_mut::<u32>() };
    apply_mask_fallback(prefix, mask);
    let head = prefix.len() & 3;
    let mask_u32 = if head > 0 {
        if cfg!(target_endian = "big") {
            mask_u32.rotate_left(8 * head as u32)
        } else {
            mask_u32.rotate_right(8 * head as u32)
        }
    } else {
        mask_u32
    };
    for word in words.iter_mut() {
        *word ^= mask_u32;
    }
    apply_mask_fallback(suffix, mask_u32.to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_self_inverse() {
        let mask = [0x6d, 0xb6, 0xb2, 0x80];
        let original: Vec<u8> = (0..257).map(|i| (i * 31 % 256) as u8).collect();

        let mut data = original.clone();
        apply_mask(&mut data, mask);
        assert_ne!(data, original);

        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn test_mask_cycles_key() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut data = vec![0xAB, 0xCD, 0xEF, 0x01, 0x23];
        apply_mask(&mut data, mask);
        assert_eq!(
            data,
            vec![0xAB ^ 0x12, 0xCD ^ 0x34, 0xEF ^ 0x56, 0x01 ^ 0x78, 0x23 ^ 0x12]
        );
    }

    #[test]
    fn test_mask_empty() {
        let mut data: Vec<u8> = vec![];
        apply_mask(&mut data, [0xFF; 4]);
        assert!(data.is_empty());
    }

    #[test]
    fn test_fast_matches_fallback_across_alignments() {
        let mask = [0xAA, 0xBB, 0xCC, 0xDD];
        let base: Vec<u8> = (0..64).map(|i| (i * 7) as u8).collect();

        for offset in 0..4 {
            for len in 0..(base.len() - offset) {
                let mut fast = base.clone();
                let mut slow = base.clone();
                apply_mask_fast32(&mut fast[offset..offset + len], mask);
                apply_mask_fallback(&mut slow[offset..offset + len], mask);
                assert_eq!(fast, slow, "offset {offset} len {len}");
            }
        }
    }
}
