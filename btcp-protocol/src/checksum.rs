//! Internet-style checksum used by bTCP segments
//!
//! The sum is taken over 16-bit words assembled low byte first, and the final
//! ones' complement is byte-swapped before it is returned. Peers compare the
//! value bit for bit, so the quirk is part of the wire format and must not be
//! "fixed" into a plain big-endian RFC 1071 checksum.

/// Compute the bTCP checksum over `data`
///
/// The caller must zero the checksum field inside `data` before calling this
/// when building a segment.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        let value = u32::from(word[0]) + u32::from(word[1]) * 256;
        sum = sum.wrapping_add(value);
    }
    // Odd trailing byte is added as-is, not paired with a zero
    if let [last] = words.remainder() {
        sum = sum.wrapping_add(u32::from(*last));
    }

    sum = (sum >> 16) + (sum & 0xFFFF);
    sum += sum >> 16;

    let folded = !sum as u16;
    folded.swap_bytes()
}

/// Check a received segment
///
/// A segment whose checksum field was filled in by [`checksum`] sums to zero
/// when the stored field is included in the computation.
#[inline]
pub fn validate(segment: &[u8]) -> bool {
    checksum(segment) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store the checksum the way the encoder does (network byte order) at an
    /// even `offset`
    fn embed(data: &mut [u8], offset: usize) {
        let sum = checksum(data);
        data[offset..offset + 2].copy_from_slice(&sum.to_be_bytes());
    }

    #[test]
    fn test_empty_input() {
        // ~0 = 0xFFFF, swapping leaves it unchanged
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_little_endian_word_assembly() {
        // One word 0x0201 (low byte first); ~0x0201 = 0xFDFE, swapped = 0xFEFD
        assert_eq!(checksum(&[0x01, 0x02]), 0xFEFD);
    }

    #[test]
    fn test_odd_trailing_byte_is_unpaired() {
        // 0x0201 + 0x03 = 0x0204; ~ = 0xFDFB; swapped = 0xFBFD
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 0xFBFD);
    }

    #[test]
    fn test_carry_is_folded() {
        // 0xFFFF + 0x0001 = 0x1_0000 -> folds to 0x0001
        assert_eq!(checksum(&[0xFF, 0xFF, 0x01, 0x00]), (!1u16).swap_bytes());
    }

    #[test]
    fn test_embedded_checksum_validates() {
        let mut data = vec![0x12, 0x34, 0x56, 0x78, 0, 0, 0x9A, 0xBC, 0xDE, 0xF0, 0x11];
        embed(&mut data, 4);
        assert!(validate(&data));
    }

    #[test]
    fn test_all_zero_segment_validates() {
        let mut data = vec![0u8; 10];
        embed(&mut data, 8);
        assert_eq!(&data[8..], &[0xFF, 0xFF]);
        assert!(validate(&data));
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let mut data: Vec<u8> = (0..64u8).collect();
        data[8] = 0;
        data[9] = 0;
        embed(&mut data, 8);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!validate(&corrupted), "flip at {byte}:{bit} went unnoticed");
            }
        }
    }
}
