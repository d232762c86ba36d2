/// Additive two's-complement checksum over the summed range of a frame.
///
/// Matches the value embedded in the vendor's read commands. Response frames
/// from some firmware revisions carry filler bytes here instead, so frame
/// validation is opt-in (see `Profile::verify_checksum`).
pub fn checksum(data: impl AsRef<[u8]>) -> u16 {
    data.as_ref()
        .iter()
        .fold(0u16, |acc, val| acc.wrapping_add(*val as u16))
        .wrapping_neg()
}

pub fn u16be_to_value(raw: &[u8; 2], mul: f32) -> f32 {
    u16::from_be_bytes(*raw) as f32 * mul
}

pub fn i16be_to_value(raw: &[u8; 2], mul: f32) -> f32 {
    i16::from_be_bytes(*raw) as f32 * mul
}

pub fn u16be_to_count(raw: &[u8; 2]) -> usize {
    u16::from_be_bytes(*raw) as _
}

/// Local wall-clock time as `HH:MM:SS`, the sample row and snapshot stamp
pub fn timestamp_hms() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_read_registers() {
        // the vendor command trailers for registers 0x03 and 0x04
        assert_eq!(checksum([0x03u8, 0x00]), 0xfffd);
        assert_eq!(checksum([0x04u8, 0x00]), 0xfffc);
    }

    #[test]
    fn checksum_wraps() {
        assert_eq!(checksum([0xffu8; 2]), 0x0202);
        assert_eq!(checksum([]), 0);
    }

    #[test]
    fn signed_current() {
        assert_eq!(i16be_to_value(&[0xff, 0x83], 1e-2), -1.25);
        assert_eq!(i16be_to_value(&[0x00, 0x7d], 1e-2), 1.25);
    }
}
