use std::ops::RangeInclusive;

/// Bit and byte helpers for I/O register values.
/// Bit indices go from lsb to msb (right to left).
pub trait Bits: Copy {
    const WIDTH: u8;

    fn to_u32(self) -> u32;
    fn from_u32(value: u32) -> Self;

    fn get_bit(self, bit_idx: u8) -> bool {
        debug_assert!(bit_idx < Self::WIDTH);
        self.to_u32() & (1 << bit_idx) != 0
    }

    fn set_bit(&mut self, bit_idx: u8, value: bool) {
        debug_assert!(bit_idx < Self::WIDTH);
        let mask = 1 << bit_idx;
        let bits = if value {
            self.to_u32() | mask
        } else {
            self.to_u32() & !mask
        };
        *self = Self::from_u32(bits);
    }

    fn get_bits(self, bits_range: RangeInclusive<u8>) -> Self {
        let start = *bits_range.start();
        let end = *bits_range.end();
        debug_assert!(start <= end && end < Self::WIDTH);

        // `length` ones, moved to the range start.
        let length = u32::from(end - start + 1);
        let mask = u32::MAX.checked_shr(32 - length).unwrap_or(0);

        Self::from_u32((self.to_u32() >> start) & mask)
    }

    fn get_byte(self, byte_nth: u8) -> u8 {
        debug_assert!(byte_nth < Self::WIDTH / 8);
        (self.to_u32() >> (8 * byte_nth)).to_le_bytes()[0]
    }

    fn set_byte(&mut self, byte_nth: u8, value: u8) {
        debug_assert!(byte_nth < Self::WIDTH / 8);
        let shift = 8 * byte_nth;
        let cleared = self.to_u32() & !(0xFF << shift);
        *self = Self::from_u32(cleared | (u32::from(value) << shift));
    }
}

impl Bits for u16 {
    const WIDTH: u8 = 16;

    fn to_u32(self) -> u32 {
        self.into()
    }

    fn from_u32(value: u32) -> Self {
        (value & 0xFFFF) as Self
    }
}

impl Bits for u32 {
    const WIDTH: u8 = 32;

    fn to_u32(self) -> u32 {
        self
    }

    fn from_u32(value: u32) -> Self {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn get_bit() {
        let b = 0b10_1100_1110_u16;
        assert!(b.get_bit(1));
        assert!(!b.get_bit(0));
        assert!(b.get_bit(2));
        assert!(!b.get_bit(15));
    }

    #[test]
    fn set_bit() {
        let mut b = 0b110_0110_u16;
        b.set_bit(0, true);
        b.set_bit(1, true);
        b.set_bit(2, false);
        b.set_bit(3, false);
        assert_eq!(b, 0b110_0011);
    }

    #[test]
    fn set_bit_roundtrips_random_values() {
        let original = rand::thread_rng().gen_range(1..=u32::MAX - 1);
        let mut fin = original;
        for i in 0..32 {
            let bit = fin.get_bit(i);
            fin.set_bit(i, !bit);
        }

        assert_eq!(!original, fin);
    }

    #[test]
    fn get_bits() {
        let b = 0b10_1100_1110_u32;
        assert_eq!(b.get_bits(0..=3), 0b1110);
        assert_eq!(b.get_bits(1..=1), 0b1);
        assert_eq!(b.get_bits(4..=7), 0b1100);
        assert_eq!(b.get_bits(8..=9), 0b10);
        assert_eq!(b.get_bits(0..=31), 0b10_1100_1110);
        assert_eq!(b.get_bits(28..=31), 0b0);

        let rcnt = 0xC000_u16;
        assert_eq!(rcnt.get_bits(14..=15), 0b11);
    }

    #[test]
    fn get_byte() {
        let b: u32 = 0x0122_0448;

        assert_eq!(b.get_byte(0), 0x48);
        assert_eq!(b.get_byte(1), 0x04);
        assert_eq!(b.get_byte(2), 0x22);
        assert_eq!(b.get_byte(3), 0x01);
    }

    #[test]
    fn set_byte() {
        let mut b: u16 = 0;

        b.set_byte(0, 0xAA);
        assert_eq!(b, 0x00AA);

        b.set_byte(1, 0x55);
        assert_eq!(b, 0x55AA);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn get_byte_out_of_range() {
        let b: u16 = 0x1234;

        b.get_byte(2);
    }
}
