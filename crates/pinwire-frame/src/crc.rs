/// CRC-16/CCITT-FALSE as used in the frame trailer.
#[derive(Debug, Clone, Copy)]
pub struct FrameCrc(u16);

impl Default for FrameCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl FrameCrc {
    pub const LENGTH: usize = 2;
    const INIT_VALUE: u16 = 0xffff;
    const POLYNOMIAL: u16 = 0x1021;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u16::from(byte) << 8;
        for _bit in 0..8 {
            if (self.0 & 0x8000) != 0 {
                self.0 = (self.0 << 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 <<= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    /// Checksum of a complete byte slice.
    pub fn of(bytes: &[u8]) -> u16 {
        let mut crc = Self::default();
        crc.add_bytes(bytes);
        crc.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        // Standard check input for CRC-16/CCITT-FALSE.
        assert_eq!(FrameCrc::of(b"123456789"), 0x29b1);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut crc = FrameCrc::default();
        crc.add_bytes(b"1234");
        crc.add_bytes(b"56789");
        assert_eq!(crc.get(), FrameCrc::of(b"123456789"));
    }

    #[test]
    fn empty_input_is_init_value() {
        assert_eq!(FrameCrc::of(&[]), 0xffff);
    }
}
