use crate::PAGE_SIZE;

/// An address on the memory chip
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Address(pub u32);

impl Address {
    /// Bytes left before the end of the page containing this address
    pub fn page_remaining(self) -> u32 {
        PAGE_SIZE - self.0 % PAGE_SIZE
    }
}

/// Width of the address phase of a command frame
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    /// 3-byte addresses
    #[default]
    Short,
    /// 4-byte addresses
    Extended,
}

impl From<bool> for AddressMode {
    fn from(extended: bool) -> Self {
        if extended {
            AddressMode::Extended
        } else {
            AddressMode::Short
        }
    }
}

impl AddressMode {
    /// Number of address bytes sent after the opcode
    pub const fn len(self) -> usize {
        match self {
            AddressMode::Short => 3,
            AddressMode::Extended => 4,
        }
    }

    /// Write `addr` big-endian into the start of `buf`, returns the number of bytes written.
    /// `buf` must hold at least [`Self::len`] bytes.
    pub fn encode(self, addr: Address, buf: &mut [u8]) -> usize {
        let bytes = addr.0.to_be_bytes();
        let len = self.len();
        buf[..len].copy_from_slice(&bytes[4 - len..]);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_remaining() {
        assert_eq!(Address(0).page_remaining(), 0x100);
        assert_eq!(Address(0x2304).page_remaining(), 0x100 - 4);
        assert_eq!(Address(0x01FF).page_remaining(), 1);
    }

    #[test]
    fn big_endian_encoding() {
        let mut buf = [0u8; 4];
        assert_eq!(AddressMode::Short.encode(Address(0x0012_3456), &mut buf), 3);
        assert_eq!(&buf[..3], &[0x12, 0x34, 0x56]);

        assert_eq!(AddressMode::Extended.encode(Address(0x0012_3456), &mut buf), 4);
        assert_eq!(buf, [0x00, 0x12, 0x34, 0x56]);
    }
}
