//! Serial Flash Discoverable Parameters.
//!
//! Only the header and the first two parameter headers are read, they are enough to
//! confirm the chip speaks JEDEC SFDP and to locate its parameter tables.

/// "SFDP" as it appears on the wire
pub const SFDP_SIGNATURE: [u8; 4] = *b"SFDP";

/// Size of the [`DescriptorTable`] wire image
pub const DESCRIPTOR_TABLE_SIZE: usize = SFDP_HEADER_SIZE + 2 * PARAMETER_HEADER_SIZE;

const SFDP_HEADER_SIZE: usize = 8;
const PARAMETER_HEADER_SIZE: usize = 8;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SfdpHeader {
    pub signature: [u8; 4],
    pub minor: u8,
    pub major: u8,
    /// Number of parameter headers, zero based
    pub parameter_headers: u8,
}

impl SfdpHeader {
    fn from_bytes(bytes: &[u8]) -> Self {
        SfdpHeader {
            signature: [bytes[0], bytes[1], bytes[2], bytes[3]],
            minor: bytes[4],
            major: bytes[5],
            parameter_headers: bytes[6],
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterHeader {
    /// ID, MSB << 8 | LSB. `0xFF00` is the JEDEC basic flash parameter table
    pub id: u16,
    pub minor: u8,
    pub major: u8,
    /// Length of the table in 32-bit words
    pub length: u8,
    /// Byte address of the table in the SFDP space
    pub table_pointer: u32,
}

impl ParameterHeader {
    fn from_bytes(bytes: &[u8]) -> Self {
        ParameterHeader {
            id: u16::from_be_bytes([bytes[7], bytes[0]]),
            minor: bytes[1],
            major: bytes[2],
            length: bytes[3],
            table_pointer: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], 0]),
        }
    }
}

/// SFDP header followed by the first two parameter headers
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorTable {
    pub header: SfdpHeader,
    pub parameters: [ParameterHeader; 2],
}

impl DescriptorTable {
    pub fn from_bytes(bytes: &[u8; DESCRIPTOR_TABLE_SIZE]) -> Self {
        let (header, rest) = bytes.split_at(SFDP_HEADER_SIZE);
        let (first, second) = rest.split_at(PARAMETER_HEADER_SIZE);
        DescriptorTable {
            header: SfdpHeader::from_bytes(header),
            parameters: [
                ParameterHeader::from_bytes(first),
                ParameterHeader::from_bytes(second),
            ],
        }
    }

    /// Whether the signature reads "SFDP"
    pub fn is_valid(&self) -> bool {
        self.header.signature == SFDP_SIGNATURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: [u8; DESCRIPTOR_TABLE_SIZE] = [
        b'S', b'F', b'D', b'P', 0x06, 0x01, 0x01, 0xFF, // header
        0x00, 0x06, 0x01, 0x10, 0x00, 0x01, 0x00, 0xFF, // basic flash parameters
        0x84, 0x00, 0x01, 0x02, 0x40, 0x01, 0x00, 0xFF, // 4-byte address instructions
    ];

    #[test]
    fn decode_descriptor_table() {
        let table = DescriptorTable::from_bytes(&IMAGE);
        assert!(table.is_valid());
        assert_eq!(table.header.major, 1);
        assert_eq!(table.header.minor, 6);
        assert_eq!(table.header.parameter_headers, 1);

        assert_eq!(table.parameters[0].id, 0xFF00);
        assert_eq!(table.parameters[0].length, 0x10);
        assert_eq!(table.parameters[0].table_pointer, 0x100);

        assert_eq!(table.parameters[1].id, 0xFF84);
        assert_eq!(table.parameters[1].table_pointer, 0x140);
    }

    #[test]
    fn bad_signature() {
        let mut image = IMAGE;
        image[0] = 0xFF;
        assert!(!DescriptorTable::from_bytes(&image).is_valid());
        assert!(!DescriptorTable::default().is_valid());
    }
}
