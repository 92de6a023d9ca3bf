use bit::BitIndex;

/// Manufacturer ID, `0x01` for Cypress
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManufacturerId(pub u8);

/// Memory type in the high byte, density in the low byte
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceId(pub u16);

/// Factory programmed 64-bit unique ID, MSB first
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniqueId(pub [u8; 8]);

/// Result of the read identification command
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identification {
    pub manufacturer: ManufacturerId,
    pub device: DeviceId,
}

impl Identification {
    /// Decode the three bytes following the opcode
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Identification {
            manufacturer: ManufacturerId(bytes[0]),
            device: DeviceId(u16::from_be_bytes([bytes[1], bytes[2]])),
        }
    }
}

/// Status register 1
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    pub status_register_protect: bool,
    pub sector_protect: bool,
    pub top_bottom_protect: bool,
    pub protected_block: u8,
    pub write_enable_latch: bool,
    pub write_in_progress: bool,
}

impl From<u8> for StatusRegister {
    fn from(val: u8) -> StatusRegister {
        StatusRegister {
            status_register_protect: val.bit(7),
            sector_protect: val.bit(6),
            top_bottom_protect: val.bit(5),
            protected_block: val.bit_range(2..5),
            write_enable_latch: val.bit(1),
            write_in_progress: val.bit(0),
        }
    }
}

/// Status register 2
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister2 {
    pub program_error: bool,
    pub erase_error: bool,
    pub erase_suspended: bool,
    pub program_suspended: bool,
}

impl From<u8> for StatusRegister2 {
    fn from(val: u8) -> StatusRegister2 {
        StatusRegister2 {
            program_error: val.bit(6),
            erase_error: val.bit(5),
            erase_suspended: val.bit(1),
            program_suspended: val.bit(0),
        }
    }
}

/// Program and erase failures latched by the chip, see `get_error`
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorFlags {
    pub program_failed: bool,
    pub erase_failed: bool,
}

impl ErrorFlags {
    pub const PROGRAM_ERROR: u8 = 1 << 0;
    pub const ERASE_ERROR: u8 = 1 << 1;

    /// Packed form, see [`Self::PROGRAM_ERROR`] and [`Self::ERASE_ERROR`]
    pub fn bits(self) -> u8 {
        let mut bits = 0u8;
        bits.set_bit(0, self.program_failed);
        bits.set_bit(1, self.erase_failed);
        bits
    }

    pub fn any(self) -> bool {
        self.program_failed || self.erase_failed
    }
}

impl From<StatusRegister2> for ErrorFlags {
    fn from(sr2: StatusRegister2) -> Self {
        ErrorFlags {
            program_failed: sr2.program_error,
            erase_failed: sr2.erase_error,
        }
    }
}

/// Output driver impedance selection
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Impedance {
    #[default]
    Selection0,
    Selection1,
    Selection2,
    Selection3,
}

impl From<u8> for Impedance {
    fn from(val: u8) -> Self {
        match val & 0x03 {
            0 => Impedance::Selection0,
            1 => Impedance::Selection1,
            2 => Impedance::Selection2,
            _ => Impedance::Selection3,
        }
    }
}

/// Bus protocol the chip currently answers in
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolMode {
    #[default]
    Spi,
    Qpi,
}

impl From<bool> for ProtocolMode {
    fn from(val: bool) -> Self {
        if val {
            ProtocolMode::Qpi
        } else {
            ProtocolMode::Spi
        }
    }
}

/// Configuration register 2
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationRegister2 {
    pub impedance: Impedance,
    pub protocol_mode: ProtocolMode,
    /// Set when the chip expects 4-byte addresses
    pub address_length: bool,
}

impl From<u8> for ConfigurationRegister2 {
    fn from(val: u8) -> Self {
        ConfigurationRegister2 {
            impedance: val.bit_range(5..7).into(),
            protocol_mode: val.bit(3).into(),
            address_length: val.bit(0),
        }
    }
}
