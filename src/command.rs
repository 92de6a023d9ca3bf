use crate::address::{Address, AddressMode};

/// Opcodes understood by the S25FL064L in SPI mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Command {
    Read = 0x03,
    Read4 = 0x13,
    ProgramPage = 0x02,
    ProgramPage4 = 0x12,
    SectorErase = 0x20,
    SectorErase4 = 0x21,
    ChipErase = 0x60,

    WriteEnable = 0x06,
    WriteDisable = 0x04,

    ReadStatus1 = 0x05,
    ReadStatus2 = 0x07,
    ReadConfig2 = 0x15,
    ClearStatus = 0x30,

    ReadIdentification = 0x9F,
    ReadUniqueId = 0x4B,
    ReadSfdp = 0x5A,

    DeepPowerDown = 0xB9,
    ReleasePowerDown = 0xAB,

    ResetEnable = 0x66,
    ResetMemory = 0x99,

    Dummy = 0x00,
}

impl Command {
    pub(crate) fn read(mode: AddressMode) -> Self {
        match mode {
            AddressMode::Short => Command::Read,
            AddressMode::Extended => Command::Read4,
        }
    }

    pub(crate) fn page_program(mode: AddressMode) -> Self {
        match mode {
            AddressMode::Short => Command::ProgramPage,
            AddressMode::Extended => Command::ProgramPage4,
        }
    }

    pub(crate) fn sector_erase(mode: AddressMode) -> Self {
        match mode {
            AddressMode::Short => Command::SectorErase,
            AddressMode::Extended => Command::SectorErase4,
        }
    }
}

/// Longest frame sent: opcode, 4 address bytes and one dummy
const FRAME_CAPACITY: usize = 6;

/// Header of one bus transaction, the payload is streamed separately
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    bytes: [u8; FRAME_CAPACITY],
    len: usize,
}

impl Frame {
    pub(crate) fn new(cmd: Command) -> Self {
        let mut bytes = [0; FRAME_CAPACITY];
        bytes[0] = cmd as u8;
        Self { bytes, len: 1 }
    }

    pub(crate) fn addressed(cmd: Command, mode: AddressMode, addr: Address) -> Self {
        let mut frame = Self::new(cmd);
        frame.len += mode.encode(addr, &mut frame.bytes[1..]);
        frame
    }

    pub(crate) fn with_dummy(mut self, count: usize) -> Self {
        let end = (self.len + count).min(FRAME_CAPACITY);
        self.bytes[self.len..end].fill(Command::Dummy as u8);
        self.len = end;
        self
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}
