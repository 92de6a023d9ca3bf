//! Block device glue for a wear-levelling filesystem.
//!
//! The filesystem addresses storage as `(block, offset)` pairs and only wants to know
//! whether an operation worked, so every driver error collapses into [`IoError`].

use crate::{SECTOR_COUNT, SECTOR_SIZE};
use embedded_storage::nor_flash::NorFlash;

/// The only failure reported to the filesystem
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoError;

impl IoError {
    /// Error code of a failed I/O operation in the filesystem's C ABI
    pub const fn code(self) -> i32 {
        -5
    }
}

/// Static geometry and buffer configuration handed to the filesystem.
///
/// `block_size` and `block_count` must match the chip's erase geometry, nothing checks
/// this at runtime.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDeviceConfig {
    pub read_size: u32,
    pub prog_size: u32,
    pub cache_size: u32,
    pub lookahead_size: u32,
    pub block_size: u32,
    pub block_count: u32,
    /// Erase cycles before the filesystem moves data off a block, passed through as is
    pub block_cycles: i32,
}

impl BlockDeviceConfig {
    /// Size of the read, program, cache and lookahead buffers
    pub const BUFFER_SIZE: u32 = 128;

    pub const DEFAULT: Self = Self {
        read_size: Self::BUFFER_SIZE,
        prog_size: Self::BUFFER_SIZE,
        cache_size: Self::BUFFER_SIZE,
        lookahead_size: Self::BUFFER_SIZE,
        block_size: SECTOR_SIZE,
        block_count: SECTOR_COUNT,
        block_cycles: 500,
    };

    /// Byte address of `offset` within `block`, `None` if it falls outside the device
    /// or the range `offset..offset + size` leaves the block
    pub fn address(&self, block: u32, offset: u32, size: usize) -> Option<u32> {
        if block >= self.block_count {
            return None;
        }
        let end = u32::try_from(size).ok()?.checked_add(offset)?;
        if end > self.block_size {
            return None;
        }
        block.checked_mul(self.block_size)?.checked_add(offset)
    }
}

impl Default for BlockDeviceConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The four operations a filesystem needs from its storage
pub trait BlockDevice {
    fn config(&self) -> &BlockDeviceConfig;

    /// Read `buffer.len()` bytes at `offset` within `block`
    fn read(&mut self, block: u32, offset: u32, buffer: &mut [u8]) -> Result<(), IoError>;

    /// Program `buffer` at `offset` within `block`. The block must have been erased
    fn prog(&mut self, block: u32, offset: u32, buffer: &[u8]) -> Result<(), IoError>;

    fn erase(&mut self, block: u32) -> Result<(), IoError>;

    /// Flush pending writes
    fn sync(&mut self) -> Result<(), IoError>;
}

/// [`BlockDevice`] on top of any embedded-storage [`NorFlash`], usually the blocking
/// [`S25FL064L`](crate::blocking::S25FL064L) driver
pub struct FlashBlockDevice<F> {
    flash: F,
    config: BlockDeviceConfig,
}

impl<F: NorFlash> FlashBlockDevice<F> {
    /// Wrap an initialized driver with [`BlockDeviceConfig::DEFAULT`]
    pub fn new(flash: F) -> Self {
        Self::with_config(flash, BlockDeviceConfig::DEFAULT)
    }

    pub fn with_config(flash: F, config: BlockDeviceConfig) -> Self {
        Self { flash, config }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F: NorFlash> BlockDevice for FlashBlockDevice<F> {
    fn config(&self) -> &BlockDeviceConfig {
        &self.config
    }

    fn read(&mut self, block: u32, offset: u32, buffer: &mut [u8]) -> Result<(), IoError> {
        let addr = self
            .config
            .address(block, offset, buffer.len())
            .ok_or(IoError)?;
        self.flash.read(addr, buffer).map_err(|_| IoError)
    }

    fn prog(&mut self, block: u32, offset: u32, buffer: &[u8]) -> Result<(), IoError> {
        let addr = self
            .config
            .address(block, offset, buffer.len())
            .ok_or(IoError)?;
        self.flash.write(addr, buffer).map_err(|_| IoError)
    }

    fn erase(&mut self, block: u32) -> Result<(), IoError> {
        let from = self.config.address(block, 0, 0).ok_or(IoError)?;
        let to = from.checked_add(self.config.block_size).ok_or(IoError)?;
        self.flash.erase(from, to).map_err(|_| IoError)
    }

    fn sync(&mut self) -> Result<(), IoError> {
        // Reads and writes complete on the chip before they return, nothing is buffered.
        Ok(())
    }
}
