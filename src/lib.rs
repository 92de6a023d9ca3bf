#![cfg_attr(not(test), no_std)]
//! This is a platform agnostic library for the Cypress (Infineon) S25FL064L serial NOR flash using [embedded-hal](https://github.com/rust-embedded/embedded-hal).
//! The S25FL064L is a 64 Mbit part organised as 2048 sectors of 4kB, programmed in 256 byte pages.
//!
//! The driver talks to the chip through a [`transport::Transport`], which owns the
//! chip-select line, the reset line and the bus exchange. [`transport::SpiTransport`]
//! implements it on top of any embedded-hal `SpiBus` and `OutputPin`s.
//!
//! On top of the driver, [`block::FlashBlockDevice`] exposes the four block
//! operations (read, program, erase, sync) a wear-levelling filesystem expects.

pub mod address;
pub mod asynchronous;
pub mod block;
pub mod blocking;
mod command;
pub mod error;
pub mod register;
pub mod sfdp;
pub mod transport;

use crate::error::Error;

/// Size of the program buffer, one page program never crosses it
pub const PAGE_SIZE: u32 = 0x100;

/// Size of the smallest erasable unit
pub const SECTOR_SIZE: u32 = 0x1000;

/// Number of sectors on the chip
pub const SECTOR_COUNT: u32 = 2048;

/// Total size of the main array in bytes
pub const CAPACITY: u32 = SECTOR_SIZE * SECTOR_COUNT;

/// Manufacturer ID reported by Cypress parts
pub const MANUFACTURER_ID: u8 = 0x01;

/// Memory type and density reported by the S25FL064L
pub const DEVICE_ID: u16 = 0x6017;

/// Value of every byte after an erase
pub const ERASED_BYTE: u8 = 0xFF;

pub(crate) fn check_erase<E>(capacity: u32, from: u32, to: u32) -> Result<(), Error<E>> {
    if from > to || to > capacity {
        return Err(Error::OutOfBounds);
    }
    if from % SECTOR_SIZE != 0 || to % SECTOR_SIZE != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub(crate) fn check_range<E>(capacity: u32, offset: u32, length: usize) -> Result<(), Error<E>> {
    if length == 0 {
        return Err(Error::InvalidParameter);
    }
    let length = u32::try_from(length).map_err(|_| Error::OutOfBounds)?;
    if length > capacity || offset > capacity - length {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}

/// Combine the result of a framed transaction with the result of releasing chip-select.
/// The first failure wins.
pub(crate) fn finish_transaction<R, E>(
    body: Result<R, E>,
    deselect: Result<(), E>,
) -> Result<R, Error<E>> {
    let value = body.map_err(Error::Protocol)?;
    deselect.map_err(Error::Protocol)?;
    Ok(value)
}
