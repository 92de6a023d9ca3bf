//! Async flavour of the driver, for embassy style executors.
//!
//! The command sequences are the same as in [`crate::blocking`]. Busy polls yield to the
//! executor between iterations, but an operation still completes on the chip before
//! its future resolves.

use crate::{
    address::{Address, AddressMode},
    check_erase, check_range,
    command::{Command, Frame},
    error::Error,
    finish_transaction,
    register::*,
    sfdp::{DescriptorTable, DESCRIPTOR_TABLE_SIZE},
    transport::{BusyHook, NoHook, SpiTransportError, RESET_PULSE_MS, RESET_SETTLE_MS},
    CAPACITY, DEVICE_ID, SECTOR_COUNT, SECTOR_SIZE,
};
use embassy_futures::yield_now;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::{delay::DelayNs, spi::SpiBus};
use embedded_storage_async::nor_flash::{MultiwriteNorFlash, NorFlash, ReadNorFlash};

/// Async bus collaborator, see [`crate::transport::Transport`] for the contract
#[allow(async_fn_in_trait)]
pub trait AsyncTransport {
    type Error;

    /// Largest number of bytes a single [`Self::exchange`] may clock. Must not be zero.
    const MAX_TRANSFER: usize;

    async fn reset(&mut self) -> Result<(), Self::Error>;

    fn chip_select(&mut self, selected: bool) -> Result<(), Self::Error>;

    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;
}

/// [`AsyncTransport`] over an embedded-hal-async [`SpiBus`]
pub struct AsyncSpiTransport<SPI, CS, RST, D, const MAX: usize = 255> {
    spi: SPI,
    cs: CS,
    reset: RST,
    delay: D,
}

impl<SPI, CS, RST, D> AsyncSpiTransport<SPI, CS, RST, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    RST: OutputPin<Error = CS::Error>,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, reset: RST, delay: D) -> Self {
        Self::with_ceiling(spi, cs, reset, delay)
    }
}

impl<SPI, CS, RST, D, const MAX: usize> AsyncSpiTransport<SPI, CS, RST, D, MAX>
where
    SPI: SpiBus,
    CS: OutputPin,
    RST: OutputPin<Error = CS::Error>,
    D: DelayNs,
{
    /// Transport splitting every exchange at `MAX` bytes
    pub fn with_ceiling(spi: SPI, cs: CS, reset: RST, delay: D) -> Self {
        Self {
            spi,
            cs,
            reset,
            delay,
        }
    }

    pub fn release(self) -> (SPI, CS, RST, D) {
        (self.spi, self.cs, self.reset, self.delay)
    }
}

impl<SPI, CS, RST, D, const MAX: usize> AsyncTransport for AsyncSpiTransport<SPI, CS, RST, D, MAX>
where
    SPI: SpiBus,
    CS: OutputPin,
    RST: OutputPin<Error = CS::Error>,
    D: DelayNs,
{
    type Error = SpiTransportError<SPI::Error, CS::Error>;

    const MAX_TRANSFER: usize = MAX;

    async fn reset(&mut self) -> Result<(), Self::Error> {
        self.cs.set_high().map_err(SpiTransportError::Pin)?;
        self.delay.delay_ms(RESET_SETTLE_MS).await;
        self.reset.set_low().map_err(SpiTransportError::Pin)?;
        self.delay.delay_ms(RESET_PULSE_MS).await;
        self.reset.set_high().map_err(SpiTransportError::Pin)
    }

    fn chip_select(&mut self, selected: bool) -> Result<(), Self::Error> {
        if selected {
            self.cs.set_low()
        } else {
            self.cs.set_high()
        }
        .map_err(SpiTransportError::Pin)
    }

    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error> {
        let res = match (tx.is_empty(), rx.is_empty()) {
            (true, true) => Ok(()),
            (false, true) => self.spi.write(tx).await,
            (true, false) => {
                rx.fill(0);
                self.spi.transfer_in_place(rx).await
            }
            (false, false) => self.spi.transfer(rx, tx).await,
        };
        match res {
            Ok(()) => self.spi.flush().await.map_err(SpiTransportError::Spi),
            Err(e) => Err(SpiTransportError::Spi(e)),
        }
    }
}

/// Async driver for the S25FL064L, see [`crate::blocking::S25FL064L`]
pub struct AsyncS25FL064L<T, B = NoHook> {
    transport: T,
    busy: B,

    is_initialized: bool,
    is_power_down: bool,
    is_write_protect: bool,

    address_mode: AddressMode,
    protocol_mode: ProtocolMode,
    impedance: Impedance,
    manufacturer_id: ManufacturerId,
    device_id: DeviceId,
    unique_id: UniqueId,
    descriptor: DescriptorTable,
    block_size: u32,
    block_count: u32,
}

impl<T: AsyncTransport> AsyncS25FL064L<T> {
    pub fn new(transport: T) -> Self {
        Self::with_busy_hook(transport, NoHook)
    }
}

impl<T, B, E> AsyncS25FL064L<T, B>
where
    T: AsyncTransport<Error = E>,
    B: BusyHook,
{
    pub const fn capacity() -> usize {
        CAPACITY as usize
    }

    pub fn with_busy_hook(transport: T, busy: B) -> Self {
        Self {
            transport,
            busy,
            is_initialized: false,
            is_power_down: false,
            is_write_protect: false,
            address_mode: AddressMode::Short,
            protocol_mode: ProtocolMode::Spi,
            impedance: Impedance::Selection0,
            manufacturer_id: ManufacturerId(0),
            device_id: DeviceId(0),
            unique_id: UniqueId([0; 8]),
            descriptor: DescriptorTable::default(),
            block_size: 0,
            block_count: 0,
        }
    }

    pub fn release(self) -> (T, B) {
        (self.transport, self.busy)
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn is_power_down(&self) -> bool {
        self.is_power_down
    }

    pub fn is_write_protected(&self) -> bool {
        self.is_write_protect
    }

    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    pub fn protocol_mode(&self) -> ProtocolMode {
        self.protocol_mode
    }

    pub fn impedance(&self) -> Impedance {
        self.impedance
    }

    pub fn manufacturer_id(&self) -> ManufacturerId {
        self.manufacturer_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    pub fn descriptor(&self) -> &DescriptorTable {
        &self.descriptor
    }

    /// Erase block size, zero until initialized
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of erase blocks, zero until initialized
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub async fn init(&mut self) -> Result<(), Error<E>> {
        self.is_initialized = false;

        self.leave_power_down().await?;
        self.reset().await?;

        let id = self.read_identification().await?;
        #[cfg(feature = "defmt")]
        defmt::info!("Flash identification {:?}", id);
        if id.device != DeviceId(DEVICE_ID) {
            #[cfg(feature = "defmt")]
            defmt::error!("Unexpected device id {=u16:#x}", id.device.0);
            return Err(Error::IdentityMismatch {
                expected: DEVICE_ID,
                found: id.device.0,
            });
        }

        let unique_id = self.read_unique_id().await?;
        let mut image = [0; DESCRIPTOR_TABLE_SIZE];
        self.read_sfdp(0, &mut image).await?;
        let descriptor = DescriptorTable::from_bytes(&image);
        if !descriptor.is_valid() {
            #[cfg(feature = "defmt")]
            defmt::warn!("Invalid SFDP signature {:?}", descriptor.header.signature);
        }
        let config = self.read_configuration2().await?;
        #[cfg(feature = "defmt")]
        defmt::debug!("Configuration register 2 {:?}", config);

        self.manufacturer_id = id.manufacturer;
        self.device_id = id.device;
        self.unique_id = unique_id;
        self.descriptor = descriptor;
        self.address_mode = config.address_length.into();
        self.impedance = config.impedance;
        self.protocol_mode = config.protocol_mode;
        self.block_size = SECTOR_SIZE;
        self.block_count = SECTOR_COUNT;

        self.is_initialized = true;
        self.is_power_down = false;
        self.is_write_protect = false;
        Ok(())
    }

    pub async fn reset(&mut self) -> Result<(), Error<E>> {
        self.transport.reset().await.map_err(Error::Protocol)?;
        self.is_initialized = false;
        Ok(())
    }

    pub async fn software_reset(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::ResetEnable as u8], &mut []).await?;
        self.command(&[Command::ResetMemory as u8], &mut []).await?;
        self.is_initialized = false;
        Ok(())
    }

    pub async fn get_error(&mut self) -> Result<ErrorFlags, Error<E>> {
        let flags = self.read_status2().await?.into();
        self.command(&[Command::ClearStatus as u8], &mut []).await?;
        Ok(flags)
    }

    pub async fn enter_power_down(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::DeepPowerDown as u8], &mut []).await?;
        self.is_power_down = true;
        Ok(())
    }

    pub async fn leave_power_down(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::ReleasePowerDown as u8], &mut []).await?;
        self.wait_busy().await?;
        self.is_power_down = false;
        Ok(())
    }

    /// Erase the 4kB sector containing `addr`
    pub async fn erase_sector(&mut self, addr: u32) -> Result<(), Error<E>> {
        self.ensure_initialized()?;
        if addr >= CAPACITY {
            return Err(Error::OutOfBounds);
        }
        #[cfg(feature = "defmt")]
        defmt::trace!("Erase sector at {=u32:#x}", addr);

        self.checked_write_enable().await?;
        let frame = Frame::addressed(
            Command::sector_erase(self.address_mode),
            self.address_mode,
            Address(addr),
        );
        self.command(frame.as_bytes(), &mut []).await?;
        self.wait_busy().await
    }

    pub async fn erase_chip(&mut self) -> Result<(), Error<E>> {
        self.ensure_initialized()?;
        self.checked_write_enable().await?;
        self.command(&[Command::ChipErase as u8], &mut []).await?;
        self.wait_busy().await
    }

    pub async fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<E>> {
        self.ensure_initialized()?;
        check_range(CAPACITY, addr, data.len())?;

        let mut addr = Address(addr);
        let mut remaining = data;
        while !remaining.is_empty() {
            let len = (addr.page_remaining() as usize).min(remaining.len());
            let (page, rest) = remaining.split_at(len);

            self.checked_write_enable().await?;
            #[cfg(feature = "defmt")]
            defmt::trace!("Program {=usize} bytes at {=u32:#x}", page.len(), addr.0);

            let frame = Frame::addressed(
                Command::page_program(self.address_mode),
                self.address_mode,
                addr,
            );
            self.transport.chip_select(true).map_err(Error::Protocol)?;
            let body = Self::send(&mut self.transport, frame.as_bytes(), page).await;
            let deselect = self.transport.chip_select(false);
            finish_transaction(body, deselect)?;
            self.wait_busy().await?;

            addr.0 += len as u32;
            remaining = rest;
        }
        Ok(())
    }

    pub async fn read(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        self.ensure_initialized()?;
        check_range(CAPACITY, addr, buff.len())?;
        let frame = Frame::addressed(
            Command::read(self.address_mode),
            self.address_mode,
            Address(addr),
        );
        self.framed_read(frame.as_bytes(), buff).await
    }

    pub async fn write_enable(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::WriteEnable as u8], &mut []).await
    }

    pub async fn write_disable(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::WriteDisable as u8], &mut []).await
    }

    pub async fn read_status(&mut self) -> Result<StatusRegister, Error<E>> {
        let mut response = [0; 2];
        self.command(&[Command::ReadStatus1 as u8], &mut response).await?;
        Ok(response[1].into())
    }

    pub async fn read_status2(&mut self) -> Result<StatusRegister2, Error<E>> {
        let mut response = [0; 2];
        self.command(&[Command::ReadStatus2 as u8], &mut response).await?;
        Ok(response[1].into())
    }

    pub async fn read_configuration2(&mut self) -> Result<ConfigurationRegister2, Error<E>> {
        let mut response = [0; 2];
        self.command(&[Command::ReadConfig2 as u8], &mut response).await?;
        Ok(response[1].into())
    }

    pub async fn read_identification(&mut self) -> Result<Identification, Error<E>> {
        let mut response = [0; 4];
        self.command(&[Command::ReadIdentification as u8], &mut response)
            .await?;
        Ok(Identification::from_bytes([response[1], response[2], response[3]]))
    }

    pub async fn read_unique_id(&mut self) -> Result<UniqueId, Error<E>> {
        let frame = Frame::new(Command::ReadUniqueId).with_dummy(4);
        let mut id = [0; 8];
        self.framed_read(frame.as_bytes(), &mut id).await?;
        Ok(UniqueId(id))
    }

    pub async fn read_sfdp(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        let frame =
            Frame::addressed(Command::ReadSfdp, AddressMode::Short, Address(addr)).with_dummy(1);
        self.framed_read(frame.as_bytes(), buff).await
    }

    /// Poll status register 1 until the write in progress bit clears, yielding between polls
    pub async fn wait_busy(&mut self) -> Result<(), Error<E>> {
        loop {
            let status = self.read_status().await?;
            self.busy.tick();
            if !status.write_in_progress {
                return Ok(());
            }
            yield_now().await;
        }
    }

    fn ensure_initialized(&self) -> Result<(), Error<E>> {
        if !self.is_initialized {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// Wait for any operation still in flight, write enable, then check the latch
    async fn checked_write_enable(&mut self) -> Result<(), Error<E>> {
        self.wait_busy().await?;
        self.write_enable().await?;
        if !self.read_status().await?.write_enable_latch {
            #[cfg(feature = "defmt")]
            defmt::warn!("Write enable latch not set");
            self.is_write_protect = true;
            return Err(Error::WriteProtected);
        }
        self.is_write_protect = false;
        Ok(())
    }

    async fn command(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Error<E>> {
        self.transport.chip_select(true).map_err(Error::Protocol)?;
        let body = self.transport.exchange(tx, rx).await;
        let deselect = self.transport.chip_select(false);
        finish_transaction(body, deselect)
    }

    /// Send `header`, then stream the response into `buff` under one chip-select
    async fn framed_read(&mut self, header: &[u8], buff: &mut [u8]) -> Result<(), Error<E>> {
        self.transport.chip_select(true).map_err(Error::Protocol)?;
        let body = Self::receive(&mut self.transport, header, buff).await;
        let deselect = self.transport.chip_select(false);
        finish_transaction(body, deselect)
    }

    async fn send(transport: &mut T, header: &[u8], payload: &[u8]) -> Result<(), E> {
        transport.exchange(header, &mut []).await?;
        for chunk in payload.chunks(T::MAX_TRANSFER.max(1)) {
            transport.exchange(chunk, &mut []).await?;
        }
        Ok(())
    }

    async fn receive(transport: &mut T, header: &[u8], buff: &mut [u8]) -> Result<(), E> {
        transport.exchange(header, &mut []).await?;
        for chunk in buff.chunks_mut(T::MAX_TRANSFER.max(1)) {
            transport.exchange(&[], chunk).await?;
        }
        Ok(())
    }
}

impl<T, B, E> embedded_storage_async::nor_flash::ErrorType for AsyncS25FL064L<T, B>
where
    T: AsyncTransport<Error = E>,
    E: core::fmt::Debug,
{
    type Error = Error<E>;
}

impl<T, B, E> ReadNorFlash for AsyncS25FL064L<T, B>
where
    T: AsyncTransport<Error = E>,
    B: BusyHook,
    E: core::fmt::Debug,
{
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        AsyncS25FL064L::read(self, offset, bytes).await
    }

    fn capacity(&self) -> usize {
        Self::capacity()
    }
}

impl<T, B, E> NorFlash for AsyncS25FL064L<T, B>
where
    T: AsyncTransport<Error = E>,
    B: BusyHook,
    E: core::fmt::Debug,
{
    const WRITE_SIZE: usize = 1;

    const ERASE_SIZE: usize = SECTOR_SIZE as usize;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(CAPACITY, from, to)?;
        let mut addr = from;
        while addr < to {
            self.erase_sector(addr).await?;
            addr += SECTOR_SIZE;
        }
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        AsyncS25FL064L::write(self, offset, bytes).await
    }
}

impl<T, B, E> MultiwriteNorFlash for AsyncS25FL064L<T, B>
where
    T: AsyncTransport<Error = E>,
    B: BusyHook,
    E: core::fmt::Debug,
{
}
