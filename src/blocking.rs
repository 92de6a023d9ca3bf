use crate::{
    address::{Address, AddressMode},
    check_erase, check_range,
    command::{Command, Frame},
    error::Error,
    finish_transaction,
    register::*,
    sfdp::{DescriptorTable, DESCRIPTOR_TABLE_SIZE},
    transport::{BusyHook, NoHook, Transport},
    CAPACITY, DEVICE_ID, SECTOR_COUNT, SECTOR_SIZE,
};

/// Blocking driver for the S25FL064L.
///
/// The handle starts uninitialized, call [`Self::init`] before reading, writing or
/// erasing. Every program and erase polls the chip until it is done before returning,
/// calling the busy hook once per poll.
pub struct S25FL064L<T, B = NoHook> {
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

impl<T: Transport> S25FL064L<T> {
    pub fn new(transport: T) -> Self {
        Self::with_busy_hook(transport, NoHook)
    }
}

impl<T, B, E> S25FL064L<T, B>
where
    T: Transport<Error = E>,
    B: BusyHook,
{
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

    /// Give back the transport and the busy hook
    pub fn release(self) -> (T, B) {
        (self.transport, self.busy)
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn is_power_down(&self) -> bool {
        self.is_power_down
    }

    /// Set when the last program or erase found the write enable latch cleared
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

    /// Bring the chip to a known state and read its identity and configuration.
    ///
    /// Leaves the handle uninitialized, with its identity and geometry untouched, if any
    /// step fails or the chip is not an S25FL064L.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.is_initialized = false;

        self.leave_power_down()?;
        self.reset()?;

        let id = self.read_identification()?;
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

        let unique_id = self.read_unique_id()?;
        let descriptor = self.read_descriptor_table()?;
        if !descriptor.is_valid() {
            #[cfg(feature = "defmt")]
            defmt::warn!("Invalid SFDP signature {:?}", descriptor.header.signature);
        }
        let config = self.read_configuration2()?;
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

    /// Pulse the reset line. The handle must be initialized again afterwards
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        self.transport.reset().map_err(Error::Protocol)?;
        self.is_initialized = false;
        Ok(())
    }

    /// Reset through the reset enable / reset command pair.
    /// The handle must be initialized again afterwards
    pub fn software_reset(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::ResetEnable as u8], &mut [])?;
        self.command(&[Command::ResetMemory as u8], &mut [])?;
        self.is_initialized = false;
        Ok(())
    }

    /// Read the latched program and erase errors, then clear them on the chip
    pub fn get_error(&mut self) -> Result<ErrorFlags, Error<E>> {
        let flags = self.read_status2()?.into();
        self.command(&[Command::ClearStatus as u8], &mut [])?;
        Ok(flags)
    }

    /// Deep power down the chip, only [`Self::leave_power_down`] is accepted afterwards
    pub fn enter_power_down(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::DeepPowerDown as u8], &mut [])?;
        self.is_power_down = true;
        Ok(())
    }

    /// Release the chip from deep power down and wait until it is ready
    pub fn leave_power_down(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::ReleasePowerDown as u8], &mut [])?;
        self.wait_busy()?;
        self.is_power_down = false;
        Ok(())
    }

    /// Erase the 4kB sector containing `addr`
    pub fn erase_sector(&mut self, addr: u32) -> Result<(), Error<E>> {
        self.ensure_initialized()?;
        if addr >= CAPACITY {
            return Err(Error::OutOfBounds);
        }
        #[cfg(feature = "defmt")]
        defmt::trace!("Erase sector at {=u32:#x}", addr);

        self.checked_write_enable()?;
        let frame = Frame::addressed(
            Command::sector_erase(self.address_mode),
            self.address_mode,
            Address(addr),
        );
        self.command(frame.as_bytes(), &mut [])?;
        self.wait_busy()
    }

    /// Erase the whole chip
    pub fn erase_chip(&mut self) -> Result<(), Error<E>> {
        self.ensure_initialized()?;
        self.checked_write_enable()?;
        self.command(&[Command::ChipErase as u8], &mut [])?;
        self.wait_busy()
    }

    /// Program `data` starting at `addr`, one page program per page touched
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<E>> {
        self.ensure_initialized()?;
        check_range(CAPACITY, addr, data.len())?;

        let mut addr = Address(addr);
        let mut remaining = data;
        while !remaining.is_empty() {
            let len = (addr.page_remaining() as usize).min(remaining.len());
            let (page, rest) = remaining.split_at(len);
            self.program_page(addr, page)?;
            addr.0 += len as u32;
            remaining = rest;
        }
        Ok(())
    }

    /// Read `buff.len()` bytes starting at `addr`. A single read command covers the whole range
    pub fn read(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        self.ensure_initialized()?;
        check_range(CAPACITY, addr, buff.len())?;

        let frame = Frame::addressed(
            Command::read(self.address_mode),
            self.address_mode,
            Address(addr),
        );
        self.transaction(|transport| {
            transport.exchange(frame.as_bytes(), &mut [])?;
            for chunk in buff.chunks_mut(T::MAX_TRANSFER.max(1)) {
                transport.exchange(&[], chunk)?;
            }
            Ok(())
        })
    }

    /// Set the write enable latch
    pub fn write_enable(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::WriteEnable as u8], &mut [])
    }

    /// Clear the write enable latch
    pub fn write_disable(&mut self) -> Result<(), Error<E>> {
        self.command(&[Command::WriteDisable as u8], &mut [])
    }

    /// Read status register 1
    pub fn read_status(&mut self) -> Result<StatusRegister, Error<E>> {
        let mut response = [0; 2];
        self.command(&[Command::ReadStatus1 as u8], &mut response)?;
        Ok(response[1].into())
    }

    /// Read status register 2
    pub fn read_status2(&mut self) -> Result<StatusRegister2, Error<E>> {
        let mut response = [0; 2];
        self.command(&[Command::ReadStatus2 as u8], &mut response)?;
        Ok(response[1].into())
    }

    /// Read configuration register 2
    pub fn read_configuration2(&mut self) -> Result<ConfigurationRegister2, Error<E>> {
        let mut response = [0; 2];
        self.command(&[Command::ReadConfig2 as u8], &mut response)?;
        Ok(response[1].into())
    }

    /// Read the manufacturer and device ID
    pub fn read_identification(&mut self) -> Result<Identification, Error<E>> {
        let mut response = [0; 4];
        self.command(&[Command::ReadIdentification as u8], &mut response)?;
        Ok(Identification::from_bytes([response[1], response[2], response[3]]))
    }

    /// Read the 64-bit unique ID
    pub fn read_unique_id(&mut self) -> Result<UniqueId, Error<E>> {
        let frame = Frame::new(Command::ReadUniqueId).with_dummy(4);
        let mut id = [0; 8];
        self.transaction(|transport| {
            transport.exchange(frame.as_bytes(), &mut [])?;
            transport.exchange(&[], &mut id)
        })?;
        Ok(UniqueId(id))
    }

    /// Read from the Serial Flash Discoverable Parameter space
    pub fn read_sfdp(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        let frame =
            Frame::addressed(Command::ReadSfdp, AddressMode::Short, Address(addr)).with_dummy(1);
        self.transaction(|transport| {
            transport.exchange(frame.as_bytes(), &mut [])?;
            for chunk in buff.chunks_mut(T::MAX_TRANSFER.max(1)) {
                transport.exchange(&[], chunk)?;
            }
            Ok(())
        })
    }

    fn read_descriptor_table(&mut self) -> Result<DescriptorTable, Error<E>> {
        let mut image = [0; DESCRIPTOR_TABLE_SIZE];
        self.read_sfdp(0, &mut image)?;
        Ok(DescriptorTable::from_bytes(&image))
    }

    /// Poll status register 1 until the write in progress bit clears
    pub fn wait_busy(&mut self) -> Result<(), Error<E>> {
        loop {
            let status = self.read_status()?;
            self.busy.tick();
            if !status.write_in_progress {
                return Ok(());
            }
        }
    }

    fn ensure_initialized(&self) -> Result<(), Error<E>> {
        if !self.is_initialized {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// Wait for any operation still in flight, write enable, then make sure the latch is
    /// actually set. Some error states clear it silently
    fn checked_write_enable(&mut self) -> Result<(), Error<E>> {
        self.wait_busy()?;
        self.write_enable()?;
        if !self.read_status()?.write_enable_latch {
            #[cfg(feature = "defmt")]
            defmt::warn!("Write enable latch not set");
            self.is_write_protect = true;
            return Err(Error::WriteProtected);
        }
        self.is_write_protect = false;
        Ok(())
    }

    /// Program at most one page, `data` must not cross a page boundary
    fn program_page(&mut self, addr: Address, data: &[u8]) -> Result<(), Error<E>> {
        self.checked_write_enable()?;
        #[cfg(feature = "defmt")]
        defmt::trace!("Program {=usize} bytes at {=u32:#x}", data.len(), addr.0);

        let frame = Frame::addressed(
            Command::page_program(self.address_mode),
            self.address_mode,
            addr,
        );
        self.transaction(|transport| {
            transport.exchange(frame.as_bytes(), &mut [])?;
            for chunk in data.chunks(T::MAX_TRANSFER.max(1)) {
                transport.exchange(chunk, &mut [])?;
            }
            Ok(())
        })?;
        self.wait_busy()
    }

    /// Run `f` with chip-select asserted. Chip-select is released even if `f` fails
    fn transaction<R>(
        &mut self,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, Error<E>> {
        self.transport.chip_select(true).map_err(Error::Protocol)?;
        let body = f(&mut self.transport);
        let deselect = self.transport.chip_select(false);
        finish_transaction(body, deselect)
    }

    fn command(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Error<E>> {
        self.transaction(|transport| transport.exchange(tx, rx))
    }
}

/// Implementation of the `NorFlash` traits of the `embedded_storage` crate.
/// The driver must be initialized before using them.
mod es {
    use super::*;
    use core::fmt::Debug;
    use embedded_storage::nor_flash::{
        ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };

    impl<E> From<NorFlashErrorKind> for Error<E> {
        fn from(e: NorFlashErrorKind) -> Self {
            match e {
                NorFlashErrorKind::NotAligned => Error::NotAligned,
                NorFlashErrorKind::OutOfBounds => Error::OutOfBounds,
                _ => Error::InvalidParameter,
            }
        }
    }

    impl<E> NorFlashError for Error<E>
    where
        E: Debug,
    {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
                Error::NotAligned => NorFlashErrorKind::NotAligned,
                _ => NorFlashErrorKind::Other,
            }
        }
    }

    impl<T, B, E> ErrorType for S25FL064L<T, B>
    where
        T: Transport<Error = E>,
        E: Debug,
    {
        type Error = Error<E>;
    }

    impl<T, B, E> ReadNorFlash for S25FL064L<T, B>
    where
        T: Transport<Error = E>,
        B: BusyHook,
        E: Debug,
    {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            if bytes.is_empty() {
                return Ok(());
            }
            S25FL064L::read(self, offset, bytes)
        }

        fn capacity(&self) -> usize {
            CAPACITY as usize
        }
    }

    impl<T, B, E> NorFlash for S25FL064L<T, B>
    where
        T: Transport<Error = E>,
        B: BusyHook,
        E: Debug,
    {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = SECTOR_SIZE as usize;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            check_erase(CAPACITY, from, to)?;
            for addr in (from..to).step_by(Self::ERASE_SIZE) {
                self.erase_sector(addr)?;
            }
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            if bytes.is_empty() {
                return Ok(());
            }
            S25FL064L::write(self, offset, bytes)
        }
    }

    impl<T, B, E> MultiwriteNorFlash for S25FL064L<T, B>
    where
        T: Transport<Error = E>,
        B: BusyHook,
        E: Debug,
    {
    }
}
