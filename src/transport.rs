//! Hardware access for the driver.
//!
//! The driver never touches the bus directly. It frames every command between
//! [`Transport::chip_select`] calls and pushes bytes through [`Transport::exchange`],
//! which lets a command span several exchanges while chip-select stays asserted.

use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

/// Bus collaborator of the driver
pub trait Transport {
    type Error;

    /// Largest number of bytes a single [`Self::exchange`] may clock. Must not be zero.
    const MAX_TRANSFER: usize;

    /// Pulse the hardware reset line of the chip
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Assert (`true`) or release (`false`) chip-select
    fn chip_select(&mut self, selected: bool) -> Result<(), Self::Error>;

    /// Clock `max(tx.len(), rx.len())` bytes. `rx[i]` receives the byte clocked in
    /// while `tx[i]` is clocked out; missing tx bytes are sent as zero.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;
}

/// Called once per busy poll iteration, e.g. to feed a watchdog
pub trait BusyHook {
    fn tick(&mut self);
}

/// A [`BusyHook`] that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHook;

impl BusyHook for NoHook {
    fn tick(&mut self) {}
}

impl<F: FnMut()> BusyHook for F {
    fn tick(&mut self) {
        self()
    }
}

/// Settle time with chip-select released before the reset pulse
pub const RESET_SETTLE_MS: u32 = 100;

/// Length of the reset pulse
pub const RESET_PULSE_MS: u32 = 1000;

/// Errors of [`SpiTransport`]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiTransportError<SpiError, PinError> {
    Spi(SpiError),
    Pin(PinError),
}

/// [`Transport`] over an embedded-hal [`SpiBus`], with chip-select and reset driven as
/// active low GPIOs. `MAX` is the per-transaction ceiling of the SPI peripheral
/// (255 bytes on the nRF52832 SPIM).
pub struct SpiTransport<SPI, CS, RST, D, const MAX: usize = 255> {
    spi: SPI,
    cs: CS,
    reset: RST,
    delay: D,
}

impl<SPI, CS, RST, D> SpiTransport<SPI, CS, RST, D>
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

impl<SPI, CS, RST, D, const MAX: usize> SpiTransport<SPI, CS, RST, D, MAX>
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

    /// Give back the peripherals
    pub fn release(self) -> (SPI, CS, RST, D) {
        (self.spi, self.cs, self.reset, self.delay)
    }
}

impl<SPI, CS, RST, D, const MAX: usize> Transport for SpiTransport<SPI, CS, RST, D, MAX>
where
    SPI: SpiBus,
    CS: OutputPin,
    RST: OutputPin<Error = CS::Error>,
    D: DelayNs,
{
    type Error = SpiTransportError<SPI::Error, CS::Error>;

    const MAX_TRANSFER: usize = MAX;

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.cs.set_high().map_err(SpiTransportError::Pin)?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        self.reset.set_low().map_err(SpiTransportError::Pin)?;
        self.delay.delay_ms(RESET_PULSE_MS);
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

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error> {
        let res = match (tx.is_empty(), rx.is_empty()) {
            (true, true) => Ok(()),
            (false, true) => self.spi.write(tx),
            (true, false) => {
                rx.fill(0);
                self.spi.transfer_in_place(rx)
            }
            (false, false) => self.spi.transfer(rx, tx),
        };
        res.and_then(|_| self.spi.flush())
            .map_err(SpiTransportError::Spi)
    }
}
