/// All possible errors emitted by the driver
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<TransportError> {
    /// A transport exchange, chip-select or reset failed
    Protocol(TransportError),

    /// Invalid value passed, e.g. an empty buffer
    InvalidParameter,

    /// The device has not been initialized, see `init`
    NotInitialized,

    /// The write enable latch was not set before a program or erase
    WriteProtected,

    /// The device ID read during init does not match the S25FL064L
    IdentityMismatch { expected: u16, found: u16 },

    /// Address out of bound
    OutOfBounds,

    /// Address not aligned
    NotAligned,
}
