//! Common traits

use crate::messages::CanMessage;

/// Error type for CAN send operations containing the failed message
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct CanSendError(pub CanMessage);

impl core::fmt::Display for CanSendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to send CAN message: {:?}", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CanSendError {}

/// Controller error flags reported by [`CanChannel::get_state`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanState {
    /// A receive overrun occurred since the last query
    pub overrun: bool,
    /// The controller is error passive
    pub error_passive: bool,
    /// The controller is bus off
    pub bus_off: bool,
}

/// Error returned when the controller state cannot be queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanStateError;

impl core::fmt::Display for CanStateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to read CAN controller state")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CanStateError {}

/// The driver interface the node stack uses to talk to a CAN controller
///
/// All methods are called from the single context that owns the
/// `Network`, so implementations do not need internal locking unless they share the controller
/// with an interrupt handler.
pub trait CanChannel {
    /// Queue a message for transmission
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError>;

    /// Pop a received message, returning None immediately if nothing is pending
    fn receive(&mut self) -> Option<CanMessage>;

    /// Change the bus bit rate, in bits per second
    ///
    /// Called with the controller taken off the bus.
    fn set_bitrate(&mut self, bitrate: u32);

    /// Configure the acceptance filter with a list of 11-bit identifiers
    ///
    /// An empty list accepts everything.
    fn set_filter(&mut self, ids: &[u16]);

    /// Join the bus
    fn bus_on(&mut self);

    /// Leave the bus
    fn bus_off(&mut self);

    /// Read the controller error state
    fn get_state(&mut self) -> Result<CanState, CanStateError>;
}
