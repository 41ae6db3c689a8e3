//! Node ID type
use snafu::Snafu;

/// An enum representing the node ID of a CANopen node. The node ID must be between 1 and 127 for
/// configured devices, with the special value of 255 used to represent an unconfigured device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeId {
    /// No node ID has been assigned; the node waits for LSS configuration
    Unconfigured,
    /// A valid node ID in 1..=127
    Configured(ConfiguredId),
}

/// A node ID which is known to be in the range 1..=127
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfiguredId(u8);

impl ConfiguredId {
    /// Create a ConfiguredId, checking the range
    pub const fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        if value > 0 && value < 128 {
            Ok(ConfiguredId(value))
        } else {
            Err(InvalidNodeIdError { value })
        }
    }

    /// Get the numeric ID
    pub const fn raw(&self) -> u8 {
        self.0
    }
}

impl From<ConfiguredId> for u8 {
    fn from(value: ConfiguredId) -> Self {
        value.raw()
    }
}

impl NodeId {
    /// The raw value used for an unconfigured node
    pub const UNCONFIGURED: u8 = 0xFF;

    /// Create a NodeId, checking the range
    pub const fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        if value == Self::UNCONFIGURED {
            Ok(NodeId::Unconfigured)
        } else {
            match ConfiguredId::new(value) {
                Ok(id) => Ok(NodeId::Configured(id)),
                Err(e) => Err(e),
            }
        }
    }

    /// Get the raw value, 255 for unconfigured
    pub const fn raw(&self) -> u8 {
        match self {
            NodeId::Unconfigured => Self::UNCONFIGURED,
            NodeId::Configured(node_id_num) => node_id_num.0,
        }
    }

    /// Returns true if this is a configured ID
    pub const fn is_configured(&self) -> bool {
        matches!(self, NodeId::Configured(_))
    }
}

/// Error returned when a value outside 1..=127 (or 255) is used as a node ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(display("Invalid node ID {value}"))]
pub struct InvalidNodeIdError {
    value: u8,
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeId::new(value)
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_range() {
        assert!(NodeId::new(0).is_err());
        assert!(NodeId::new(128).is_err());
        assert_eq!(Ok(NodeId::Unconfigured), NodeId::new(255));
        assert_eq!(127, NodeId::new(127).unwrap().raw());
        assert!(NodeId::new(1).unwrap().is_configured());
    }
}
