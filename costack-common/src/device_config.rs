//! Device config file
//!
//! A DeviceConfig is read from a TOML file and provides the runtime settings for a costack node:
//! its node ID and bit rate, timing parameters, and the table of default values which are applied
//! to the object dictionary on every reset.
//!
//! # An example TOML file
//!
//! ```toml
//! node_id = 5
//! bitrate = 500000
//! restart_ms = 100
//! heartbeat_ms = 1000
//!
//! # Shorthand for the defaults of the identity object 0x1018
//! [identity]
//! vendor_id = 0xCAFE
//! product_code = 1032
//! revision_number = 1
//! serial_number = 77
//!
//! [[defaults]]
//! index = 0x1800
//! sub = 2
//! value = 0xFE
//! ```
//!
//! # Defaults
//!
//! Each `[[defaults]]` entry names a sub-object and the integer value it takes after a reset. The
//! identity section expands to defaults for sub-objects 1 to 4 of 0x1018, and `heartbeat_ms`
//! expands to a default for 0x1017. Defining the same sub-object twice is an error.
//!
//! # Node ID
//!
//! `node_id` may be omitted, or set to 255, to start the node unconfigured. It then waits for an
//! LSS master to assign an ID.

use serde::Deserialize;
use snafu::ResultExt as _;
use snafu::Snafu;

use crate::constants::object_ids;

/// Error returned when loading a device config fails
#[derive(Debug, Snafu)]
pub enum LoadError {
    /// An IO error occured while reading the file
    #[snafu(display("IO error: {source}"))]
    Io {
        /// The underlying IO error
        source: std::io::Error,
    },
    /// An error occured in the TOML parser
    #[snafu(display("Toml parse error: {source}"))]
    TomlParsing {
        /// The toml error which led to this error
        source: toml::de::Error,
    },
    /// Multiple defaults defined for the same sub-object
    #[snafu(display("Multiple defaults for sub index {sub} on object 0x{index:x}"))]
    DuplicateDefault {
        /// Index of the object
        index: u16,
        /// Duplicated sub index
        sub: u8,
    },
    /// The node ID is outside 1..=127 and is not the unconfigured marker
    #[snafu(display("Invalid node ID {value}"))]
    InvalidNodeId {
        /// The rejected value
        value: u8,
    },
    /// The bit rate is not one of the standard rates
    #[snafu(display("Unsupported bitrate {value}"))]
    InvalidBitrate {
        /// The rejected value
        value: u32,
    },
}

/// A default value for one sub-object
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DefaultDefinition {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
    /// Value, truncated to the width of the sub-object
    pub value: u64,
}

/// The identity values stored in object 0x1018
#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// The 32-bit vendor ID for this device
    pub vendor_id: u32,
    /// The 32-bit product code for this device
    pub product_code: u32,
    /// The 32-bit revision number for this device
    pub revision_number: u32,
    /// The 32-bit serial number; usually overridden by the application at run-time
    #[serde(default)]
    pub serial_number: u32,
}

fn default_node_id() -> u8 {
    crate::NodeId::UNCONFIGURED
}

fn default_bitrate() -> u32 {
    1_000_000
}

fn default_sdo_timeout() -> u32 {
    100
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
/// Device configuration structure
pub struct DeviceConfig {
    /// The node ID used when no LSS configuration has been stored
    #[serde(default = "default_node_id")]
    pub node_id: u8,

    /// The bus bit rate used when no LSS configuration has been stored
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Delay before automatically rejoining the bus after bus-off, in milliseconds. 0 disables
    /// automatic recovery.
    #[serde(default)]
    pub restart_ms: u32,

    /// The default heartbeat producer time, in milliseconds
    #[serde(default)]
    pub heartbeat_ms: u16,

    /// Timeout for SDO transfers, in milliseconds
    #[serde(default = "default_sdo_timeout")]
    pub sdo_timeout_ms: u32,

    /// Optional identity object defaults
    #[serde(default)]
    pub identity: Option<IdentityConfig>,

    /// Default values applied on reset
    #[serde(default)]
    pub defaults: Vec<DefaultDefinition>,
}

impl DeviceConfig {
    /// Try to read a device config from a file
    pub fn load(config_path: impl AsRef<std::path::Path>) -> Result<Self, LoadError> {
        let config_str = std::fs::read_to_string(&config_path).context(IoSnafu)?;
        Self::load_from_str(&config_str)
    }

    /// Try to read a config from a &str
    pub fn load_from_str(config_str: &str) -> Result<Self, LoadError> {
        let mut config: DeviceConfig = toml::from_str(config_str).context(TomlParsingSnafu)?;

        if config.node_id != crate::NodeId::UNCONFIGURED && !(1..=127).contains(&config.node_id) {
            return InvalidNodeIdSnafu {
                value: config.node_id,
            }
            .fail();
        }
        if !crate::lss::BITRATE_TABLE.contains(&(config.bitrate as i32)) || config.bitrate == 0 {
            return InvalidBitrateSnafu {
                value: config.bitrate,
            }
            .fail();
        }

        if config.heartbeat_ms != 0 {
            config.defaults.push(DefaultDefinition {
                index: object_ids::HEARTBEAT_PRODUCER_TIME,
                sub: 0,
                value: config.heartbeat_ms as u64,
            });
        }
        if let Some(identity) = config.identity {
            let values = [
                identity.vendor_id,
                identity.product_code,
                identity.revision_number,
                identity.serial_number,
            ];
            for (i, value) in values.into_iter().enumerate() {
                config.defaults.push(DefaultDefinition {
                    index: object_ids::IDENTITY,
                    sub: i as u8 + 1,
                    value: value as u64,
                });
            }
        }

        Self::validate_unique_defaults(&config.defaults)?;
        config.defaults.sort_by_key(|d| (d.index, d.sub));

        Ok(config)
    }

    fn validate_unique_defaults(defaults: &[DefaultDefinition]) -> Result<(), LoadError> {
        let mut seen = std::collections::HashSet::new();
        for d in defaults {
            if !seen.insert((d.index, d.sub)) {
                return DuplicateDefaultSnafu {
                    index: d.index,
                    sub: d.sub,
                }
                .fail();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;

    #[test]
    fn test_minimal_config() {
        let config = DeviceConfig::load_from_str("").unwrap();
        assert_eq!(0xFF, config.node_id);
        assert_eq!(1_000_000, config.bitrate);
        assert_eq!(100, config.sdo_timeout_ms);
        assert!(config.defaults.is_empty());
    }

    #[test]
    fn test_expanded_defaults() {
        const TOML: &str = r#"
            node_id = 3
            bitrate = 250000
            heartbeat_ms = 500

            [identity]
            vendor_id = 1
            product_code = 2
            revision_number = 3

            [[defaults]]
            index = 0x2000
            sub = 0
            value = 12
        "#;
        let config = DeviceConfig::load_from_str(TOML).unwrap();
        assert_eq!(3, config.node_id);
        assert_eq!(250_000, config.bitrate);
        assert_eq!(
            DefaultDefinition {
                index: 0x1017,
                sub: 0,
                value: 500
            },
            config.defaults[0]
        );
        assert_eq!(0x1018, config.defaults[1].index);
        assert_eq!(1, config.defaults[1].sub);
        assert_eq!(0, config.defaults[4].value);
        assert_eq!(0x2000, config.defaults[5].index);
    }

    #[test]
    fn test_duplicate_default_errors() {
        const TOML: &str = r#"
            heartbeat_ms = 100

            [[defaults]]
            index = 0x1017
            sub = 0
            value = 200
        "#;
        let err = DeviceConfig::load_from_str(TOML).unwrap_err();
        assert!(matches!(
            err,
            LoadError::DuplicateDefault {
                index: 0x1017,
                sub: 0
            }
        ));
        assert_contains!(
            err.to_string().as_str(),
            "Multiple defaults for sub index 0 on object 0x1017"
        );
    }

    #[test]
    fn test_invalid_node_and_bitrate() {
        let err = DeviceConfig::load_from_str("node_id = 0").unwrap_err();
        assert!(matches!(err, LoadError::InvalidNodeId { value: 0 }));
        let err = DeviceConfig::load_from_str("bitrate = 123").unwrap_err();
        assert!(matches!(err, LoadError::InvalidBitrate { value: 123 }));
    }
}
