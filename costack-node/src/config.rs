//! Stack capacities and runtime network configuration

use crate::object_dict::{DefaultValue, Object};
use crate::storage::ObjectStorage;

/// Number of receive PDO slots
pub const MAX_RX_PDO: usize = 4;
/// Number of transmit PDO slots
pub const MAX_TX_PDO: usize = 4;
/// Maximum number of mappings in one PDO
pub const MAX_PDO_ENTRIES: usize = 8;
/// Depth of the pre-defined error field (0x1003)
pub const MAX_ERRORS: usize = 8;
/// Number of heartbeat consumer slots (0x1016)
pub const MAX_HEARTBEATS: usize = 8;
/// Number of EMCY consumer COB-IDs (0x1028)
pub const MAX_EMCY_COBIDS: usize = 8;
/// Default SDO transfer timeout, in milliseconds
pub const SDO_TIMEOUT_MS: u32 = 100;
/// Size of the SDO server and client transfer buffers
///
/// This is the largest object which can be transferred by segmented SDO.
pub const SDO_BUFFER_SIZE: usize = 889;
/// Depth of the dispatcher job queue
pub const JOB_QUEUE_SIZE: usize = 10;
/// Period of the dispatcher tick, in microseconds
pub const TICK_US: u32 = 1000;

/// Called on an NMT reset node command, before the node resets
pub type ResetCallback = dyn Fn() + Sync;
/// Called after every NMT state change with the new state
pub type NmtCallback = dyn Fn(crate::nmt::State) + Sync;
/// Called once for every processed SYNC
pub type SyncCallback = dyn Fn() + Sync;
/// Called for locally generated and received emergencies
///
/// Arguments are the producing node, the error code, the error register and the manufacturer
/// specific bytes. Returning true from a local emergency applies the configured error behaviour.
pub type EmcyCallback = dyn Fn(u8, u16, u8, Option<[u8; 5]>) -> bool + Sync;
/// Called when an entry carrying the NOTIFY flag is written, with its index and sub index
pub type NotifyCallback = dyn Fn(u16, u8) + Sync;

/// Application hooks invoked from the dispatch context
#[derive(Clone, Copy, Default)]
#[allow(missing_debug_implementations)]
pub struct Callbacks {
    /// See [`ResetCallback`]
    pub reset: Option<&'static ResetCallback>,
    /// See [`NmtCallback`]
    pub nmt: Option<&'static NmtCallback>,
    /// See [`SyncCallback`]
    pub sync: Option<&'static SyncCallback>,
    /// See [`EmcyCallback`]
    pub emcy: Option<&'static EmcyCallback>,
    /// See [`NotifyCallback`]
    pub notify: Option<&'static NotifyCallback>,
}

/// Everything needed to create a [`Network`](crate::Network)
#[derive(Clone, Copy)]
#[allow(missing_debug_implementations)]
pub struct NetworkConfig {
    /// Node ID used when none has been stored by LSS. 0xFF starts the node unconfigured.
    pub node_id: u8,
    /// Bit rate used when none has been stored by LSS
    pub bitrate: u32,
    /// Delay before rejoining the bus after bus-off, in ms. 0 disables automatic recovery.
    pub restart_ms: u32,
    /// SDO server and client transfer timeout, in ms
    pub sdo_timeout_ms: u32,
    /// The object dictionary
    pub od: &'static [Object],
    /// Values applied to the dictionary on every reset, before stored values are loaded
    pub defaults: &'static [DefaultValue],
    /// Application hooks
    pub callbacks: Callbacks,
    /// Persistent storage backend
    pub storage: Option<&'static dyn ObjectStorage>,
}

impl NetworkConfig {
    /// Create a configuration with default timing, no defaults, callbacks or storage
    pub const fn new(node_id: u8, od: &'static [Object]) -> Self {
        Self {
            node_id,
            bitrate: 1_000_000,
            restart_ms: 0,
            sdo_timeout_ms: SDO_TIMEOUT_MS,
            od,
            defaults: &[],
            callbacks: Callbacks {
                reset: None,
                nmt: None,
                sync: None,
                emcy: None,
                notify: None,
            },
            storage: None,
        }
    }

    /// Build a configuration from a device config file
    ///
    /// The default table is leaked so that it lives as long as the network.
    #[cfg(feature = "std")]
    #[cfg_attr(docsrs, doc(cfg(feature = "std")))]
    pub fn from_device_config(
        config: &costack_common::device_config::DeviceConfig,
        od: &'static [Object],
    ) -> Self {
        let defaults: Vec<DefaultValue> = config.defaults.iter().map(DefaultValue::from).collect();
        Self {
            node_id: config.node_id,
            bitrate: config.bitrate,
            restart_ms: config.restart_ms,
            sdo_timeout_ms: config.sdo_timeout_ms,
            defaults: defaults.leak(),
            ..Self::new(config.node_id, od)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_od, TestChannel};
    use crate::Network;
    use costack_common::device_config::DeviceConfig;

    #[test]
    fn test_from_device_config() {
        let device = DeviceConfig::load_from_str(
            r#"
            node_id = 9
            bitrate = 500000
            heartbeat_ms = 200

            [[defaults]]
            index = 0x2000
            sub = 0
            value = 0x55
            "#,
        )
        .unwrap();
        let config = NetworkConfig::from_device_config(&device, test_od());
        assert_eq!(2, config.defaults.len());

        let mut net = Network::new(TestChannel::default(), config).unwrap();
        net.start(0);
        assert_eq!(9, net.node_id());
        assert_eq!(500_000, net.bitrate());
        assert_eq!(0x55, net.read(0x2000, 0).unwrap());
        assert_eq!(200, net.read(0x1017, 0).unwrap());
    }
}
